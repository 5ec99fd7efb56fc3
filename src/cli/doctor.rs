//! Environment readiness check.

use crate::browser::chromium::find_chromium;
use crate::config::{ProxyConfig, DEFAULT_SOLVER_URL};
use anyhow::Result;
use url::Url;

/// Check Chromium availability, credentials, proxy, and the solver endpoint.
pub async fn run() -> Result<()> {
    println!("VPS Keeper Doctor");
    println!("=================");
    println!();

    let os = std::env::consts::OS;
    let arch = std::env::consts::ARCH;
    println!("OS:   {os}");
    println!("Arch: {arch}");
    println!();

    // Chromium
    let chromium_path = find_chromium();
    match &chromium_path {
        Some(path) => println!("[OK] Chromium found: {}", path.display()),
        None => println!(
            "[!!] Chromium NOT found. Install Chrome or set VPSKEEPER_CHROMIUM_PATH."
        ),
    }

    // Credentials
    let email_ok = env_nonempty("EMAIL");
    let password_ok = env_nonempty("PASSWORD");
    println!(
        "{} EMAIL is {}",
        if email_ok { "[OK]" } else { "[!!]" },
        if email_ok { "set" } else { "NOT set" }
    );
    println!(
        "{} PASSWORD is {}",
        if password_ok { "[OK]" } else { "[!!]" },
        if password_ok { "set" } else { "NOT set" }
    );

    // Proxy (optional)
    let mut proxy_ok = true;
    match std::env::var("PROXY_SERVER") {
        Ok(raw) if !raw.trim().is_empty() => match ProxyConfig::parse(raw.trim()) {
            Ok(proxy) => {
                let auth = if proxy.credentials.is_some() {
                    " (credentials stripped from launch arg)"
                } else {
                    ""
                };
                println!("[OK] PROXY_SERVER parses: {}{auth}", proxy.launch_arg);
            }
            Err(e) => {
                proxy_ok = false;
                println!("[!!] PROXY_SERVER is invalid: {e:#}");
            }
        },
        _ => println!("[--] PROXY_SERVER not set (direct connection)"),
    }

    // Solver endpoint
    let solver_url = std::env::var("SOLVER_URL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SOLVER_URL.to_string());
    let solver_ok = Url::parse(&solver_url).is_ok();
    if solver_ok {
        println!("[OK] Solver endpoint: {solver_url}");
    } else {
        println!("[!!] SOLVER_URL is not a valid URL: {solver_url}");
    }

    println!();
    let ready = chromium_path.is_some() && email_ok && password_ok && proxy_ok && solver_ok;
    if ready {
        println!("Status: READY");
    } else {
        println!("Status: NOT READY");
    }

    Ok(())
}

fn env_nonempty(name: &str) -> bool {
    std::env::var(name)
        .map(|v| !v.trim().is_empty())
        .unwrap_or(false)
}
