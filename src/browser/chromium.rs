//! Chromium-backed [`PanelPage`] using chromiumoxide.

use super::{sanitize_js_string, PanelPage};
use crate::extract::PageSnapshot;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::fetch::{
    AuthChallengeResponse, AuthChallengeResponseResponse, ContinueRequestParams,
    ContinueWithAuthParams, EnableParams, EventAuthRequired, EventRequestPaused, RequestPattern,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Hard bound on any single navigation.
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on waiting for an element to become interactable.
const INTERACT_TIMEOUT: Duration = Duration::from_secs(10);

/// Cadence of condition polls.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    // 1. VPSKEEPER_CHROMIUM_PATH env
    if let Ok(p) = std::env::var("VPSKEEPER_CHROMIUM_PATH") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. ~/.vpskeeper/chromium/
    if let Some(home) = dirs::home_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                home.join(".vpskeeper/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".vpskeeper/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                home.join(".vpskeeper/chromium/chrome"),
            ]
        } else {
            vec![
                home.join(".vpskeeper/chromium/chrome-linux64/chrome"),
                home.join(".vpskeeper/chromium/chrome"),
            ]
        };
        for c in candidates {
            if c.exists() {
                return Some(c);
            }
        }
    }

    // 3. System PATH
    for name in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 4. Common macOS location
    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launch options for the panel browser.
pub struct LaunchOptions {
    pub headless: bool,
    /// `--proxy-server=` value with embedded credentials already stripped.
    pub proxy_arg: Option<String>,
    pub chromium_path: Option<PathBuf>,
    /// Checkpoint screenshots land here; `None` disables capture.
    pub artifact_dir: Option<PathBuf>,
}

/// A Chromium page driving the account panel.
pub struct ChromiumPanel {
    browser: Browser,
    page: Page,
    artifact_dir: Option<PathBuf>,
}

impl ChromiumPanel {
    /// Launch Chromium and open the working page.
    pub async fn launch(opts: LaunchOptions) -> Result<Self> {
        let chrome_path = opts
            .chromium_path
            .or_else(find_chromium)
            .context("Chromium not found. Set VPSKEEPER_CHROMIUM_PATH or install Chrome.")?;

        let mut builder = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--window-size=1080,1024");
        if opts.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }
        if let Some(proxy) = &opts.proxy_arg {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }

        let config = builder
            .build()
            .map_err(|e| anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        // Drive the CDP event loop for the browser's lifetime.
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .context("failed to open the working page")?;

        // The panel serves a different layout to headless user agents.
        if let Ok(version) = browser.version().await {
            let ua = version.user_agent.replace("Headless", "");
            if let Err(e) = page.set_user_agent(ua.as_str()).await {
                tracing::debug!(error = %e, "could not override user agent");
            }
        }

        Ok(Self {
            browser,
            page,
            artifact_dir: opts.artifact_dir,
        })
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, js: &str) -> Result<T> {
        let result = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| anyhow!("script evaluation failed: {e}"))?;
        result
            .into_value()
            .map_err(|e| anyhow!("unexpected script result: {e:?}"))
    }

    /// Poll a boolean-returning script until it yields `true` or the timeout
    /// elapses. Evaluation errors count as `false` (the page may be
    /// mid-navigation).
    async fn poll_js_true(&self, js: &str, timeout: Duration, what: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.eval::<bool>(js).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => tracing::trace!(error = %e, "condition poll failed"),
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("{what} did not become available within {}ms", timeout.as_millis());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl PanelPage for ChromiumPanel {
    async fn navigate(&self, url: &str) -> Result<()> {
        let nav = tokio::time::timeout(NAVIGATION_TIMEOUT, self.page.goto(url)).await;
        match nav {
            Ok(Ok(_)) => {
                let _ = self.page.wait_for_navigation().await;
                Ok(())
            }
            Ok(Err(e)) => bail!("navigation to {url} failed: {e}"),
            Err(_) => bail!(
                "navigation to {url} timed out after {}ms",
                NAVIGATION_TIMEOUT.as_millis()
            ),
        }
    }

    async fn wait_for_navigation(&self) -> Result<()> {
        match tokio::time::timeout(NAVIGATION_TIMEOUT, self.page.wait_for_navigation()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!(
                "navigation did not settle within {}ms",
                NAVIGATION_TIMEOUT.as_millis()
            ),
        }
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<()> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector('{}');
                if (!el) return false;
                el.value = '{}';
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                return true;
            }})()"#,
            sanitize_js_string(selector),
            sanitize_js_string(text)
        );
        self.poll_js_true(&js, INTERACT_TIMEOUT, &format!("input {selector}"))
            .await
    }

    async fn click_selector(&self, selector: &str) -> Result<()> {
        let js = format!(
            r#"(() => {{
                const el = document.querySelector('{}');
                if (!el) return false;
                el.click();
                return true;
            }})()"#,
            sanitize_js_string(selector)
        );
        self.poll_js_true(&js, INTERACT_TIMEOUT, &format!("element {selector}"))
            .await
    }

    async fn click_text(&self, text: &str) -> Result<()> {
        let js = format!(
            r#"(() => {{
                const label = '{}';
                const candidates = [...document.querySelectorAll('a, button, input, span, div, label')]
                    .filter(el => (el.innerText || el.value || '').includes(label))
                    .filter(el => el.offsetParent !== null);
                if (!candidates.length) return false;
                candidates.sort((a, b) =>
                    (a.innerText || a.value || '').length - (b.innerText || b.value || '').length);
                candidates[0].click();
                return true;
            }})()"#,
            sanitize_js_string(text)
        );
        self.poll_js_true(&js, INTERACT_TIMEOUT, &format!("element with text {text:?}"))
            .await
    }

    async fn wait_for_text(&self, text: &str, timeout: Duration) -> Result<()> {
        let js = format!(
            "!!(document.body && document.body.innerText.includes('{}'))",
            sanitize_js_string(text)
        );
        self.poll_js_true(&js, timeout, &format!("text {text:?}")).await
    }

    async fn eval_string(&self, js: &str) -> Result<String> {
        self.eval(js).await
    }

    async fn snapshot(&self) -> Result<PageSnapshot> {
        #[derive(Deserialize)]
        struct RawSnapshot {
            html: String,
            text: String,
            frames: Vec<String>,
        }

        const SNAPSHOT_JS: &str = r#"(() => {
            const frames = [...document.querySelectorAll('iframe, frame')].map(f => {
                try {
                    return f.contentDocument && f.contentDocument.body
                        ? f.contentDocument.body.innerText
                        : '';
                } catch (e) {
                    return '';
                }
            });
            return {
                html: document.documentElement ? document.documentElement.outerHTML : '',
                text: document.body ? document.body.innerText : '',
                frames,
            };
        })()"#;

        let raw: RawSnapshot = self.eval(SNAPSHOT_JS).await?;
        Ok(PageSnapshot {
            html: raw.html,
            body_text: raw.text,
            frame_texts: raw.frames,
        })
    }

    async fn authenticate(&self, username: &str, password: &str) -> Result<()> {
        // CDP has no direct page.authenticate; intercept the auth challenge
        // via the Fetch domain and answer it with the proxy credentials.
        self.page
            .execute(
                EnableParams::builder()
                    .pattern(RequestPattern::builder().url_pattern("*").build())
                    .handle_auth_requests(true)
                    .build(),
            )
            .await
            .context("failed to enable request interception")?;

        let mut auth_events = self
            .page
            .event_listener::<EventAuthRequired>()
            .await
            .context("failed to listen for auth challenges")?;
        let page = self.page.clone();
        let user = username.to_string();
        let pass = password.to_string();
        tokio::spawn(async move {
            while let Some(event) = auth_events.next().await {
                let response = AuthChallengeResponse {
                    response: AuthChallengeResponseResponse::ProvideCredentials,
                    username: Some(user.clone()),
                    password: Some(pass.clone()),
                };
                let cmd = ContinueWithAuthParams::new(event.request_id.clone(), response);
                if let Err(e) = page.execute(cmd).await {
                    tracing::debug!(error = %e, "auth continuation failed");
                }
            }
        });

        // With interception enabled every request pauses; resume them.
        let mut paused_events = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .context("failed to listen for paused requests")?;
        let page = self.page.clone();
        tokio::spawn(async move {
            while let Some(event) = paused_events.next().await {
                let cmd = ContinueRequestParams::new(event.request_id.clone());
                if let Err(e) = page.execute(cmd).await {
                    tracing::trace!(error = %e, "request continuation failed");
                }
            }
        });

        Ok(())
    }

    async fn capture_checkpoint(&self, label: &str) -> Result<()> {
        let Some(dir) = &self.artifact_dir else {
            return Ok(());
        };
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let path = dir.join(format!("{label}.png"));
        self.page
            .save_screenshot(ScreenshotParams::builder().full_page(true).build(), &path)
            .await
            .with_context(|| format!("failed to capture {}", path.display()))?;
        tracing::debug!(path = %path.display(), "checkpoint captured");
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        let _ = self.page.close().await;
        self.browser
            .close()
            .await
            .context("failed to close browser")?;
        let _ = self.browser.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{extract_expiry, ExtractionResult, TodayStamp};
    use chrono::NaiveDate;

    #[test]
    fn launch_options_carry_proxy_arg() {
        let opts = LaunchOptions {
            headless: true,
            proxy_arg: Some("http://proxy.example:8080".to_string()),
            chromium_path: None,
            artifact_dir: None,
        };
        assert_eq!(opts.proxy_arg.as_deref(), Some("http://proxy.example:8080"));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn snapshot_feeds_the_extractor() {
        let panel = ChromiumPanel::launch(LaunchOptions {
            headless: true,
            proxy_arg: None,
            chromium_path: None,
            artifact_dir: None,
        })
        .await
        .expect("failed to launch");

        panel
            .navigate(
                "data:text/html,<table><tr><th>利用期限</th><td>2025/03/01</td></tr></table>",
            )
            .await
            .expect("navigation failed");

        let snapshot = panel.snapshot().await.expect("snapshot failed");
        let today = TodayStamp::from_date(NaiveDate::from_ymd_opt(2025, 6, 10).unwrap());
        assert_eq!(
            extract_expiry(&snapshot, &today),
            ExtractionResult::Found("2025/03/01".to_string())
        );

        Box::new(panel).close().await.expect("close failed");
    }
}
