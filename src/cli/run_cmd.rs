//! `vpskeeper run` — execute the renewal workflow once.

use crate::browser::chromium::{ChromiumPanel, LaunchOptions};
use crate::config::Config;
use crate::flow::{self, RunOptions};
use crate::solver::SolverClient;
use anyhow::{bail, Result};
use std::path::PathBuf;

/// Run the workflow. Returns an error when the run finished with status
/// Failed so the process exits non-zero; cleanup has already completed by
/// then.
pub async fn run(report: PathBuf, headful: bool, no_recording: bool) -> Result<()> {
    let config = Config::from_env()?;
    let solver = SolverClient::new(config.solver_url.clone());

    let artifact_dir = if no_recording {
        None
    } else {
        Some(PathBuf::from("artifacts"))
    };

    let mut opts = RunOptions::new(report);
    opts.artifact_dir = artifact_dir.clone();

    let panel = ChromiumPanel::launch(LaunchOptions {
        headless: !headful,
        proxy_arg: config.proxy.as_ref().map(|p| p.launch_arg.clone()),
        chromium_path: config.chromium_path.clone(),
        artifact_dir,
    })
    .await?;

    let ctx = flow::execute(Box::new(panel), &config, &solver, &opts).await;
    tracing::info!(status = %ctx.status, expiry = %ctx.old_expiry, "run complete");

    if !ctx.status.is_success() {
        bail!("renewal run finished with status Failed — see the report and logs");
    }
    Ok(())
}
