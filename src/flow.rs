//! The renewal workflow: a linear stage sequence with one unconditional
//! finalization block.
//!
//! `Login → ExpiryCheck → RenewalTrigger → Challenge → Confirm`, where only
//! the login and post-expiry stages can fail the run. The expiry check is
//! best-effort telemetry by contract -- it records whatever the extractor
//! produced and can never abort the workflow. Whatever happens, the
//! finalizer writes the report, appends the history record, and releases the
//! browser.

use crate::browser::PanelPage;
use crate::config::Config;
use crate::extract::{extract_with_retry, TodayStamp};
use crate::history::{RunHistory, RunRecord};
use crate::report;
use crate::solver::{self, SolverClient};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Panel login entry point.
pub const LOGIN_URL: &str = "https://secure.xserver.ne.jp/xapanel/login/xvps/";

const MEMBER_ID_SELECTOR: &str = "#memberid";
const PASSWORD_SELECTOR: &str = "#user_password";
const LOGIN_BUTTON_TEXT: &str = "ログインする";
const DETAIL_LINK_SELECTOR: &str = r#"a[href^="/xapanel/xvps/server/detail?id="]"#;
const RENEW_LINK_TEXT: &str = "更新する";
const CONTINUE_PROMPT_TEXT: &str = "引き続き無料VPSの利用を継続する";
const CHALLENGE_IMAGE_JS: &str = r#"document.querySelector('img[src^="data:"]').src"#;
const CHALLENGE_INPUT_SELECTOR: &str = r#"[placeholder="上の画像の数字を入力"]"#;
const CONFIRM_BUTTON_TEXT: &str = "無料VPSの利用を継続する";

/// Settle delay after the confirmation action and before browser release.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Placeholder for an expiry that was never captured.
pub const UNKNOWN_EXPIRY: &str = "Unknown";

/// Binary run outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_success(self) -> bool {
        self == RunStatus::Success
    }

    /// Report glyph.
    pub fn glyph(self) -> &'static str {
        match self {
            RunStatus::Success => "✅ Success",
            RunStatus::Failed => "❌ Failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Success => f.write_str("Success"),
            RunStatus::Failed => f.write_str("Failed"),
        }
    }
}

/// Mutable state of one run, owned by the workflow for the process lifetime.
///
/// `old_expiry` is assigned at most once, by the extractor's result;
/// `status` transitions `Failed → Success` only after the confirmation
/// settle completes.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub old_expiry: String,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            status: RunStatus::Failed,
            old_expiry: UNKNOWN_EXPIRY.to_string(),
        }
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Workflow checkpoints, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Login,
    ExpiryCheck,
    RenewalTrigger,
    Challenge,
    Confirm,
}

impl Stage {
    fn checkpoint_label(self) -> &'static str {
        match self {
            Stage::Login => "01-login",
            Stage::ExpiryCheck => "02-expiry",
            Stage::RenewalTrigger => "03-renewal",
            Stage::Challenge => "04-challenge",
            Stage::Confirm => "05-confirm",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Login => f.write_str("login"),
            Stage::ExpiryCheck => f.write_str("expiry-check"),
            Stage::RenewalTrigger => f.write_str("renewal-trigger"),
            Stage::Challenge => f.write_str("challenge"),
            Stage::Confirm => f.write_str("confirm"),
        }
    }
}

/// Which fallible stage aborted the run. The expiry check has no variant:
/// it cannot fail the run by contract.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("login failed: {0}")]
    Login(#[source] anyhow::Error),
    #[error("renewal navigation failed: {0}")]
    Renewal(#[source] anyhow::Error),
    #[error("challenge solving failed: {0}")]
    Challenge(#[source] anyhow::Error),
    #[error("renewal confirmation failed: {0}")]
    Confirm(#[source] anyhow::Error),
}

/// Per-run options.
pub struct RunOptions {
    /// Where the report artifact is written.
    pub report_path: PathBuf,
    /// Debug artifacts (challenge image); `None` disables.
    pub artifact_dir: Option<PathBuf>,
    /// History location override; default `~/.vpskeeper/history.jsonl`.
    pub history_path: Option<PathBuf>,
    /// Settle delay after confirmation and before browser release.
    pub settle_delay: Duration,
}

impl RunOptions {
    pub fn new(report_path: PathBuf) -> Self {
        Self {
            report_path,
            artifact_dir: None,
            history_path: None,
            settle_delay: SETTLE_DELAY,
        }
    }
}

/// Run the whole workflow and finalize, returning the terminal context.
///
/// Every exit path flows through the finalizer: report write, history
/// append, settle delay, browser release. Report and history failures are
/// logged and must never prevent the release.
pub async fn execute(
    page: Box<dyn PanelPage>,
    config: &Config,
    solver: &SolverClient,
    opts: &RunOptions,
) -> RunContext {
    let mut ctx = RunContext::new();
    tracing::info!(run_id = %ctx.run_id, "starting renewal run");

    match run_flow(page.as_ref(), config, solver, opts, &mut ctx).await {
        Ok(()) => {
            tracing::info!(expiry = %ctx.old_expiry, "renewal confirmed");
        }
        Err(e) => {
            ctx.status = RunStatus::Failed;
            tracing::error!(error = %e, "run aborted");
        }
    }

    finalize(page, &ctx, opts).await;
    ctx
}

async fn run_flow(
    page: &dyn PanelPage,
    config: &Config,
    solver: &SolverClient,
    opts: &RunOptions,
    ctx: &mut RunContext,
) -> Result<(), FlowError> {
    login(page, config).await.map_err(FlowError::Login)?;
    checkpoint(page, Stage::Login).await;

    // Best-effort telemetry; cannot fail the run.
    let today = TodayStamp::now();
    let result = extract_with_retry(page, &today).await;
    tracing::info!(stage = %Stage::ExpiryCheck, expiry = %result, "previous expiry captured");
    ctx.old_expiry = result.to_string();
    checkpoint(page, Stage::ExpiryCheck).await;

    trigger_renewal(page).await.map_err(FlowError::Renewal)?;
    checkpoint(page, Stage::RenewalTrigger).await;

    solve_challenge(page, solver, opts.artifact_dir.as_deref())
        .await
        .map_err(FlowError::Challenge)?;
    checkpoint(page, Stage::Challenge).await;

    confirm(page, opts.settle_delay)
        .await
        .map_err(FlowError::Confirm)?;
    checkpoint(page, Stage::Confirm).await;

    ctx.status = RunStatus::Success;
    Ok(())
}

async fn login(page: &dyn PanelPage, config: &Config) -> Result<()> {
    tracing::info!(stage = %Stage::Login, url = LOGIN_URL, "authenticating");
    if let Some(proxy) = &config.proxy {
        if let Some((user, pass)) = &proxy.credentials {
            page.authenticate(user, pass).await?;
        }
    }
    page.navigate(LOGIN_URL).await?;
    page.fill(MEMBER_ID_SELECTOR, &config.email).await?;
    page.fill(PASSWORD_SELECTOR, &config.password).await?;
    page.click_text(LOGIN_BUTTON_TEXT).await?;
    page.wait_for_navigation().await?;
    Ok(())
}

async fn trigger_renewal(page: &dyn PanelPage) -> Result<()> {
    tracing::info!(stage = %Stage::RenewalTrigger, "entering renewal flow");
    page.click_selector(DETAIL_LINK_SELECTOR).await?;
    page.click_text(RENEW_LINK_TEXT).await?;
    page.click_text(CONTINUE_PROMPT_TEXT).await?;
    page.wait_for_navigation().await?;
    Ok(())
}

async fn solve_challenge(
    page: &dyn PanelPage,
    solver: &SolverClient,
    artifact_dir: Option<&Path>,
) -> Result<()> {
    tracing::info!(stage = %Stage::Challenge, "reading challenge image");
    let data_uri = page.eval_string(CHALLENGE_IMAGE_JS).await?;

    if let Some(dir) = artifact_dir {
        save_challenge_artifact(dir, &data_uri);
    }

    let code = solver.solve(&data_uri).await?;
    tracing::info!(stage = %Stage::Challenge, digits = code.len(), "challenge decoded");
    page.fill(CHALLENGE_INPUT_SELECTOR, &code).await?;
    Ok(())
}

async fn confirm(page: &dyn PanelPage, settle_delay: Duration) -> Result<()> {
    tracing::info!(stage = %Stage::Confirm, "submitting confirmation");
    page.click_text(CONFIRM_BUTTON_TEXT).await?;
    // Give the panel time to apply the renewal server-side.
    tokio::time::sleep(settle_delay).await;
    Ok(())
}

/// Terminal sequence, run once on every exit path. Must not abort the
/// browser release.
async fn finalize(page: Box<dyn PanelPage>, ctx: &RunContext, opts: &RunOptions) {
    if let Err(e) = report::write_report(&opts.report_path, ctx) {
        tracing::error!(error = %e, "failed to write report");
    }

    let history = match &opts.history_path {
        Some(path) => RunHistory::open(path.clone()),
        None => RunHistory::open_default(),
    };
    if let Err(e) = history.append(&RunRecord::from_context(ctx)) {
        tracing::warn!(error = %e, "failed to append run history");
    }

    if let Err(e) = page.capture_checkpoint("99-final").await {
        tracing::debug!(error = %e, "final checkpoint failed");
    }
    tokio::time::sleep(opts.settle_delay).await;

    if let Err(e) = page.close().await {
        tracing::warn!(error = %e, "browser shutdown reported an error");
    }
}

async fn checkpoint(page: &dyn PanelPage, stage: Stage) {
    if let Err(e) = page.capture_checkpoint(stage.checkpoint_label()).await {
        tracing::debug!(stage = %stage, error = %e, "checkpoint capture failed");
    }
}

fn save_challenge_artifact(dir: &Path, data_uri: &str) {
    let bytes = match solver::decode_data_uri(data_uri) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!(error = %e, "challenge image is not a decodable data URI");
            return;
        }
    };
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::debug!(error = %e, "could not create artifact directory");
        return;
    }
    let path = dir.join("challenge.png");
    if let Err(e) = std::fs::write(&path, bytes) {
        tracing::debug!(error = %e, "could not save challenge image");
    } else {
        tracing::debug!(path = %path.display(), "challenge image saved");
    }
}
