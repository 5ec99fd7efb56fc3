//! Human-readable run report, overwritten on every run.
//!
//! The report is the only state that outlives a run: timestamp (fixed UTC+8
//! offset), service-identity label, status glyph, the prior expiry that was
//! captured, and a `renewed` marker on success.

use crate::flow::RunContext;
use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Utc};
use std::path::Path;

/// Fixed service-identity label shown in the report.
pub const SERVICE_LABEL: &str = "🇯🇵 Xserver (VPS)";

/// Report timestamps use a fixed UTC+8 offset.
const REPORT_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Write the report for a finished run, replacing any previous one.
pub fn write_report(path: &Path, ctx: &RunContext) -> Result<()> {
    let content = render(ctx, Utc::now());
    std::fs::write(path, content)
        .with_context(|| format!("failed to write report to {}", path.display()))
}

fn render(ctx: &RunContext, now: DateTime<Utc>) -> String {
    let offset = FixedOffset::east_opt(REPORT_UTC_OFFSET_SECS).expect("UTC+8 is a valid offset");
    let stamp = now.with_timezone(&offset).format("%Y-%m-%d %H:%M:%S");

    let mut out = format!(
        "**Last run**: `{stamp}`\n\
         \n\
         **Result**: <br>\n\
         🖥️ Server: `{SERVICE_LABEL}`<br>\n\
         📊 Renewal: {}<br>\n\
         🕛️ Previous expiry: `{}`<br>\n",
        ctx.status.glyph(),
        ctx.old_expiry
    );
    if ctx.status.is_success() {
        out.push_str("🕡️ New expiry: `renewed`<br>\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::RunStatus;
    use chrono::TimeZone;

    fn ctx(status: RunStatus, expiry: &str) -> RunContext {
        let mut ctx = RunContext::new();
        ctx.status = status;
        ctx.old_expiry = expiry.to_string();
        ctx
    }

    #[test]
    fn timestamp_is_shifted_to_utc_plus_8() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 20, 30, 0).unwrap();
        let report = render(&ctx(RunStatus::Success, "2025/03/01"), now);
        assert!(report.contains("`2025-06-11 04:30:00`"));
    }

    #[test]
    fn success_report_carries_renewed_marker() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let report = render(&ctx(RunStatus::Success, "2025/03/01"), now);
        assert!(report.contains("✅ Success"));
        assert!(report.contains("`2025/03/01`"));
        assert!(report.contains("`renewed`"));
        assert!(report.contains(SERVICE_LABEL));
    }

    #[test]
    fn failed_report_omits_renewed_marker() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let report = render(&ctx(RunStatus::Failed, "Unknown"), now);
        assert!(report.contains("❌ Failed"));
        assert!(report.contains("`Unknown`"));
        assert!(!report.contains("renewed"));
    }

    #[test]
    fn report_file_is_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("README.md");

        write_report(&path, &ctx(RunStatus::Failed, "Unknown")).unwrap();
        write_report(&path, &ctx(RunStatus::Success, "2025/03/01")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("✅ Success"));
        assert!(!content.contains("❌ Failed"));
    }
}
