//! Append-only JSONL history of past runs.
//!
//! One record per run at `~/.vpskeeper/history.jsonl`. History is telemetry:
//! failures to write it never affect the run outcome.

use crate::flow::{RunContext, RunStatus};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// A single recorded run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    /// RFC 3339 completion timestamp.
    pub timestamp: String,
    pub status: RunStatus,
    pub old_expiry: String,
    pub duration_ms: u64,
}

impl RunRecord {
    pub fn from_context(ctx: &RunContext) -> Self {
        let duration_ms = Utc::now()
            .signed_duration_since(ctx.started_at)
            .num_milliseconds()
            .max(0) as u64;
        Self {
            run_id: ctx.run_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            status: ctx.status,
            old_expiry: ctx.old_expiry.clone(),
            duration_ms,
        }
    }
}

/// JSONL-backed run history.
pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn open(path: PathBuf) -> Self {
        Self { path }
    }

    /// History at the default location, `~/.vpskeeper/history.jsonl`.
    pub fn open_default() -> Self {
        let path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".vpskeeper")
            .join("history.jsonl");
        Self::open(path)
    }

    /// Append one record, creating the parent directory on first use.
    pub fn append(&self, record: &RunRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open history at {}", self.path.display()))?;
        let json = serde_json::to_string(record)?;
        writeln!(file, "{json}").context("failed to append history record")?;
        Ok(())
    }

    /// The most recent `n` records, oldest first. Unparseable lines are
    /// skipped; a missing file yields an empty list.
    pub fn recent(&self, n: usize) -> Result<Vec<RunRecord>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to read history at {}", self.path.display())
                })
            }
        };

        let records: Vec<RunRecord> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        let skip = records.len().saturating_sub(n);
        Ok(records.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: RunStatus, expiry: &str) -> RunRecord {
        RunRecord {
            run_id: "test".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            status,
            old_expiry: expiry.to_string(),
            duration_ms: 1200,
        }
    }

    #[test]
    fn append_and_recent_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunHistory::open(dir.path().join("history.jsonl"));

        history.append(&record(RunStatus::Failed, "Unknown")).unwrap();
        history.append(&record(RunStatus::Success, "2025/03/01")).unwrap();

        let records = history.recent(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].status, RunStatus::Success);
        assert_eq!(records[1].old_expiry, "2025/03/01");
    }

    #[test]
    fn recent_caps_at_requested_count() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunHistory::open(dir.path().join("history.jsonl"));
        for i in 0..5 {
            history.append(&record(RunStatus::Success, &format!("2025/0{}/01", i + 1))).unwrap();
        }

        let records = history.recent(2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].old_expiry, "2025/05/01");
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = RunHistory::open(dir.path().join("absent.jsonl"));
        assert!(history.recent(10).unwrap().is_empty());
    }
}
