//! `vpskeeper history` — show recent run records.

use crate::history::RunHistory;
use anyhow::Result;

pub fn run(limit: usize) -> Result<()> {
    let history = RunHistory::open_default();
    let records = history.recent(limit)?;

    if records.is_empty() {
        println!("No recorded runs yet.");
        return Ok(());
    }

    for record in records {
        println!(
            "{}  {:<7}  expiry {:<12}  {:>6} ms  {}",
            record.timestamp, record.status, record.old_expiry, record.duration_ms, record.run_id
        );
    }
    Ok(())
}
