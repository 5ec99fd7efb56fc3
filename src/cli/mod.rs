//! CLI subcommand implementations for the vpskeeper binary.

pub mod doctor;
pub mod history_cmd;
pub mod run_cmd;
