// Copyright 2026 VPS Keeper Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use vps_keeper::cli;

#[derive(Parser)]
#[command(
    name = "vpskeeper",
    about = "VPS Keeper — unattended renewal for the Xserver free VPS panel",
    version,
    after_help = "Credentials come from the environment: EMAIL, PASSWORD, and optionally PROXY_SERVER."
)]
struct Cli {
    /// Enable verbose/debug logging
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the renewal workflow once
    Run {
        /// Where to write the status report
        #[arg(long, default_value = "README.md")]
        report: PathBuf,
        /// Launch the browser with a visible window
        #[arg(long)]
        headful: bool,
        /// Skip checkpoint screenshots and debug artifacts
        #[arg(long)]
        no_recording: bool,
    },
    /// Check environment readiness (Chromium, credentials, proxy, solver)
    Doctor,
    /// Show recent run records
    History {
        /// Maximum number of records to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let result = match cli.command {
        Commands::Run {
            report,
            headful,
            no_recording,
        } => cli::run_cmd::run(report, headful, no_recording).await,
        Commands::Doctor => cli::doctor::run().await,
        Commands::History { limit } => cli::history_cmd::run(limit),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "vpskeeper", &mut std::io::stdout());
            Ok(())
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    result
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "vps_keeper=debug,vpskeeper=debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
