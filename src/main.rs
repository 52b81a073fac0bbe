//! CLI entry point for the ipums-extract tool.

use std::io::{self, IsTerminal};

use anyhow::Result;
use clap::Parser;
use ipums_extract_core::run_with_ipums;
use tracing::{debug, info};

mod cli;
mod progress;

use cli::Args;
use progress::StatusSpinner;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    // Stdout is reserved for the final file paths
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let job = args.job();
    let config = args.workflow_config();
    info!(
        years = %job.years,
        variables = ?job.variables,
        dest = %job.destination.display(),
        "Requesting CPS extract"
    );

    let spinner = StatusSpinner::new(progress::should_use_spinner(
        io::stderr().is_terminal(),
        args.quiet,
        progress::is_dumb_terminal(),
    ));
    let on_status = |status: &ipums_extract_core::ExtractStatus| {
        debug!(%status, "extract status");
        spinner.update(status);
    };

    let result = run_with_ipums(&job, &config, &on_status).await;
    spinner.finish();
    let outcome = result?;

    info!(
        extract = %outcome.extract,
        samples = outcome.samples,
        "Extract saved"
    );
    println!("{}", outcome.files.data.display());
    println!("{}", outcome.files.ddi.display());

    Ok(())
}
