//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use ipums_extract_core::catalog::DEFAULT_CATALOG_URL;
use ipums_extract_core::extract::DEFAULT_API_BASE_URL;
use ipums_extract_core::http_client::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_READ_TIMEOUT_SECS};
use ipums_extract_core::{DataFormat, ExtractJob, HttpTimeouts, WorkflowConfig, YearRange};

/// Default seconds between the first two status polls.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default overall wait budget in seconds (2 hours).
const DEFAULT_WAIT_TIMEOUT_SECS: u64 = 7200;

/// Request, wait for and download IPUMS CPS microdata extracts.
///
/// Builds every possible CPS sample id for the requested years, keeps the
/// ones IPUMS currently publishes, submits one extract and renames the
/// downloaded data and DDI files to `<name>.<ext>` and `<name>.xml`.
/// The API key is read from the IPUMS_API_KEY environment variable.
#[derive(Parser, Debug)]
#[command(name = "ipums-extract")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Survey year or inclusive range (2023, 2022-2023)
    #[arg(short, long)]
    pub years: YearRange,

    /// Variables to include, comma separated (AGE,SEX,EMPSTAT)
    #[arg(long, value_delimiter = ',', default_value = "AGE")]
    pub variables: Vec<String>,

    /// File name stem for the renamed data and DDI files
    #[arg(short, long)]
    pub name: String,

    /// Directory receiving the files (created if missing)
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Data format: fixed_width, csv, stata, spss or sas9
    #[arg(short, long, default_value = "fixed_width")]
    pub format: DataFormat,

    /// Seconds before the second status poll; later polls back off up to 30s (1-30)
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_SECS, value_parser = clap::value_parser!(u64).range(1..=30))]
    pub poll_interval: u64,

    /// Give up waiting for the extract after this many seconds (0 waits forever)
    #[arg(long, default_value_t = DEFAULT_WAIT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// HTTP connect timeout in seconds (1-3600)
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: u64,

    /// HTTP read timeout in seconds (1-3600)
    #[arg(long, default_value_t = DEFAULT_READ_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout: u64,

    /// Page listing valid sample ids
    #[arg(long, default_value = DEFAULT_CATALOG_URL)]
    pub catalog_url: String,

    /// IPUMS API root
    #[arg(long, default_value = DEFAULT_API_BASE_URL)]
    pub api_url: String,
}

impl Args {
    /// Per-run inputs.
    pub fn job(&self) -> ExtractJob {
        ExtractJob {
            years: self.years,
            variables: self.variables.clone(),
            stem: self.name.clone(),
            destination: self.output_dir.clone(),
            format: self.format,
        }
    }

    /// Workflow settings with CLI overrides applied over the defaults.
    pub fn workflow_config(&self) -> WorkflowConfig {
        let defaults = WorkflowConfig::default();
        let timeout = (self.timeout > 0).then(|| Duration::from_secs(self.timeout));
        WorkflowConfig {
            catalog_url: self.catalog_url.clone(),
            api_base_url: self.api_url.clone(),
            http_timeouts: HttpTimeouts {
                connect_secs: self.connect_timeout,
                read_secs: self.read_timeout,
            },
            wait: defaults
                .wait
                .clone()
                .with_initial_interval(Duration::from_secs(self.poll_interval))
                .with_timeout(timeout),
            ..defaults
        }
    }
}
