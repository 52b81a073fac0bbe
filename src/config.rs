//! Workflow configuration and per-run job description.

use std::path::PathBuf;

use crate::catalog::DEFAULT_CATALOG_URL;
use crate::error::ExtractError;
use crate::extract::{DEFAULT_API_BASE_URL, DEFAULT_API_VERSION, DataFormat, WaitPolicy};
use crate::http_client::HttpTimeouts;
use crate::sample::{CPS_COLLECTION, YearRange};

/// Environment variable holding the IPUMS API key.
pub const API_KEY_ENV: &str = "IPUMS_API_KEY";

/// Settings shared by every run; defaults target the production IPUMS CPS
/// endpoints.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    /// Collection prefix used for ids and default file names.
    pub collection: String,
    /// Page listing valid sample ids.
    pub catalog_url: String,
    /// Extract API root.
    pub api_base_url: String,
    /// Extract API version.
    pub api_version: u32,
    /// HTTP timeouts for every request.
    pub http_timeouts: HttpTimeouts,
    /// Poll pacing and overall wait budget.
    pub wait: WaitPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            collection: CPS_COLLECTION.to_string(),
            catalog_url: DEFAULT_CATALOG_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_version: DEFAULT_API_VERSION,
            http_timeouts: HttpTimeouts::default(),
            wait: WaitPolicy::default(),
        }
    }
}

/// Inputs of a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractJob {
    /// Survey years to include.
    pub years: YearRange,
    /// Variable mnemonics to request.
    pub variables: Vec<String>,
    /// Final file name stem.
    pub stem: String,
    /// Directory receiving the files.
    pub destination: PathBuf,
    /// Data file format.
    pub format: DataFormat,
}

/// Reads the API key from [`API_KEY_ENV`].
///
/// # Errors
///
/// Returns [`ExtractError::Authentication`] if the variable is unset or blank.
pub fn api_key_from_env() -> Result<String, ExtractError> {
    api_key_from(std::env::var(API_KEY_ENV).ok())
}

fn api_key_from(value: Option<String>) -> Result<String, ExtractError> {
    value
        .map(|key| key.trim().to_string())
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ExtractError::missing_api_key(API_KEY_ENV))
}
