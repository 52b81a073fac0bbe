//! Extract requests and the extract service boundary.
//!
//! An extract is a provider-generated subset of samples x variables. This
//! module builds the request from the filtered candidates, and defines the
//! [`ExtractService`] trait that hides the provider API behind three calls:
//! submit, status and download.
//!
//! # Architecture
//!
//! - [`ExtractRequest`] - validated request value, constructed once per run
//! - [`ExtractService`] - async trait implemented by [`IpumsApiClient`] and test fakes
//! - [`submit_extract`] - filter candidates, validate, submit exactly once
//! - [`wait_for_extract`] - bounded poll loop until the extract is ready

mod ipums;
mod waiter;

pub use ipums::{DEFAULT_API_BASE_URL, DEFAULT_API_VERSION, IpumsApiClient};
pub use waiter::{WaitPolicy, wait_for_extract};

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use tracing::{info, instrument};

use crate::catalog::ValidSampleSet;
use crate::error::ExtractError;
use crate::sample::SampleIdentifier;

/// Description attached to every submitted extract.
pub const DEFAULT_DESCRIPTION: &str = "CPS Extract for NEETs";

/// Output format of the extract data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataFormat {
    /// Fixed-width text (`.dat.gz`), the provider default.
    #[default]
    FixedWidth,
    /// Comma-separated values (`.csv.gz`).
    Csv,
    /// Stata (`.dta.gz`).
    Stata,
    /// SPSS (`.sav.gz`).
    Spss,
    /// SAS 9 (`.sas7bdat.gz`).
    Sas9,
}

impl DataFormat {
    /// Name used by the API.
    #[must_use]
    pub fn api_name(self) -> &'static str {
        match self {
            Self::FixedWidth => "fixed_width",
            Self::Csv => "csv",
            Self::Stata => "stata",
            Self::Spss => "spss",
            Self::Sas9 => "sas9",
        }
    }

    /// Extension of the downloaded data file, without the leading dot.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::FixedWidth => "dat.gz",
            Self::Csv => "csv.gz",
            Self::Stata => "dta.gz",
            Self::Spss => "sav.gz",
            Self::Sas9 => "sas7bdat.gz",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

impl FromStr for DataFormat {
    type Err = ExtractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fixed_width" | "dat" => Ok(Self::FixedWidth),
            "csv" => Ok(Self::Csv),
            "stata" | "dta" => Ok(Self::Stata),
            "spss" | "sav" => Ok(Self::Spss),
            "sas9" | "sas" => Ok(Self::Sas9),
            other => Err(ExtractError::validation(
                format!("unknown data format '{other}'"),
                "Use one of: fixed_width, csv, stata, spss, sas9",
            )),
        }
    }
}

/// A validated extract request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractRequest {
    collection: String,
    samples: Vec<SampleIdentifier>,
    variables: Vec<String>,
    data_format: DataFormat,
    description: String,
}

impl ExtractRequest {
    /// Builds a request, validating samples and variables.
    ///
    /// Variable names are trimmed and upper-cased; repeated names keep their
    /// first position.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Validation`] if `samples` is empty, or if
    /// `variables` is empty or contains a blank name.
    pub fn new(
        collection: impl Into<String>,
        samples: Vec<SampleIdentifier>,
        variables: &[String],
        data_format: DataFormat,
        description: impl Into<String>,
    ) -> Result<Self, ExtractError> {
        if samples.is_empty() {
            return Err(ExtractError::validation(
                "none of the requested samples exist in the IPUMS catalog",
                "Check the year range; recent months may not be released yet",
            ));
        }
        let variables = normalize_variables(variables)?;
        Ok(Self {
            collection: collection.into(),
            samples,
            variables,
            data_format,
            description: description.into(),
        })
    }

    /// Collection name, e.g. `cps`.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Samples in candidate order.
    #[must_use]
    pub fn samples(&self) -> &[SampleIdentifier] {
        &self.samples
    }

    /// Requested variable names.
    #[must_use]
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Requested data format.
    #[must_use]
    pub fn data_format(&self) -> DataFormat {
        self.data_format
    }

    /// Descriptive label shown on the provider's extract page.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

fn normalize_variables(variables: &[String]) -> Result<Vec<String>, ExtractError> {
    let mut normalized: Vec<String> = Vec::with_capacity(variables.len());
    for raw in variables {
        let name = raw.trim().to_ascii_uppercase();
        if name.is_empty() {
            return Err(ExtractError::validation(
                "variable list contains a blank name",
                "Pass variable mnemonics such as AGE,SEX,EMPSTAT",
            ));
        }
        if !normalized.contains(&name) {
            normalized.push(name);
        }
    }
    if normalized.is_empty() {
        return Err(ExtractError::validation(
            "no variables requested",
            "Pass at least one variable, e.g. --variables AGE",
        ));
    }
    Ok(normalized)
}

/// Handle of a submitted extract.
#[derive(Debug, PartialEq, Eq)]
pub struct ExtractHandle {
    collection: String,
    number: u64,
}

impl ExtractHandle {
    /// Creates a handle for extract `number` in `collection`.
    #[must_use]
    pub fn new(collection: impl Into<String>, number: u64) -> Self {
        Self {
            collection: collection.into(),
            number,
        }
    }

    /// Collection the extract belongs to.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Provider-assigned extract number.
    #[must_use]
    pub fn number(&self) -> u64 {
        self.number
    }
}

impl fmt::Display for ExtractHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collection, self.number)
    }
}

/// Processing state reported by the extract service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractStatus {
    /// Accepted, waiting for a worker.
    Queued,
    /// Being produced.
    Started,
    /// Data produced, download links not yet published.
    Produced,
    /// Ready for download.
    Completed,
    /// Processing failed.
    Failed,
    /// Canceled on the provider side.
    Canceled,
    /// Files were produced but have since expired.
    Expired,
    /// A status this client does not know; treated as still in progress.
    Other(String),
}

impl ExtractStatus {
    /// Parses a status string from the API.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Self::Queued,
            "started" => Self::Started,
            "produced" => Self::Produced,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "canceled" | "cancelled" => Self::Canceled,
            "expired" => Self::Expired,
            _ => Self::Other(value.to_string()),
        }
    }

    /// True once the extract can be downloaded.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// True if the extract will never become ready.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Canceled | Self::Expired)
    }
}

impl fmt::Display for ExtractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Produced => "produced",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
            Self::Expired => "expired",
            Self::Other(value) => value.as_str(),
        };
        f.write_str(label)
    }
}

/// Narrow interface to the remote extract-processing service.
///
/// Uses `async_trait` so the workflow can hold a `&dyn ExtractService`.
#[async_trait]
pub trait ExtractService: Send + Sync {
    /// Submits a request and returns its handle.
    async fn submit(&self, request: &ExtractRequest) -> Result<ExtractHandle, ExtractError>;

    /// Reports the current processing state of an extract.
    async fn status(&self, handle: &ExtractHandle) -> Result<ExtractStatus, ExtractError>;

    /// Downloads every file of a completed extract into `dir`.
    ///
    /// Files keep the provider's default names. Returns the written paths.
    async fn download(&self, handle: &ExtractHandle, dir: &Path)
    -> Result<Vec<PathBuf>, ExtractError>;
}

/// Filters `candidates` against `valid`, builds the request and submits it.
///
/// The service is not called when no candidate survives filtering.
///
/// # Errors
///
/// Returns [`ExtractError::Validation`] for an empty sample or variable
/// list, or whatever the service returns on submission.
#[instrument(skip_all, fields(collection = collection, candidates = candidates.len()))]
pub async fn submit_extract(
    service: &dyn ExtractService,
    collection: &str,
    candidates: &[SampleIdentifier],
    valid: &ValidSampleSet,
    variables: &[String],
    data_format: DataFormat,
) -> Result<(ExtractRequest, ExtractHandle), ExtractError> {
    let samples = valid.filter(candidates);
    info!(
        requested = candidates.len(),
        available = samples.len(),
        "filtered candidate samples against catalog"
    );
    let request = ExtractRequest::new(
        collection,
        samples,
        variables,
        data_format,
        DEFAULT_DESCRIPTION,
    )?;
    let handle = service.submit(&request).await?;
    info!(extract = %handle, "extract submitted");
    Ok((request, handle))
}
