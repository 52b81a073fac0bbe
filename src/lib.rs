//! IPUMS Extract Core Library
//!
//! This library requests CPS microdata extracts from the IPUMS API, waits
//! for them to be produced, downloads them and renames the files to a
//! caller-chosen name.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`sample`] - Sample identifiers, year ranges and candidate generation
//! - [`catalog`] - Live list of valid sample identifiers
//! - [`extract`] - Extract requests, the service boundary and the poll loop
//! - [`artifact`] - Destination checks, locking, download and renaming
//! - [`workflow`] - The end-to-end run tying the stages together
//! - [`config`] - Workflow settings and per-run job inputs
//! - [`error`] - The shared error type

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod artifact;
pub mod catalog;
pub mod config;
pub mod error;
pub mod extract;
pub mod http_client;
pub mod sample;
mod user_agent;
pub mod workflow;

// Re-export commonly used types
pub use artifact::{ArtifactTargets, DestinationLock, MaterializedExtract};
pub use catalog::{HttpSampleCatalog, SampleCatalog, ValidSampleSet, extract_sample_ids};
pub use config::{API_KEY_ENV, ExtractJob, WorkflowConfig, api_key_from_env};
pub use error::{ErrorKind, ExtractError};
pub use extract::{
    DataFormat, ExtractHandle, ExtractRequest, ExtractService, ExtractStatus, IpumsApiClient,
    WaitPolicy, submit_extract, wait_for_extract,
};
pub use http_client::{HttpTimeouts, build_http_client};
pub use sample::{SampleIdentifier, YearRange, generate_candidates};
pub use workflow::{ExtractOutcome, run_extract, run_with_ipums};
