//! End-to-end extract workflow.
//!
//! Stages run strictly in order, each feeding the next:
//!
//! 1. destination preflight under a directory lock (no network yet)
//! 2. catalog fetch
//! 3. candidate generation and filtering, single submission
//! 4. bounded wait for completion
//! 5. download and rename
//!
//! Any error aborts the run. Provider-named files may be left behind if the
//! process dies between download and rename.

use tracing::{info, instrument};

use crate::artifact::{ArtifactTargets, DestinationLock, MaterializedExtract, materialize};
use crate::catalog::{HttpSampleCatalog, SampleCatalog};
use crate::config::{ExtractJob, WorkflowConfig, api_key_from_env};
use crate::error::ExtractError;
use crate::extract::{
    ExtractService, ExtractStatus, IpumsApiClient, submit_extract, wait_for_extract,
};
use crate::http_client::build_http_client;
use crate::sample::generate_candidates;

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOutcome {
    /// Provider extract identifier, e.g. `cps:12`.
    pub extract: String,
    /// Number of samples included in the request.
    pub samples: usize,
    /// Final file paths.
    pub files: MaterializedExtract,
}

/// Runs the workflow against the given catalog and service.
///
/// # Errors
///
/// Returns the first [`ExtractError`] raised by any stage.
#[instrument(skip_all, fields(years = %job.years, stem = %job.stem, dest = %job.destination.display()))]
pub async fn run_extract(
    job: &ExtractJob,
    config: &WorkflowConfig,
    catalog: &dyn SampleCatalog,
    service: &dyn ExtractService,
    on_status: &(dyn Fn(&ExtractStatus) + Send + Sync),
) -> Result<ExtractOutcome, ExtractError> {
    let targets = ArtifactTargets::new(
        &job.destination,
        &config.collection,
        &job.stem,
        job.format,
    )?;
    targets.ensure_dir().await?;
    let _lock = DestinationLock::acquire(targets.dir())?;
    targets.preflight().await?;

    let valid = catalog.fetch().await?;
    let candidates = generate_candidates(&config.collection, job.years);

    let (request, handle) = submit_extract(
        service,
        &config.collection,
        &candidates,
        &valid,
        &job.variables,
        job.format,
    )
    .await?;
    let extract = handle.to_string();

    wait_for_extract(service, &handle, &config.wait, on_status).await?;
    let files = materialize(service, handle, &targets).await?;

    info!(%extract, samples = request.samples().len(), "extract complete");
    Ok(ExtractOutcome {
        extract,
        samples: request.samples().len(),
        files,
    })
}

/// Runs the workflow against the live IPUMS endpoints in `config`.
///
/// The API key is read from the environment before any request is made.
///
/// # Errors
///
/// [`ExtractError::Authentication`] if the key is missing, otherwise the
/// errors of [`run_extract`].
pub async fn run_with_ipums(
    job: &ExtractJob,
    config: &WorkflowConfig,
    on_status: &(dyn Fn(&ExtractStatus) + Send + Sync),
) -> Result<ExtractOutcome, ExtractError> {
    let api_key = api_key_from_env()?;
    let client = build_http_client(config.http_timeouts)?;
    let catalog = HttpSampleCatalog::new(client.clone(), &config.catalog_url, &config.collection);
    let service = IpumsApiClient::new(client, &config.api_base_url, api_key, config.api_version)?;
    run_extract(job, config, &catalog, &service, on_status).await
}
