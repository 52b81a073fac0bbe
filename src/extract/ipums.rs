//! IPUMS API client implementing [`ExtractService`].
//!
//! Talks to the IPUMS microdata extract API (version 2):
//!
//! - `POST {base}/extracts?collection=cps&version=2` submits a definition
//! - `GET {base}/extracts/{number}?collection=cps&version=2` reports status
//!   and, once completed, the download links
//! - each download link is fetched with the same `Authorization` header
//!
//! Download bodies are streamed to disk and checked against the published
//! SHA-256 when the API provides one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::{ExtractHandle, ExtractRequest, ExtractService, ExtractStatus};
use crate::error::ExtractError;

/// Production API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.ipums.org";

/// API version sent with every request.
pub const DEFAULT_API_VERSION: u32 = 2;

/// Longest provider error body echoed into an error message.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// HTTP client for the IPUMS extract API.
#[derive(Debug, Clone)]
pub struct IpumsApiClient {
    client: Client,
    base_url: Url,
    api_key: String,
    version: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtractResponse {
    number: u64,
    status: String,
    #[serde(default)]
    download_links: Option<DownloadLinks>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadLinks {
    data: Option<DownloadLink>,
    ddi_codebook: Option<DownloadLink>,
}

#[derive(Debug, Deserialize)]
struct DownloadLink {
    url: String,
    #[serde(default)]
    sha256: Option<String>,
}

impl IpumsApiClient {
    /// Creates a client against `base_url` using `api_key`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Validation`] if `base_url` is not a valid URL.
    pub fn new(
        client: Client,
        base_url: &str,
        api_key: impl Into<String>,
        version: u32,
    ) -> Result<Self, ExtractError> {
        let base_url = Url::parse(base_url.trim_end_matches('/')).map_err(|e| {
            ExtractError::validation(
                format!("invalid API base URL '{base_url}': {e}"),
                "Pass an absolute URL such as https://api.ipums.org",
            )
        })?;
        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
            version,
        })
    }

    fn endpoint(&self, collection: &str, number: Option<u64>) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        let path = match number {
            Some(number) => format!("{base_path}/extracts/{number}"),
            None => format!("{base_path}/extracts"),
        };
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .append_pair("collection", collection)
            .append_pair("version", &self.version.to_string());
        url
    }

    async fn fetch_extract(&self, handle: &ExtractHandle) -> Result<ExtractResponse, ExtractError> {
        let url = self.endpoint(handle.collection(), Some(handle.number()));
        let response = self
            .client
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .send()
            .await
            .map_err(|e| ExtractError::remote("status", e.to_string()))?;
        let response = check_status("status", response).await?;
        response
            .json::<ExtractResponse>()
            .await
            .map_err(|e| ExtractError::remote("status", format!("unreadable response: {e}")))
    }

    async fn download_link(
        &self,
        link: &DownloadLink,
        dir: &Path,
    ) -> Result<PathBuf, ExtractError> {
        let parsed = Url::parse(&link.url).map_err(|e| {
            ExtractError::remote("download", format!("invalid download URL {}: {e}", link.url))
        })?;
        let filename = filename_from_url(&parsed).ok_or_else(|| {
            ExtractError::remote("download", format!("download URL {} has no file name", link.url))
        })?;
        let file_path = dir.join(&filename);

        let response = self
            .client
            .get(parsed)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .send()
            .await
            .map_err(|e| ExtractError::remote("download", e.to_string()))?;
        let response = check_status("download", response).await?;

        let mut file = File::create(&file_path)
            .await
            .map_err(|e| ExtractError::io(&file_path, e))?;
        let streamed = stream_to_file(&mut file, response, &file_path).await;
        drop(file);
        let (bytes, digest) = match streamed {
            Ok(result) => result,
            Err(error) => {
                debug!(path = %file_path.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&file_path).await;
                return Err(error);
            }
        };

        if let Some(expected) = link.sha256.as_deref()
            && !expected.eq_ignore_ascii_case(&digest)
        {
            let _ = tokio::fs::remove_file(&file_path).await;
            return Err(ExtractError::remote(
                "download",
                format!(
                    "checksum mismatch for {filename}: expected {expected}, got {digest}"
                ),
            ));
        }

        info!(path = %file_path.display(), bytes, "extract file downloaded");
        Ok(file_path)
    }
}

#[async_trait]
impl ExtractService for IpumsApiClient {
    #[instrument(skip(self, request), fields(collection = request.collection(), samples = request.samples().len()))]
    async fn submit(&self, request: &ExtractRequest) -> Result<ExtractHandle, ExtractError> {
        let url = self.endpoint(request.collection(), None);
        let body = extract_definition(request);
        debug!(%url, "submitting extract definition");

        let response = self
            .client
            .post(url)
            .header(reqwest::header::AUTHORIZATION, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractError::remote("submit", e.to_string()))?;
        let response = check_status("submit", response).await?;
        let submitted = response
            .json::<ExtractResponse>()
            .await
            .map_err(|e| ExtractError::remote("submit", format!("unreadable response: {e}")))?;

        debug!(number = submitted.number, status = %submitted.status, "extract accepted");
        Ok(ExtractHandle::new(request.collection(), submitted.number))
    }

    #[instrument(skip(self), fields(extract = %handle))]
    async fn status(&self, handle: &ExtractHandle) -> Result<ExtractStatus, ExtractError> {
        let extract = self.fetch_extract(handle).await?;
        Ok(ExtractStatus::parse(&extract.status))
    }

    #[instrument(skip(self, dir), fields(extract = %handle, dest = %dir.display()))]
    async fn download(
        &self,
        handle: &ExtractHandle,
        dir: &Path,
    ) -> Result<Vec<PathBuf>, ExtractError> {
        let extract = self.fetch_extract(handle).await?;
        let status = ExtractStatus::parse(&extract.status);
        if !status.is_ready() {
            return Err(ExtractError::remote(
                "download",
                format!("extract {handle} is not ready (status: {status})"),
            ));
        }
        let links = extract.download_links.ok_or_else(|| {
            ExtractError::remote("download", format!("extract {handle} has no download links"))
        })?;
        let data = links.data.ok_or_else(|| {
            ExtractError::remote("download", format!("extract {handle} has no data file link"))
        })?;
        let ddi = links.ddi_codebook.ok_or_else(|| {
            ExtractError::remote("download", format!("extract {handle} has no DDI codebook link"))
        })?;

        let mut written = Vec::with_capacity(2);
        for link in [&data, &ddi] {
            written.push(self.download_link(link, dir).await?);
        }
        Ok(written)
    }
}

/// Builds the JSON extract definition for `request`.
fn extract_definition(request: &ExtractRequest) -> Value {
    let samples: Map<String, Value> = request
        .samples()
        .iter()
        .map(|sample| (sample.to_string(), json!({})))
        .collect();
    let variables: Map<String, Value> = request
        .variables()
        .iter()
        .map(|name| (name.clone(), json!({})))
        .collect();
    json!({
        "description": request.description(),
        "dataStructure": { "rectangular": { "on": "P" } },
        "dataFormat": request.data_format().api_name(),
        "samples": samples,
        "variables": variables,
    })
}

/// Maps non-success responses to typed errors.
async fn check_status(operation: &'static str, response: Response) -> Result<Response, ExtractError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return Err(ExtractError::credential_rejected(status.as_u16()));
    }
    let body = response.text().await.unwrap_or_default();
    let reason = provider_error_detail(&body)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());
    warn!(operation, status = status.as_u16(), %reason, "extract service returned an error");
    Err(ExtractError::remote_status(operation, status.as_u16(), reason))
}

/// Pulls the human-readable `detail` out of an IPUMS error body.
fn provider_error_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let detail = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => match value.get("detail") {
            Some(Value::String(detail)) => detail.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| item.as_str().map_or_else(|| item.to_string(), str::to_string))
                .collect::<Vec<_>>()
                .join("; "),
            _ => trimmed.to_string(),
        },
        Err(_) => trimmed.to_string(),
    };
    Some(detail.chars().take(MAX_ERROR_BODY_CHARS).collect())
}

/// Last path segment of `url`, rejecting anything that could escape the directory.
fn filename_from_url(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.next_back()?;
    let name = segment.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return None;
    }
    Some(name.to_string())
}

/// Streams the body to `file`, returning bytes written and the hex SHA-256.
async fn stream_to_file(
    file: &mut File,
    response: Response,
    file_path: &Path,
) -> Result<(u64, String), ExtractError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut hasher = Sha256::new();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| ExtractError::remote("download", e.to_string()))?;
        hasher.update(&chunk);
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| ExtractError::io(file_path, e))?;
        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| ExtractError::io(file_path, e))?;

    Ok((bytes_written, format!("{:x}", hasher.finalize())))
}
