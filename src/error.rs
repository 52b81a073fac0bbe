//! Error types for the extract workflow.
//!
//! Every stage of the workflow reports failures through [`ExtractError`].
//! Variants carry the context needed to act on them (URL, path, status),
//! and user-fixable failures end with a `Suggestion:` line.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of an [`ExtractError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or rejected API credential.
    Authentication,
    /// The sample catalog could not be fetched.
    Network,
    /// Caller input or derived request is invalid.
    Validation,
    /// The extract service rejected or failed the extract.
    RemoteService,
    /// The wait for the extract exceeded its time budget.
    Cancelled,
    /// A target file already exists in the destination.
    FileExists,
    /// More than one default-named file could be the artifact.
    AmbiguousArtifact,
    /// Local filesystem failure (includes missing artifacts and busy destinations).
    Filesystem,
}

/// Errors that can occur while requesting and materializing an extract.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The API key is missing or was rejected by the provider.
    #[error("[AUTH] {message}\n  Suggestion: {suggestion}")]
    Authentication {
        /// What went wrong.
        message: String,
        /// How to fix it.
        suggestion: &'static str,
    },

    /// Catalog fetch failed at the network level.
    #[error("network error fetching sample catalog {url}: {source}")]
    Network {
        /// Catalog URL.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The shared HTTP client could not be constructed.
    #[error("HTTP client construction failed: {reason}")]
    ClientSetup {
        /// Why construction failed.
        reason: String,
    },

    /// Catalog endpoint answered with a non-success status.
    #[error("HTTP {status} fetching sample catalog {url}")]
    CatalogStatus {
        /// Catalog URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Invalid input or an empty derived request.
    #[error("invalid extract request: {reason}\n  Suggestion: {suggestion}")]
    Validation {
        /// What is invalid.
        reason: String,
        /// How to fix it.
        suggestion: String,
    },

    /// The extract service reported a failure.
    #[error("extract service error during {operation}: {reason}")]
    RemoteService {
        /// Which service operation failed (submit, status, download).
        operation: &'static str,
        /// Provider message or local description.
        reason: String,
        /// HTTP status, when the failure came from a response.
        status: Option<u16>,
    },

    /// Waiting for the extract exceeded the configured timeout.
    #[error(
        "gave up waiting for extract {extract} after {waited_secs}s (last status: {last_status})\n  Suggestion: Raise --timeout or download the extract later from the IPUMS website"
    )]
    Cancelled {
        /// Extract identifier.
        extract: String,
        /// Seconds spent waiting.
        waited_secs: u64,
        /// Last status reported by the service.
        last_status: String,
    },

    /// A target file already exists.
    #[error(
        "refusing to overwrite existing file {path}\n  Suggestion: Choose a different --name or remove the existing file"
    )]
    FileExists {
        /// The colliding path.
        path: PathBuf,
    },

    /// More than one default-named file matches an artifact pattern.
    #[error(
        "ambiguous {artifact} artifact in {dir}: {count} files match {pattern}\n  Suggestion: Remove leftover files from previous runs"
    )]
    AmbiguousArtifact {
        /// Which artifact (data or DDI).
        artifact: &'static str,
        /// Directory searched.
        dir: PathBuf,
        /// Pattern used for matching.
        pattern: String,
        /// Number of matching files.
        count: usize,
    },

    /// No default-named file matched after download.
    #[error("no {artifact} artifact matching {pattern} found in {dir}")]
    MissingArtifact {
        /// Which artifact (data or DDI).
        artifact: &'static str,
        /// Directory searched.
        dir: PathBuf,
        /// Pattern used for matching.
        pattern: String,
    },

    /// Another invocation holds the destination lock.
    #[error(
        "destination {dir} is in use by another extract run\n  Suggestion: Wait for the other run to finish or choose a different --output-dir"
    )]
    DestinationBusy {
        /// Locked directory.
        dir: PathBuf,
    },

    /// Filesystem error (create, rename, write).
    #[error("IO error at {path}: {source}")]
    Filesystem {
        /// Path where the error occurred.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl ExtractError {
    /// Returns the coarse category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::Network { .. } | Self::CatalogStatus { .. } | Self::ClientSetup { .. } => {
                ErrorKind::Network
            }
            Self::Validation { .. } => ErrorKind::Validation,
            Self::RemoteService { .. } => ErrorKind::RemoteService,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::FileExists { .. } => ErrorKind::FileExists,
            Self::AmbiguousArtifact { .. } => ErrorKind::AmbiguousArtifact,
            Self::MissingArtifact { .. }
            | Self::DestinationBusy { .. }
            | Self::Filesystem { .. } => ErrorKind::Filesystem,
        }
    }

    /// Creates an error for a missing API key.
    pub fn missing_api_key(var: &str) -> Self {
        Self::Authentication {
            message: format!("environment variable {var} is not set"),
            suggestion: "Export your IPUMS API key, e.g. `export IPUMS_API_KEY=...`.",
        }
    }

    /// Creates an error for a credential rejected by the provider.
    pub fn credential_rejected(status: u16) -> Self {
        Self::Authentication {
            message: format!("IPUMS API rejected the API key (HTTP {status})"),
            suggestion: "Check that IPUMS_API_KEY holds a valid, active key.",
        }
    }

    /// Creates a catalog network error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP client construction error.
    pub fn client_setup(reason: impl Into<String>) -> Self {
        Self::ClientSetup {
            reason: reason.into(),
        }
    }

    /// Creates a catalog status error.
    pub fn catalog_status(url: impl Into<String>, status: u16) -> Self {
        Self::CatalogStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a validation error.
    pub fn validation(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a remote service error without an HTTP status.
    pub fn remote(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::RemoteService {
            operation,
            reason: reason.into(),
            status: None,
        }
    }

    /// Creates a remote service error from an HTTP status response.
    pub fn remote_status(operation: &'static str, status: u16, reason: impl Into<String>) -> Self {
        Self::RemoteService {
            operation,
            reason: reason.into(),
            status: Some(status),
        }
    }

    /// Creates a wait-timeout error.
    pub fn cancelled(extract: impl Into<String>, waited_secs: u64, last_status: impl Into<String>) -> Self {
        Self::Cancelled {
            extract: extract.into(),
            waited_secs,
            last_status: last_status.into(),
        }
    }

    /// Creates a file-exists error.
    pub fn file_exists(path: impl Into<PathBuf>) -> Self {
        Self::FileExists { path: path.into() }
    }

    /// Creates an ambiguous-artifact error.
    pub fn ambiguous(
        artifact: &'static str,
        dir: impl Into<PathBuf>,
        pattern: impl Into<String>,
        count: usize,
    ) -> Self {
        Self::AmbiguousArtifact {
            artifact,
            dir: dir.into(),
            pattern: pattern.into(),
            count,
        }
    }

    /// Creates a missing-artifact error.
    pub fn missing_artifact(
        artifact: &'static str,
        dir: impl Into<PathBuf>,
        pattern: impl Into<String>,
    ) -> Self {
        Self::MissingArtifact {
            artifact,
            dir: dir.into(),
            pattern: pattern.into(),
        }
    }

    /// Creates a destination-busy error.
    pub fn destination_busy(dir: impl Into<PathBuf>) -> Self {
        Self::DestinationBusy { dir: dir.into() }
    }

    /// Creates a filesystem error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs a
// URL or path the source error does not carry.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_names_variable() {
        let error = ExtractError::missing_api_key("IPUMS_API_KEY");
        let msg = error.to_string();
        assert!(msg.starts_with("[AUTH]"), "Expected [AUTH] prefix in: {msg}");
        assert!(msg.contains("IPUMS_API_KEY"), "Expected variable in: {msg}");
        assert_eq!(error.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn test_credential_rejected_includes_status() {
        let error = ExtractError::credential_rejected(403);
        assert!(error.to_string().contains("403"));
        assert_eq!(error.kind(), ErrorKind::Authentication);
    }

    #[test]
    fn test_catalog_status_is_network_kind() {
        let error = ExtractError::catalog_status("https://cps.ipums.org/x", 503);
        let msg = error.to_string();
        assert!(msg.contains("503"), "Expected status in: {msg}");
        assert_eq!(error.kind(), ErrorKind::Network);
    }

    #[test]
    fn test_file_exists_display() {
        let error = ExtractError::file_exists("/tmp/t1.dat.gz");
        let msg = error.to_string();
        assert!(msg.contains("/tmp/t1.dat.gz"), "Expected path in: {msg}");
        assert!(msg.contains("Suggestion"), "Expected suggestion in: {msg}");
        assert_eq!(error.kind(), ErrorKind::FileExists);
    }

    #[test]
    fn test_ambiguous_display_includes_count_and_pattern() {
        let error = ExtractError::ambiguous("data", "/tmp/out", "cps_0*.dat.gz", 2);
        let msg = error.to_string();
        assert!(msg.contains("2 files"), "Expected count in: {msg}");
        assert!(msg.contains("cps_0*.dat.gz"), "Expected pattern in: {msg}");
        assert_eq!(error.kind(), ErrorKind::AmbiguousArtifact);
    }

    #[test]
    fn test_filesystem_family_kinds() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(ExtractError::io("/tmp/x", io).kind(), ErrorKind::Filesystem);
        assert_eq!(
            ExtractError::destination_busy("/tmp").kind(),
            ErrorKind::Filesystem
        );
        assert_eq!(
            ExtractError::missing_artifact("ddi", "/tmp", "cps_0*.xml").kind(),
            ErrorKind::Filesystem
        );
    }

    #[test]
    fn test_remote_status_keeps_status() {
        let error = ExtractError::remote_status("submit", 400, "unknown variable FOO");
        match &error {
            ExtractError::RemoteService { status, operation, .. } => {
                assert_eq!(*status, Some(400));
                assert_eq!(*operation, "submit");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert!(error.to_string().contains("unknown variable FOO"));
    }

    #[test]
    fn test_cancelled_display() {
        let error = ExtractError::cancelled("cps:12", 7200, "started");
        let msg = error.to_string();
        assert!(msg.contains("cps:12"));
        assert!(msg.contains("7200s"));
        assert!(msg.contains("started"));
        assert_eq!(error.kind(), ErrorKind::Cancelled);
    }
}
