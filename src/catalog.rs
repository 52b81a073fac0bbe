//! Live catalog of valid sample identifiers.
//!
//! IPUMS publishes every available sample id on a plain web page. The
//! catalog is fetched once per workflow run through [`SampleCatalog`] and
//! the ids are pulled out of the page text with a regex, so page layout
//! changes do not matter as long as the tokens are present.

use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, info, instrument};

use crate::error::ExtractError;
use crate::sample::SampleIdentifier;

/// Default CPS sample id listing.
pub const DEFAULT_CATALOG_URL: &str = "https://cps.ipums.org/cps-action/samples/sample_ids";

/// Set of sample identifiers that exist at request time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidSampleSet {
    ids: HashSet<String>,
}

impl ValidSampleSet {
    /// Creates a set from identifier strings.
    #[must_use]
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if `id` is a published sample.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Number of published samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the catalog listed no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Keeps only candidates present in the set, preserving candidate order.
    #[must_use]
    pub fn filter(&self, candidates: &[SampleIdentifier]) -> Vec<SampleIdentifier> {
        candidates
            .iter()
            .filter(|candidate| self.contains(candidate.as_str()))
            .cloned()
            .collect()
    }
}

/// Extracts every `<collection><yyyy>_<nn>[a-z]?` token from `text`.
///
/// # Errors
///
/// Returns [`ExtractError::Validation`] if `collection` produces an invalid
/// pattern (it is escaped, so only pathological input can fail).
pub fn extract_sample_ids(text: &str, collection: &str) -> Result<ValidSampleSet, ExtractError> {
    let pattern = format!(r"{}\d{{4}}_\d{{2}}[a-z]?", regex::escape(collection));
    let regex = Regex::new(&pattern).map_err(|e| {
        ExtractError::validation(
            format!("invalid collection prefix '{collection}': {e}"),
            "Use a plain collection name such as cps",
        )
    })?;
    Ok(ValidSampleSet::new(
        regex.find_iter(text).map(|m| m.as_str().to_string()),
    ))
}

/// Source of the currently valid sample identifiers.
#[async_trait]
pub trait SampleCatalog: Send + Sync {
    /// Fetches the full set of valid sample identifiers.
    async fn fetch(&self) -> Result<ValidSampleSet, ExtractError>;
}

/// Catalog backed by the public IPUMS sample id page.
#[derive(Debug, Clone)]
pub struct HttpSampleCatalog {
    client: Client,
    url: String,
    collection: String,
}

impl HttpSampleCatalog {
    /// Creates a catalog reading `url` and matching ids for `collection`.
    #[must_use]
    pub fn new(client: Client, url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            collection: collection.into(),
        }
    }

    /// The catalog page URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SampleCatalog for HttpSampleCatalog {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn fetch(&self) -> Result<ValidSampleSet, ExtractError> {
        debug!("fetching sample catalog");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ExtractError::network(&self.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::catalog_status(&self.url, status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ExtractError::network(&self.url, e))?;
        let samples = extract_sample_ids(&body, &self.collection)?;
        info!(samples = samples.len(), "sample catalog loaded");
        Ok(samples)
    }
}
