//! The search orchestrator.
//!
//! Drives one query end to end: acquire the image (raw bytes or URL),
//! validate and decode it, encode it into a query vector, then run a
//! bounded, thresholded similarity scan. The outcome carries the ranked
//! page plus how many candidates cleared the threshold before truncation.
//!
//! Services are demanded in pipeline order, so a request that fails
//! validation never constructs anything, and an encoder failure never
//! touches the store.

use std::sync::Arc;

use image::DynamicImage;
use serde::Serialize;

use crate::error::SearchError;
use crate::fetch;
use crate::images;
use crate::index::SearchHit;
use crate::services::ServiceRegistry;

/// Where the query image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Url(String),
}

/// Per-request knobs. Omitted values fall back to configured defaults.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub min_score: Option<f32>,
    pub top_k: Option<usize>,
    pub category: Option<String>,
}

/// Result of one search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    #[serde(rename = "results")]
    pub hits: Vec<SearchHit>,
    /// Candidates at or above the threshold, counted before truncation
    pub total_matched: usize,
}

pub struct Searcher {
    registry: Arc<ServiceRegistry>,
}

impl Searcher {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// Run the full pipeline for an image query.
    pub fn search(
        &self,
        source: ImageSource,
        opts: &SearchOptions,
    ) -> Result<SearchOutcome, SearchError> {
        let (min_score, top_k) = self.resolve_options(opts)?;

        let image = self.acquire_image(source)?;

        let encoder = self.registry.encoder()?;
        let vector = encoder
            .encode(image)
            .map_err(|e| SearchError::Embedding(e.to_string()))?;

        self.run_query(&vector, opts.category.as_deref(), min_score, top_k)
    }

    /// Search with an already-computed query vector.
    ///
    /// This is the ranking pipeline without the encoder in front of it.
    pub fn search_with_vector(
        &self,
        query: &[f32],
        opts: &SearchOptions,
    ) -> Result<SearchOutcome, SearchError> {
        let (min_score, top_k) = self.resolve_options(opts)?;
        self.run_query(query, opts.category.as_deref(), min_score, top_k)
    }

    fn resolve_options(&self, opts: &SearchOptions) -> Result<(f32, usize), SearchError> {
        let config = &self.registry.config().search;

        let min_score = opts.min_score.unwrap_or(config.default_min_score);
        if !(0.0..=1.0).contains(&min_score) {
            return Err(SearchError::InvalidInput(format!(
                "min_score must be between 0.0 and 1.0, got {min_score}"
            )));
        }

        let top_k = opts.top_k.unwrap_or(config.default_top_k);
        if top_k == 0 {
            return Err(SearchError::InvalidInput(
                "top_k must be greater than 0".to_string(),
            ));
        }

        Ok((min_score, top_k.min(config.max_top_k)))
    }

    fn acquire_image(&self, source: ImageSource) -> Result<DynamicImage, SearchError> {
        match source {
            // Bytes came straight from the caller, so a decode failure is
            // their fault.
            ImageSource::Bytes(bytes) => images::decode_image(&bytes)
                .map_err(|e| SearchError::InvalidInput(e.to_string())),
            // Fetched bytes that fail to decode are the remote's fault.
            ImageSource::Url(url) => {
                let bytes = fetch::fetch_image(&url, &self.registry.config().fetch)?;
                images::decode_image(&bytes)
                    .map_err(|e| SearchError::ImageAcquisition(e.to_string()))
            }
        }
    }

    fn run_query(
        &self,
        query: &[f32],
        category: Option<&str>,
        min_score: f32,
        top_k: usize,
    ) -> Result<SearchOutcome, SearchError> {
        let store = self.registry.store()?;

        // Scan without a limit so total_matched is the exact number of
        // candidates clearing the threshold, not a page-bounded estimate.
        let candidates = store
            .search(query, category, min_score, usize::MAX)
            .map_err(|e| SearchError::SearchBackend(e.to_string()))?;

        let total_matched = candidates.len();
        let hits: Vec<SearchHit> = candidates.into_iter().take(top_k).collect();

        Ok(SearchOutcome {
            hits,
            total_matched,
        })
    }
}
