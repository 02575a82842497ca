//! Bounded HTTP fetch of query images.

use std::time::Duration;

use once_cell::sync::Lazy;

use crate::config::FetchConfig;
use crate::error::SearchError;

static HTTP_CLIENT: Lazy<reqwest::blocking::Client> = Lazy::new(|| {
    reqwest::blocking::Client::builder()
        .user_agent(concat!("lookalike/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to build HTTP client")
});

/// Fetch image bytes from an HTTP(S) URL.
///
/// URL problems are the caller's fault and map to `InvalidInput`; anything
/// that goes wrong talking to the remote side maps to `ImageAcquisition`.
/// The whole request is bounded by the configured timeout and size cap.
pub fn fetch_image(raw_url: &str, config: &FetchConfig) -> Result<Vec<u8>, SearchError> {
    let url = url::Url::parse(raw_url)
        .map_err(|e| SearchError::InvalidInput(format!("invalid image URL: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(SearchError::InvalidInput(format!(
                "unsupported URL scheme: {other}"
            )))
        }
    }

    let resp = HTTP_CLIENT
        .get(url)
        .timeout(Duration::from_secs(config.timeout_secs))
        .send()
        .map_err(|e| SearchError::ImageAcquisition(format!("request failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(SearchError::ImageAcquisition(format!(
            "remote returned {status}"
        )));
    }

    if let Some(len) = resp.content_length() {
        if len > config.max_bytes as u64 {
            return Err(SearchError::ImageAcquisition(format!(
                "image too large: {len} bytes (limit {})",
                config.max_bytes
            )));
        }
    }

    let body = resp
        .bytes()
        .map_err(|e| SearchError::ImageAcquisition(format!("failed to read body: {e}")))?;

    if body.len() > config.max_bytes {
        return Err(SearchError::ImageAcquisition(format!(
            "image too large: {} bytes (limit {})",
            body.len(),
            config.max_bytes
        )));
    }

    Ok(body.to_vec())
}
