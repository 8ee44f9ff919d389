//! Image download over HTTP.

use crate::{Error, Result};
use std::time::Duration;
use tracing::instrument;

/// Downloads image bytes for image message segments.
///
/// Holds a pooled client; clone it freely across tasks.
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
}

impl ImageFetcher {
    /// Creates a fetcher whose requests time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the HTTP client cannot be built
    /// (for example when the TLS backend fails to initialize).
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("Dupwatch/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "build_http_client".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self { client })
    }

    /// Downloads the body at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FetchFailed`] on transport errors, timeouts and
    /// non-success statuses.
    #[instrument(skip(self), fields(operation = "fetch_image"))]
    pub async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let failed = |cause: String| Error::FetchFailed {
            url: url.to_string(),
            cause,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?
            .error_for_status()
            .map_err(|e| failed(e.to_string()))?;

        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        metrics::counter!("image_fetches_total").increment(1);
        tracing::debug!(bytes = bytes.len(), "Fetched image");
        Ok(bytes.to_vec())
    }
}
