use crate::error::{CatalogError, Result};

use async_trait::async_trait;
use std::time::Duration;

/// Where original images come from.
#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Fetches images over HTTP(S). Every request is bounded by the client timeout so an
/// unreachable host cannot stall a worker, and every body by `max_bytes`.
pub struct HttpImageSource {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpImageSource {
    pub fn new(timeout: Duration, max_bytes: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| CatalogError::Configuration(format!("cannot build http client: {}", e)))?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait]
impl ImageSource for HttpImageSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| CatalogError::Validation(format!("invalid image url {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CatalogError::Validation(format!("unsupported image url scheme in {}", url)));
        }

        let mut response = self.client.get(parsed).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::UpstreamStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        if let Some(declared) = response.content_length()
            && declared > self.max_bytes
        {
            return Err(too_large(url, self.max_bytes));
        }

        // Content-Length may be absent or wrong; count what actually arrives.
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if body.len() as u64 + chunk.len() as u64 > self.max_bytes {
                return Err(too_large(url, self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        tracing::debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(body)
    }
}

fn too_large(url: &str, limit: u64) -> CatalogError {
    CatalogError::Validation(format!("image at {} exceeds {} bytes", url, limit))
}
