//! Error taxonomy shared by every subsystem of the catalog core.
//!
//! The variants mirror how a failure is *handled* rather than where it came from:
//! validation problems are rejected before any durable write, transient I/O may be
//! retried (by the caller or by queue redelivery), corrupt data degrades to a miss
//! or a dropped work item, and configuration errors abort the process at startup.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Malformed submission or query. Nothing was written.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The requested record does not exist.
    #[error("product {0} not found")]
    NotFound(u64),

    /// Network, store, cache or queue call failed or timed out.
    #[error("transient i/o failure: {0}")]
    TransientIo(String),

    /// A payload could not be decoded (cache snapshot, queue message, image bytes).
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// An external image source answered with a non-success status.
    #[error("image source {url} answered with status {status}")]
    UpstreamStatus { url: String, status: u16 },

    /// Required connection or setting unavailable at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CatalogError {
    /// Whether queue redelivery has a chance of succeeding where this attempt failed.
    pub fn is_transient(&self) -> bool {
        match self {
            CatalogError::TransientIo(_) => true,
            CatalogError::UpstreamStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        CatalogError::TransientIo(err.to_string())
    }
}

impl From<redis::RedisError> for CatalogError {
    fn from(err: redis::RedisError) -> Self {
        CatalogError::TransientIo(format!("redis: {}", err))
    }
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return CatalogError::UpstreamStatus {
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
                status: status.as_u16(),
            };
        }
        CatalogError::TransientIo(format!("http: {}", err))
    }
}

impl From<tokio::time::error::Elapsed> for CatalogError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CatalogError::TransientIo("operation timed out".to_string())
    }
}

impl From<serde_json::Error> for CatalogError {
    fn from(err: serde_json::Error) -> Self {
        CatalogError::CorruptData(format!("json: {}", err))
    }
}

impl From<image::ImageError> for CatalogError {
    fn from(err: image::ImageError) -> Self {
        CatalogError::CorruptData(format!("image: {}", err))
    }
}

/// Runs `fut` under `limit`, folding an elapsed deadline into `TransientIo`.
pub async fn with_timeout<T, F>(limit: std::time::Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_status_transience() {
        let server_side = CatalogError::UpstreamStatus { url: "http://x".into(), status: 503 };
        let throttled = CatalogError::UpstreamStatus { url: "http://x".into(), status: 429 };
        let missing = CatalogError::UpstreamStatus { url: "http://x".into(), status: 404 };

        assert!(server_side.is_transient());
        assert!(throttled.is_transient());
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_decode_failures_are_permanent() {
        let err: CatalogError = serde_json::from_str::<u64>("not json").unwrap_err().into();
        assert!(matches!(err, CatalogError::CorruptData(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_with_timeout_maps_elapsed_to_transient() {
        let result: Result<()> = with_timeout(std::time::Duration::from_millis(10), async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
    }
}
