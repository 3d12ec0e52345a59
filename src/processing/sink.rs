use crate::error::Result;
use crate::queue::types::WorkItem;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Destination of derived artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Stores `bytes` for `item` and returns the artifact's location.
    /// Persisting the same item twice overwrites the first copy.
    async fn persist(&self, item: &WorkItem, bytes: Vec<u8>) -> Result<String>;
}

/// Writes artifacts below a root directory, one subdirectory per product.
pub struct FileSystemSink {
    root: PathBuf,
}

impl FileSystemSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// `<root>/<product_id>/<image_index:04>.jpg`
pub fn artifact_path(root: &Path, item: &WorkItem) -> PathBuf {
    root.join(item.product_id.to_string())
        .join(format!("{:04}.jpg", item.image_index))
}

#[async_trait]
impl ArtifactSink for FileSystemSink {
    async fn persist(&self, item: &WorkItem, bytes: Vec<u8>) -> Result<String> {
        let path = artifact_path(&self.root, item);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Readers only ever see a complete file.
        let staging = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&staging, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&staging, &path).await {
            let _ = tokio::fs::remove_file(&staging).await;
            return Err(e.into());
        }

        Ok(path.to_string_lossy().into_owned())
    }
}
