use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod memory;
pub mod object_store;
pub mod upload;

pub use memory::MemoryStorage;
pub use object_store::S3Storage;
pub use upload::{upload_tree, UploadFailure, UploadReport};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to put object {key}: {reason}")]
    Put { key: String, reason: String },

    #[error("Failed to list objects under {prefix}: {reason}")]
    List { prefix: String, reason: String },
}

/// Remote object store the staged artifacts are pushed to.
///
/// Implementations are shared across concurrently running instances.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn store_raw(&self, key: &str, value: Bytes) -> Result<(), StorageError>;
    async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Human-readable location for log lines, e.g. `s3://bucket`.
    fn location(&self) -> String;
}
