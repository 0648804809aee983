//! Destination storage for converted media.
//!
//! This module defines the [`Storage`] trait every backend implements and a
//! [`from_config`] constructor that picks the backend named in the
//! configuration: [`DiskStorage`] or [`S3Storage`]. Paths are `/`-separated keys relative to the backend's
//! root, e.g. `converted/movie.mp4`.

mod disk;
mod s3;

pub use disk::DiskStorage;
pub use s3::{RetryPolicy, S3Storage, PART_SIZE};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::config::StorageConfig;

/// Boxed reader returned by [`Storage::download`].
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("path escapes the storage root: {0}")]
    PathTraversal(String),

    #[error("invalid storage path: {0:?}")]
    InvalidPath(String),

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("unsupported storage provider: {0}")]
    UnsupportedProvider(String),

    #[error("storage.{0} is required for the s3 provider")]
    MissingSetting(&'static str),

    /// A request to a remote backend failed. `status` is the HTTP status
    /// when a response was received.
    #[error("{operation} failed: {message}")]
    Remote {
        operation: &'static str,
        status: Option<u16>,
        timed_out: bool,
        message: String,
    },

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub(crate) fn remote(operation: &'static str, message: impl Into<String>) -> Self {
        StorageError::Remote {
            operation,
            status: None,
            timed_out: false,
            message: message.into(),
        }
    }

    /// Timeouts, 408 and 5xx responses; worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Remote {
                status, timed_out, ..
            } => *timed_out || matches!(status, Some(408 | 500..=599)),
            _ => false,
        }
    }
}

/// A place converted files and waveforms are written to.
///
/// Implementations are shared across tasks behind an `Arc`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Short identifier for this backend (e.g. `"disk"`).
    fn name(&self) -> &'static str;

    /// Copy `data` to `path` until EOF, replacing any existing object.
    /// Returns the number of bytes written.
    ///
    /// The source is consumed as it arrives, so a live process output can
    /// be uploaded while the process is still writing.
    async fn upload_stream(
        &self,
        path: &str,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StorageError>;

    /// Open the object at `path` for reading.
    async fn download(&self, path: &str) -> Result<ObjectReader, StorageError>;

    /// Remove the object at `path`. Removing a missing object is not an error.
    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    async fn exists(&self, path: &str) -> Result<bool, StorageError>;
}

/// Build the backend selected by `config.provider`.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn Storage>, StorageError> {
    match config.provider.to_ascii_lowercase().as_str() {
        "disk" => Ok(Arc::new(DiskStorage::new(&config.root_path)?)),
        "s3" => Ok(Arc::new(S3Storage::new(config)?)),
        _ => Err(StorageError::UnsupportedProvider(config.provider.clone())),
    }
}
