//! Local filesystem backend.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWriteExt};

use super::{ObjectReader, Storage, StorageError};

/// Stores objects as files under a root directory.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// The root is made absolute but not created until the first upload.
    pub fn new(root: &Path) -> Result<Self, StorageError> {
        if root.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath(String::new()));
        }
        Ok(Self {
            root: std::path::absolute(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a storage key onto a file below the root.
    ///
    /// Keys are split on both `/` and `\`. `..` may not climb above the root
    /// and absolute keys are refused.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.starts_with(['/', '\\']) {
            return Err(StorageError::PathTraversal(key.to_string()));
        }

        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for part in key.split(['/', '\\']) {
            match part {
                "" | "." => {}
                ".." => {
                    if depth == 0 {
                        tracing::warn!("Path traversal attempt rejected: {key}");
                        return Err(StorageError::PathTraversal(key.to_string()));
                    }
                    resolved.pop();
                    depth -= 1;
                }
                part => {
                    // Catches drive prefixes such as `C:` on Windows.
                    let mut components = Path::new(part).components();
                    if !matches!(
                        (components.next(), components.next()),
                        (Some(Component::Normal(_)), None)
                    ) {
                        return Err(StorageError::PathTraversal(key.to_string()));
                    }
                    resolved.push(part);
                    depth += 1;
                }
            }
        }

        if depth == 0 {
            return Err(StorageError::InvalidPath(key.to_string()));
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Storage for DiskStorage {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn upload_stream(
        &self,
        path: &str,
        data: &mut (dyn AsyncRead + Send + Unpin),
    ) -> Result<u64, StorageError> {
        let full = self.resolve(path)?;
        if let Some(dir) = full.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let mut file = tokio::fs::File::create(&full).await?;
        let copied = match tokio::io::copy(data, &mut file).await {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                if let Err(rm) = tokio::fs::remove_file(&full).await {
                    tracing::warn!("Failed to remove partial upload {:?}: {}", full, rm);
                }
                return Err(e.into());
            }
        };
        file.flush().await?;

        tracing::info!("Saved to disk: {} ({} bytes)", full.display(), copied);
        Ok(copied)
    }

    async fn download(&self, path: &str) -> Result<ObjectReader, StorageError> {
        let full = self.resolve(path)?;
        match tokio::fs::File::open(&full).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => {
                tracing::debug!("Deleted {}", full.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let full = self.resolve(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
