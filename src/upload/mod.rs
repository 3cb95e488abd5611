//! Upload module
//!
//! Streams a single local file to the destination bucket through an
//! [`ObjectStore`], and optionally removes the local copy afterwards.

use crate::metrics;
use crate::s3::{ObjectStore, TransportError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::File;
use tracing::{debug, error, warn};

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("file does not exist: {}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open file: {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to upload {} to {key}: {source}", path.display())]
    Transport {
        path: PathBuf,
        key: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to delete file after upload: {}: {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Uploads local files into one bucket
pub struct FileUploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl FileUploader {
    /// Create an uploader that writes into `bucket` through `store`
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    /// Destination bucket
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload the file at `path` under `key`.
    ///
    /// Returns the number of bytes sent. The file handle is moved into the
    /// store and released when the transfer returns.
    pub async fn upload(&self, path: &Path, key: &str) -> Result<u64, UploadError> {
        let file = match File::open(path).await {
            Ok(file) => file,
            Err(source) if source.kind() == ErrorKind::NotFound => {
                warn!(
                    filename = %path.display(),
                    error = %source,
                    "Tried uploading file that does not exist, did another worker upload and then delete it?"
                );
                return Err(UploadError::NotFound {
                    path: path.to_path_buf(),
                    source,
                });
            }
            Err(source) => {
                error!(filename = %path.display(), error = %source, "Failed to open file");
                return Err(UploadError::Open {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        // Size only feeds the bytes metric
        let size = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!(filename = %path.display(), error = %e, "Failed to read file size");
                0
            }
        };

        self.store
            .put_object(&self.bucket, key, file)
            .await
            .map_err(|source| UploadError::Transport {
                path: path.to_path_buf(),
                key: key.to_string(),
                source,
            })?;

        metrics::record_bytes_uploaded(size);

        Ok(size)
    }

    /// Remove the local file after a confirmed upload.
    ///
    /// A file that is already gone is only a warning: another worker or an
    /// outside process got there first.
    pub async fn remove_local_file(&self, path: &Path) -> Result<(), UploadError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == ErrorKind::NotFound => {
                warn!(
                    filename = %path.display(),
                    error = %source,
                    "Attempted to delete a file that no longer exists, did something else already delete it?"
                );
                Ok(())
            }
            Err(source) => {
                error!(filename = %path.display(), error = %source, "Failed to delete file after upload");
                Err(UploadError::Delete {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
    }
}
