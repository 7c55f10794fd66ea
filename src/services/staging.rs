use crate::error::BrokerError;
use crate::utils::validation::{file_extension, staging_prefix};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Buffers inbound payloads to uniquely named local files.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
    max_file_size: u64,
}

/// A staged payload. The file is removed on [`ScopedLocalFile::release`], or on
/// drop if the owner never got that far.
#[derive(Debug)]
pub struct ScopedLocalFile {
    path: Option<TempPath>,
    location: PathBuf,
    size: u64,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            dir: dir.into(),
            max_file_size,
        }
    }

    pub async fn stage<R>(
        &self,
        original_filename: &str,
        mut reader: R,
    ) -> Result<ScopedLocalFile, BrokerError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let suffix = file_extension(original_filename)
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();
        let prefix = staging_prefix(original_filename);

        let temp_file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(&suffix)
            .tempfile_in(&self.dir)
            .map_err(|e| BrokerError::staging("Failed to create staging file", e))?;
        let (file, path) = temp_file.into_parts();
        // From here on `path` deletes the file if staging bails out early.
        let location = path.to_path_buf();
        let mut file = tokio::fs::File::from_std(file);

        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut size: u64 = 0;

        loop {
            let n = reader
                .read(&mut buffer)
                .await
                .map_err(|e| BrokerError::staging("Failed to read upload stream", e))?;
            if n == 0 {
                break;
            }
            size += n as u64;
            if size > self.max_file_size {
                return Err(BrokerError::invalid(format!(
                    "Payload exceeds the maximum allowed size of {} bytes",
                    self.max_file_size
                )));
            }
            file.write_all(&buffer[..n])
                .await
                .map_err(|e| BrokerError::staging("Failed to write staging file", e))?;
        }

        file.flush()
            .await
            .map_err(|e| BrokerError::staging("Failed to flush staging file", e))?;

        tracing::debug!("Staged {} bytes at {}", size, location.display());

        Ok(ScopedLocalFile {
            path: Some(path),
            location,
            size,
        })
    }
}

impl ScopedLocalFile {
    pub fn path(&self) -> &Path {
        &self.location
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Deletes the staged file. Failures are logged, never returned.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if let Some(path) = self.path.take() {
            match path.close() {
                Ok(()) => tracing::debug!("Removed staging file {}", self.location.display()),
                Err(e) => tracing::error!(
                    "Failed to delete staging file {}: {}",
                    self.location.display(),
                    e
                ),
            }
        }
    }
}

impl Drop for ScopedLocalFile {
    fn drop(&mut self) {
        self.remove();
    }
}
