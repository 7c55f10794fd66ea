use crate::error::BrokerError;
use crate::models::SigningGrant;
use crate::services::staging::ScopedLocalFile;
use crate::services::storage::{ObjectStore, PartReceipt};
use anyhow::Result;
use bytes::Bytes;
use chrono::Utc;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Upper bound on the best-effort abort after a failed or cancelled multipart upload.
pub const ABORT_TIMEOUT: Duration = Duration::from_secs(5);

/// What the remote store ended up holding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    pub parts: usize,
}

/// Moves staged files to the object store.
///
/// All transfers share one bounded pool of part workers. A transfer blocks its
/// caller until every part has landed or one has failed. A failed or cancelled
/// multipart upload is aborted on a best-effort basis; parts the store already
/// accepted may linger until the bucket's lifecycle rules clean them up.
pub struct TransferExecutor {
    object_store: Arc<dyn ObjectStore>,
    permits: Arc<Semaphore>,
    part_size: usize,
    multipart_threshold: u64,
    abort_timeout: Duration,
}

impl TransferExecutor {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        pool_size: usize,
        part_size: usize,
        multipart_threshold: u64,
    ) -> Self {
        Self {
            object_store,
            permits: Arc::new(Semaphore::new(pool_size.max(1))),
            part_size: part_size.max(1),
            multipart_threshold,
            abort_timeout: ABORT_TIMEOUT,
        }
    }

    /// Workers currently free to take a part.
    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// Closes the pool. Transfers that have not acquired a worker yet fail.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub async fn transfer(
        &self,
        file: &ScopedLocalFile,
        remote_key: &str,
        grant: &SigningGrant,
        cancel: &CancellationToken,
    ) -> Result<StoredObject, BrokerError> {
        if grant.is_expired_at(Utc::now()) {
            return Err(BrokerError::expired("Upload grant lapsed before transfer"));
        }
        tracing::debug!(
            "Transferring {} bytes to {} under grant for '{}'",
            file.size(),
            remote_key,
            grant.target_key_pattern
        );

        if file.size() <= self.multipart_threshold {
            return self.put_single(file, remote_key, cancel).await;
        }

        let upload_id = self
            .object_store
            .create_multipart_upload(remote_key)
            .await
            .map_err(|e| BrokerError::transfer("Failed to start multipart upload", e))?;

        let result = match self
            .upload_parts(file, remote_key, &upload_id, cancel)
            .await
        {
            Ok(parts) => {
                let count = parts.len();
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(cancelled()),
                    res = self.object_store.complete_multipart_upload(remote_key, &upload_id, parts) => {
                        res.map(|_| count).map_err(|e| {
                            BrokerError::transfer("Failed to complete multipart upload", e)
                        })
                    }
                }
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(parts) => Ok(StoredObject {
                key: remote_key.to_string(),
                size: file.size(),
                parts,
            }),
            Err(e) => {
                self.abort_quietly(remote_key, &upload_id).await;
                Err(e)
            }
        }
    }

    async fn put_single(
        &self,
        file: &ScopedLocalFile,
        remote_key: &str,
        cancel: &CancellationToken,
    ) -> Result<StoredObject, BrokerError> {
        let _permit = self.acquire(cancel).await?;

        let body = tokio::fs::read(file.path())
            .await
            .map_err(|e| BrokerError::transfer("Failed to read staged file", e))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            res = self.object_store.put_object(remote_key, Bytes::from(body)) => {
                res.map_err(|e| BrokerError::transfer("Failed to upload object", e))?;
                Ok(StoredObject {
                    key: remote_key.to_string(),
                    size: file.size(),
                    parts: 1,
                })
            }
        }
    }

    async fn upload_parts(
        &self,
        file: &ScopedLocalFile,
        remote_key: &str,
        upload_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<PartReceipt>, BrokerError> {
        let size = file.size();
        let part_size = self.part_size as u64;
        let part_count = size.div_ceil(part_size);

        // Dropping the set on an early return aborts every in-flight part.
        let mut tasks: JoinSet<Result<PartReceipt, PartError>> = JoinSet::new();
        let mut receipts = Vec::with_capacity(part_count as usize);

        for index in 0..part_count {
            let permit = self.acquire(cancel).await?;

            while let Some(joined) = tasks.try_join_next() {
                receipts.push(part_result(joined)?);
            }

            let offset = index * part_size;
            let len = part_size.min(size - offset) as usize;
            let part_number = (index + 1) as i32;
            let store = self.object_store.clone();
            let path = file.path().to_path_buf();
            let key = remote_key.to_string();
            let upload_id = upload_id.to_string();

            tasks.spawn(upload_part(
                store,
                path,
                key,
                upload_id,
                part_number,
                offset,
                len,
                permit,
            ));
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                joined = tasks.join_next() => match joined {
                    Some(joined) => receipts.push(part_result(joined)?),
                    None => break,
                },
            }
        }

        receipts.sort_by_key(|r| r.part_number);
        tracing::debug!(
            "Uploaded {} parts for {} (upload {})",
            receipts.len(),
            remote_key,
            upload_id
        );
        Ok(receipts)
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit, BrokerError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(cancelled()),
            permit = self.permits.clone().acquire_owned() => {
                permit.map_err(|e| BrokerError::transfer("Transfer worker pool is shut down", e))
            }
        }
    }

    async fn abort_quietly(&self, remote_key: &str, upload_id: &str) {
        let abort = self
            .object_store
            .abort_multipart_upload(remote_key, upload_id);
        match tokio::time::timeout(self.abort_timeout, abort).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(
                "Failed to abort multipart upload {} for {}: {}",
                upload_id,
                remote_key,
                e
            ),
            Err(_) => tracing::warn!(
                "Gave up aborting multipart upload {} for {} after {:?}",
                upload_id,
                remote_key,
                self.abort_timeout
            ),
        }
    }
}

#[derive(Debug)]
struct PartError {
    part_number: i32,
    source: anyhow::Error,
}

#[allow(clippy::too_many_arguments)]
async fn upload_part(
    store: Arc<dyn ObjectStore>,
    path: PathBuf,
    key: String,
    upload_id: String,
    part_number: i32,
    offset: u64,
    len: usize,
    _permit: OwnedSemaphorePermit,
) -> Result<PartReceipt, PartError> {
    let run = async {
        let body = read_range(&path, offset, len).await?;
        let etag = store.upload_part(&key, &upload_id, part_number, body).await?;
        Ok::<_, anyhow::Error>(PartReceipt { part_number, etag })
    };
    run.await.map_err(|source| PartError {
        part_number,
        source,
    })
}

async fn read_range(path: &Path, offset: u64, len: usize) -> Result<Bytes> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buffer = vec![0u8; len];
    file.read_exact(&mut buffer).await?;
    Ok(Bytes::from(buffer))
}

fn part_result(
    joined: Result<Result<PartReceipt, PartError>, JoinError>,
) -> Result<PartReceipt, BrokerError> {
    match joined {
        Ok(Ok(receipt)) => Ok(receipt),
        Ok(Err(e)) => Err(BrokerError::transfer(
            format!("Part {} failed", e.part_number),
            e.source,
        )),
        Err(e) => Err(BrokerError::transfer("Part worker did not finish", e)),
    }
}

fn cancelled() -> BrokerError {
    BrokerError::transfer_msg("Transfer cancelled")
}
