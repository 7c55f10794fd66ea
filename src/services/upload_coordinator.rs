use crate::error::BrokerError;
use crate::models::{Handle, SigningGrant, TransferOutcome};
use crate::services::signature_store::{SignatureStore, signature_key};
use crate::services::staging::{ScopedLocalFile, StagingArea};
use crate::services::transfer::TransferExecutor;
use crate::utils::presigned::parse_presigned_url;
use crate::utils::validation::file_extension;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Lifecycle of a single upload. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Validating,
    Staging,
    SignatureResolution,
    Transferring,
    Succeeded,
    Failed,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Validating => "validating",
            JobStage::Staging => "staging",
            JobStage::SignatureResolution => "signature_resolution",
            JobStage::Transferring => "transferring",
            JobStage::Succeeded => "succeeded",
            JobStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Per-request state. Never shared between jobs.
#[derive(Debug)]
struct UploadJob {
    original_filename: String,
    handle: Handle,
    remote_key: String,
    staging_path: Option<PathBuf>,
    stage: JobStage,
}

impl UploadJob {
    fn advance(&mut self, next: JobStage) {
        tracing::debug!(
            "Job {} -> {} ({})",
            self.stage,
            next,
            self.original_filename
        );
        self.stage = next;
    }
}

pub struct UploadCoordinator {
    staging: StagingArea,
    store: Arc<dyn SignatureStore>,
    executor: Arc<TransferExecutor>,
    file_prefix: String,
    base_url: String,
    consume_on_success: bool,
}

impl UploadCoordinator {
    pub fn new(
        staging: StagingArea,
        store: Arc<dyn SignatureStore>,
        executor: Arc<TransferExecutor>,
        file_prefix: impl Into<String>,
        base_url: impl Into<String>,
        consume_on_success: bool,
    ) -> Self {
        Self {
            staging,
            store,
            executor,
            file_prefix: file_prefix.into(),
            base_url: base_url.into(),
            consume_on_success,
        }
    }

    /// Stages `reader`, resolves `handle` and transfers the payload. Returns the public URL.
    pub async fn upload<R>(
        &self,
        reader: R,
        original_filename: &str,
        handle: &Handle,
        cancel: &CancellationToken,
    ) -> Result<String, BrokerError>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.upload_outcome(reader, original_filename, handle, cancel)
            .await
            .map(|outcome| outcome.public_url)
    }

    pub async fn upload_outcome<R>(
        &self,
        reader: R,
        original_filename: &str,
        handle: &Handle,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, BrokerError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let span = tracing::info_span!("upload_job", handle = %handle.abbreviated());
        async {
            let mut job = UploadJob {
                original_filename: original_filename.to_string(),
                handle: handle.clone(),
                remote_key: String::new(),
                staging_path: None,
                stage: JobStage::Validating,
            };

            let result = self.run(&mut job, reader, cancel).await;
            if let Some(path) = &job.staging_path {
                tracing::debug!("Released staging file {}", path.display());
            }
            match &result {
                Ok(outcome) => {
                    job.advance(JobStage::Succeeded);
                    tracing::info!("✅ Uploaded {} -> {}", job.original_filename, outcome.remote_key);
                }
                Err(e) => {
                    let failed_during = job.stage;
                    job.advance(JobStage::Failed);
                    tracing::warn!(
                        "❌ Upload of {} failed during {}: {}",
                        job.original_filename,
                        failed_during,
                        e
                    );
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run<R>(
        &self,
        job: &mut UploadJob,
        reader: R,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, BrokerError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let extension = file_extension(&job.original_filename)?;
        job.remote_key = self.remote_key(extension, Utc::now());

        job.advance(JobStage::Staging);
        let staged = self.staging.stage(&job.original_filename, reader).await?;
        job.staging_path = Some(staged.path().to_path_buf());

        let result = self.resolve_and_transfer(job, &staged, cancel).await;
        // Released on every path; Drop covers cancellation of this future.
        staged.release();
        result
    }

    async fn resolve_and_transfer(
        &self,
        job: &mut UploadJob,
        staged: &ScopedLocalFile,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome, BrokerError> {
        job.advance(JobStage::SignatureResolution);
        let key = signature_key(&job.handle);

        // A single-use handle is taken out of the store before the transfer so
        // that concurrent uploads cannot both spend it.
        let (presigned_url, claim) = if self.consume_on_success {
            let claimed = self.store.claim(&key).await?.ok_or_else(unknown_signature)?;
            (claimed.value, Some((claimed.remaining, Instant::now())))
        } else {
            let url = self.store.get(&key).await?.ok_or_else(unknown_signature)?;
            (url, None)
        };
        let grant = grant_from_url(presigned_url)?;

        job.advance(JobStage::Transferring);
        let stored = match self
            .executor
            .transfer(staged, &job.remote_key, &grant, cancel)
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                if let Some((remaining, claimed_at)) = claim {
                    let left = remaining.saturating_sub(claimed_at.elapsed());
                    self.restore_signature(&key, &grant, left, &job.handle).await;
                }
                return Err(e);
            }
        };

        tracing::debug!(
            "Stored {} ({} bytes in {} parts)",
            stored.key,
            stored.size,
            stored.parts
        );

        Ok(TransferOutcome {
            public_url: self.public_url(&stored.key),
            remote_key: stored.key,
        })
    }

    /// Puts a claimed handle back after a failed transfer so the caller can retry.
    async fn restore_signature(
        &self,
        key: &str,
        grant: &SigningGrant,
        ttl: Duration,
        handle: &Handle,
    ) {
        if ttl.is_zero() || grant.is_expired_at(Utc::now()) {
            return;
        }
        match self.store.set_if_absent(key, &grant.presigned_url, ttl).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                "Handle {}… was re-issued while its transfer was running",
                handle.abbreviated()
            ),
            Err(e) => tracing::warn!(
                "Could not restore handle {}… after failed transfer: {}",
                handle.abbreviated(),
                e
            ),
        }
    }

    /// `prefix/yyyy-mm-dd/<random>.ext`
    fn remote_key(&self, extension: &str, now: DateTime<Utc>) -> String {
        format!(
            "{}/{}/{}.{}",
            self.file_prefix.trim_end_matches('/'),
            now.format("%Y-%m-%d"),
            Uuid::new_v4().simple(),
            extension
        )
    }

    fn public_url(&self, remote_key: &str) -> String {
        if self.base_url.ends_with('/') {
            format!("{}{}", self.base_url, remote_key)
        } else {
            format!("{}/{}", self.base_url, remote_key)
        }
    }
}

fn unknown_signature() -> BrokerError {
    BrokerError::expired("Signature is unknown or has expired")
}

/// Rebuilds the grant from its cached URL. A lapsed URL is expired even if the cache still held it.
fn grant_from_url(presigned_url: String) -> Result<SigningGrant, BrokerError> {
    // Without SigV4 parameters the cache TTL is the only expiry signal.
    let expires_at = match parse_presigned_url(&presigned_url) {
        Some(info) if info.is_expired_at(Utc::now()) => {
            return Err(BrokerError::expired("Upload grant has expired"));
        }
        Some(info) => info.expires_at,
        None => DateTime::<Utc>::MAX_UTC,
    };

    Ok(SigningGrant {
        target_key_pattern: target_path(&presigned_url),
        expires_at,
        presigned_url,
    })
}

fn target_path(presigned_url: &str) -> String {
    url::Url::parse(presigned_url)
        .map(|u| u.path().trim_start_matches('/').to_string())
        .unwrap_or_default()
}
