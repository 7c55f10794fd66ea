use crate::config::StorageConfig;
use crate::error::BrokerError;
use crate::models::{FileCategory, Handle, SigningGrant};
use crate::services::signature_store::{SignatureStore, signature_key};
use crate::services::storage::ObjectStore;
use crate::utils::validation::validate_key_pattern;
use std::sync::Arc;
use std::time::Duration;

/// Handle reservation attempts before giving up (first try + one regeneration).
const MAX_HANDLE_ATTEMPTS: usize = 2;

/// Per-category key prefixes used to build target key patterns.
#[derive(Debug, Clone)]
pub struct KeyPrefixes {
    pub image: String,
    pub video: String,
    pub file: String,
}

impl KeyPrefixes {
    pub fn for_category(&self, category: FileCategory) -> &str {
        match category {
            FileCategory::Image => &self.image,
            FileCategory::Video => &self.video,
            FileCategory::File => &self.file,
        }
    }
}

impl From<&StorageConfig> for KeyPrefixes {
    fn from(config: &StorageConfig) -> Self {
        Self {
            image: config.image_prefix.clone(),
            video: config.video_prefix.clone(),
            file: config.file_prefix.clone(),
        }
    }
}

pub struct SignatureIssuer {
    object_store: Arc<dyn ObjectStore>,
    store: Arc<dyn SignatureStore>,
    prefixes: KeyPrefixes,
    presign_validity: Duration,
    signature_ttl: Duration,
}

impl SignatureIssuer {
    pub fn new(
        object_store: Arc<dyn ObjectStore>,
        store: Arc<dyn SignatureStore>,
        prefixes: KeyPrefixes,
        presign_validity: Duration,
        signature_ttl: Duration,
    ) -> Self {
        Self {
            object_store,
            store,
            prefixes,
            presign_validity,
            signature_ttl,
        }
    }

    /// Issues a handle for a logical file category ("image", "video", "file").
    pub async fn issue_for_category(&self, file_type: &str) -> Result<Handle, BrokerError> {
        let category: FileCategory = file_type.parse()?;
        let pattern = self.prefixes.for_category(category).to_string();
        tracing::debug!("File type '{}' signs under '{}'", category.as_str(), pattern);
        self.issue(&pattern).await
    }

    pub async fn issue(&self, target_key_pattern: &str) -> Result<Handle, BrokerError> {
        self.issue_grant(target_key_pattern)
            .await
            .map(|(handle, _)| handle)
    }

    /// Like [`SignatureIssuer::issue`], but also returns the grant that was cached.
    /// The grant must not leave the process.
    pub async fn issue_grant(
        &self,
        target_key_pattern: &str,
    ) -> Result<(Handle, SigningGrant), BrokerError> {
        validate_key_pattern(target_key_pattern)?;

        let presigned = self
            .object_store
            .presign_put(target_key_pattern, self.presign_validity)
            .await
            .map_err(|e| BrokerError::dependency("Failed to presign upload", e))?;

        let grant = SigningGrant {
            target_key_pattern: target_key_pattern.to_string(),
            expires_at: presigned.expires_at,
            presigned_url: presigned.url,
        };

        for attempt in 1..=MAX_HANDLE_ATTEMPTS {
            let handle = Handle::generate();
            let stored = self
                .store
                .set_if_absent(
                    &signature_key(&handle),
                    &grant.presigned_url,
                    self.signature_ttl,
                )
                .await?;

            if stored {
                tracing::info!(
                    "🔏 Issued signature {}… for '{}' (expires {})",
                    handle.abbreviated(),
                    target_key_pattern,
                    grant.expires_at
                );
                return Ok((handle, grant));
            }

            tracing::warn!(
                "Handle collision on attempt {}/{}, regenerating",
                attempt,
                MAX_HANDLE_ATTEMPTS
            );
        }

        Err(BrokerError::dependency_msg(
            "Could not reserve a unique signature handle",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::services::signature_store::{ClaimedEntry, MemorySignatureStore};
    use crate::services::storage::{PartReceipt, PresignedRequest};
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WINDOW: Duration = Duration::from_secs(1800);

    struct FakeSigner {
        fail: bool,
    }

    #[async_trait]
    impl ObjectStore for FakeSigner {
        async fn presign_put(&self, key: &str, validity: Duration) -> Result<PresignedRequest> {
            if self.fail {
                return Err(anyhow!("InvalidAccessKeyId"));
            }
            Ok(PresignedRequest {
                url: format!("https://bucket.example.com/{}?X-Amz-Signature=sig", key),
                expires_at: Utc::now() + chrono::Duration::from_std(validity)?,
            })
        }
        async fn put_object(&self, _: &str, _: Bytes) -> Result<()> {
            unreachable!()
        }
        async fn create_multipart_upload(&self, _: &str) -> Result<String> {
            unreachable!()
        }
        async fn upload_part(&self, _: &str, _: &str, _: i32, _: Bytes) -> Result<String> {
            unreachable!()
        }
        async fn complete_multipart_upload(
            &self,
            _: &str,
            _: &str,
            _: Vec<PartReceipt>,
        ) -> Result<()> {
            unreachable!()
        }
        async fn abort_multipart_upload(&self, _: &str, _: &str) -> Result<()> {
            unreachable!()
        }
    }

    /// Rejects the first `collisions` writes as if the key were taken.
    struct CollidingStore {
        collisions: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl SignatureStore for CollidingStore {
        async fn set_if_absent(&self, _: &str, _: &str, _: Duration) -> Result<bool, BrokerError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(n >= self.collisions)
        }
        async fn get(&self, _: &str) -> Result<Option<String>, BrokerError> {
            Ok(None)
        }
        async fn get_and_delete(&self, _: &str) -> Result<Option<String>, BrokerError> {
            Ok(None)
        }
        async fn claim(&self, _: &str) -> Result<Option<ClaimedEntry>, BrokerError> {
            Ok(None)
        }
    }

    fn prefixes() -> KeyPrefixes {
        KeyPrefixes {
            image: "images".to_string(),
            video: "videos".to_string(),
            file: "files".to_string(),
        }
    }

    fn issuer(fail: bool, store: Arc<dyn SignatureStore>) -> SignatureIssuer {
        SignatureIssuer::new(Arc::new(FakeSigner { fail }), store, prefixes(), WINDOW, WINDOW)
    }

    #[tokio::test]
    async fn test_issue_caches_grant_behind_handle() {
        let store = Arc::new(MemorySignatureStore::new());
        let issuer = issuer(false, store.clone());

        let (handle, grant) = issuer.issue_grant("images").await.unwrap();

        let cached = store.get(&signature_key(&handle)).await.unwrap();
        assert_eq!(cached.as_deref(), Some(grant.presigned_url.as_str()));
        assert!(!handle.as_str().contains("X-Amz"));
    }

    #[tokio::test]
    async fn test_category_maps_to_prefix() {
        let store = Arc::new(MemorySignatureStore::new());
        let issuer = issuer(false, store.clone());

        let handle = issuer.issue_for_category("video").await.unwrap();
        let url = store.get(&signature_key(&handle)).await.unwrap().unwrap();
        assert!(url.contains("/videos?"));

        let err = issuer.issue_for_category("audio").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    }

    #[tokio::test]
    async fn test_collision_regenerates_once() {
        let store = Arc::new(CollidingStore {
            collisions: 1,
            attempts: AtomicUsize::new(0),
        });
        let issuer = issuer(false, store.clone());

        assert!(issuer.issue("images").await.is_ok());
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_repeated_collision_is_dependency_failure() {
        let store = Arc::new(CollidingStore {
            collisions: usize::MAX,
            attempts: AtomicUsize::new(0),
        });
        let issuer = issuer(false, store.clone());

        let err = issuer.issue("images").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
        assert_eq!(store.attempts.load(Ordering::SeqCst), MAX_HANDLE_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_signer_failure_is_dependency_failure() {
        let issuer = issuer(true, Arc::new(MemorySignatureStore::new()));
        let err = issuer.issue("images").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
    }

    #[tokio::test]
    async fn test_malformed_pattern_is_rejected_before_signing() {
        // A failing signer proves validation runs first.
        let issuer = issuer(true, Arc::new(MemorySignatureStore::new()));
        for pattern in ["", "/abs", "a/../b"] {
            let err = issuer.issue(pattern).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        }
    }
}
