#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use signed_upload_broker::AppState;
use signed_upload_broker::config::{BrokerConfig, StorageConfig};
use signed_upload_broker::services::signature_store::MemorySignatureStore;
use signed_upload_broker::services::storage::{ObjectStore, PartReceipt, PresignedRequest};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub const BASE_URL: &str = "https://cdn.example.com/";

/// In-memory object store that records every call.
#[derive(Default)]
pub struct MockObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    pending: Mutex<HashMap<String, HashMap<i32, Bytes>>>,
    presigned: AtomicUsize,
    transfer_calls: AtomicUsize,
    aborts: AtomicUsize,
    in_flight_parts: AtomicUsize,
    max_parallel_parts: AtomicUsize,
    upload_counter: AtomicUsize,
    fail_part: Option<i32>,
    part_delay: Option<Duration>,
    /// Presigning fails when set.
    pub signer_down: AtomicBool,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parts with this number fail.
    pub fn with_failing_part(mut self, part_number: i32) -> Self {
        self.fail_part = Some(part_number);
        self
    }

    /// Every upload call sleeps this long before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn presign_calls(&self) -> usize {
        self.presigned.load(Ordering::SeqCst)
    }

    /// put / create / part / complete calls, i.e. anything that moves payload.
    pub fn transfer_calls(&self) -> usize {
        self.transfer_calls.load(Ordering::SeqCst)
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }

    pub fn max_parallel_parts(&self) -> usize {
        self.max_parallel_parts.load(Ordering::SeqCst)
    }

    async fn maybe_delay(&self) {
        if let Some(delay) = self.part_delay {
            tokio::time::sleep(delay).await;
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn presign_put(&self, key: &str, validity: Duration) -> Result<PresignedRequest> {
        if self.signer_down.load(Ordering::SeqCst) {
            return Err(anyhow!("connection refused"));
        }
        self.presigned.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        Ok(PresignedRequest {
            url: format!(
                "https://uploads.s3.us-east-1.amazonaws.com/{}?X-Amz-Algorithm=AWS4-HMAC-SHA256\
                 &X-Amz-Date={}&X-Amz-Expires={}&X-Amz-Signature=feedface",
                key,
                now.format("%Y%m%dT%H%M%SZ"),
                validity.as_secs()
            ),
            expires_at: now + chrono::Duration::from_std(validity)?,
        })
    }

    async fn put_object(&self, key: &str, body: Bytes) -> Result<()> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        self.maybe_delay().await;
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), body.to_vec());
        Ok(())
    }

    async fn create_multipart_upload(&self, key: &str) -> Result<String> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        let id = format!(
            "{}#{}",
            key,
            self.upload_counter.fetch_add(1, Ordering::SeqCst)
        );
        self.pending
            .lock()
            .unwrap()
            .insert(id.clone(), HashMap::new());
        Ok(id)
    }

    async fn upload_part(
        &self,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<String> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight_parts.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_parallel_parts.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight_parts);

        self.maybe_delay().await;
        if self.fail_part == Some(part_number) {
            return Err(anyhow!("InternalError on part {}", part_number));
        }

        let mut pending = self.pending.lock().unwrap();
        let parts = pending
            .get_mut(upload_id)
            .ok_or_else(|| anyhow!("NoSuchUpload"))?;
        parts.insert(part_number, body);
        Ok(format!("\"etag-{}\"", part_number))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<PartReceipt>,
    ) -> Result<()> {
        self.transfer_calls.fetch_add(1, Ordering::SeqCst);
        let mut uploaded = self
            .pending
            .lock()
            .unwrap()
            .remove(upload_id)
            .ok_or_else(|| anyhow!("NoSuchUpload"))?;

        let mut assembled = Vec::new();
        for part in parts {
            let body = uploaded
                .remove(&part.part_number)
                .ok_or_else(|| anyhow!("InvalidPart {}", part.part_number))?;
            assembled.extend_from_slice(&body);
        }
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), assembled);
        Ok(())
    }

    async fn abort_multipart_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().remove(upload_id);
        Ok(())
    }
}

pub fn storage_config() -> StorageConfig {
    StorageConfig {
        base_url: BASE_URL.to_string(),
        access_key: "test-access".to_string(),
        secret_key: "test-secret".to_string(),
        region: "us-east-1".to_string(),
        bucket: "uploads".to_string(),
        endpoint_url: None,
        image_prefix: "images".to_string(),
        video_prefix: "videos".to_string(),
        file_prefix: "files".to_string(),
    }
}

/// Small parts so multipart paths run with tiny payloads.
pub fn broker_config(staging_dir: &Path) -> BrokerConfig {
    BrokerConfig {
        worker_pool_size: 4,
        part_size: 8,
        multipart_threshold: 16,
        staging_dir: staging_dir.to_path_buf(),
        max_file_size: 1024 * 1024,
        ..BrokerConfig::default()
    }
}

pub struct TestBroker {
    pub state: AppState,
    pub object_store: Arc<MockObjectStore>,
    pub signatures: Arc<MemorySignatureStore>,
    pub staging_dir: tempfile::TempDir,
}

impl TestBroker {
    pub fn new() -> Self {
        Self::with_store(MockObjectStore::new(), |_| {})
    }

    pub fn with_store(store: MockObjectStore, tweak: impl FnOnce(&mut BrokerConfig)) -> Self {
        let staging_dir = tempfile::tempdir().unwrap();
        let object_store = Arc::new(store);
        let signatures = Arc::new(MemorySignatureStore::new());

        let mut config = broker_config(staging_dir.path());
        tweak(&mut config);

        let state = AppState::new(
            &storage_config(),
            config,
            object_store.clone(),
            signatures.clone(),
        );

        Self {
            state,
            object_store,
            signatures,
            staging_dir,
        }
    }

    pub fn staged_file_count(&self) -> usize {
        std::fs::read_dir(self.staging_dir.path()).unwrap().count()
    }
}
