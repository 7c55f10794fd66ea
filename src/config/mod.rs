use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Smallest part size S3 accepts for every part except the last.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Object-store account settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Public URL prefix objects are served from (e.g. "https://cdn.example.com/")
    pub base_url: String,

    pub access_key: String,

    pub secret_key: String,

    /// Region identifier (default: "us-east-1")
    pub region: String,

    pub bucket: String,

    /// Custom endpoint for S3-compatible stores (MinIO etc.); enables path-style addressing
    pub endpoint_url: Option<String>,

    /// Key prefix for the "image" category (default: "images")
    pub image_prefix: String,

    /// Key prefix for the "video" category (default: "videos")
    pub video_prefix: String,

    /// Key prefix for uploaded files (default: "files")
    pub file_prefix: String,
}

impl StorageConfig {
    /// Load account settings from environment variables.
    /// Credentials and bucket are required.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: env::var("STORAGE_BASE_URL").context("STORAGE_BASE_URL must be set")?,
            access_key: env::var("STORAGE_ACCESS_KEY")
                .context("STORAGE_ACCESS_KEY must be set")?,
            secret_key: env::var("STORAGE_SECRET_KEY")
                .context("STORAGE_SECRET_KEY must be set")?,
            region: env::var("STORAGE_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("STORAGE_BUCKET").context("STORAGE_BUCKET must be set")?,
            endpoint_url: env::var("STORAGE_ENDPOINT").ok().filter(|v| !v.is_empty()),
            image_prefix: env::var("IMAGE_PREFIX").unwrap_or_else(|_| "images".to_string()),
            video_prefix: env::var("VIDEO_PREFIX").unwrap_or_else(|_| "videos".to_string()),
            file_prefix: env::var("FILE_PREFIX").unwrap_or_else(|_| "files".to_string()),
        })
    }
}

/// Broker tunables
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Lifetime of a cached signature (default: 30 minutes)
    pub signature_ttl: Duration,

    /// Validity window requested from the signer (default: 30 minutes)
    pub presign_validity: Duration,

    /// Process-wide transfer worker capacity (default: 8)
    pub worker_pool_size: usize,

    /// Multipart chunk size in bytes (default: 8 MB)
    pub part_size: usize,

    /// Payloads above this size are sent as multipart uploads (default: part_size)
    pub multipart_threshold: u64,

    /// Directory for staged payloads (default: OS temp dir)
    pub staging_dir: PathBuf,

    /// Maximum accepted payload in bytes (default: 1 GB)
    pub max_file_size: u64,

    /// Delete the handle after a successful upload (default: true)
    pub consume_on_success: bool,

    /// How often expired signatures are swept from the in-memory store (default: 60s)
    pub sweep_interval: Duration,

    /// Listen address (default: "127.0.0.1:3000")
    pub bind_addr: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            signature_ttl: Duration::from_secs(30 * 60),
            presign_validity: Duration::from_secs(30 * 60),
            worker_pool_size: 8,
            part_size: 8 * 1024 * 1024, // 8 MB
            multipart_threshold: 8 * 1024 * 1024,
            staging_dir: env::temp_dir(),
            max_file_size: 1024 * 1024 * 1024, // 1 GB
            consume_on_success: true,
            sweep_interval: Duration::from_secs(60),
            bind_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl BrokerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        let part_size = env::var("PART_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(default.part_size)
            .max(MIN_PART_SIZE);

        Self {
            signature_ttl: env::var("SIGNATURE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.signature_ttl),

            presign_validity: env::var("PRESIGN_VALIDITY_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.presign_validity),

            worker_pool_size: env::var("TRANSFER_POOL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(default.worker_pool_size),

            part_size,

            multipart_threshold: env::var("MULTIPART_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(part_size as u64),

            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            consume_on_success: env::var("CONSUME_SIGNATURE_ON_SUCCESS")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(default.consume_on_success),

            sweep_interval: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.sweep_interval),

            bind_addr: env::var("BIND_ADDR").unwrap_or(default.bind_addr),
        }
    }

    /// Create config for development (short-lived signatures, smaller pool)
    pub fn development() -> Self {
        Self {
            signature_ttl: Duration::from_secs(5 * 60),
            presign_validity: Duration::from_secs(5 * 60),
            worker_pool_size: 4,
            consume_on_success: false,
            ..Self::default()
        }
    }
}
