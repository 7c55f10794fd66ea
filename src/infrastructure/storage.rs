use crate::config::StorageConfig;
use crate::services::storage::S3ObjectStore;
use aws_sdk_s3::config::{Credentials, Region};
use std::sync::Arc;
use tracing::info;

/// Builds the single long-lived object-store client shared by the issuer and executor.
pub async fn setup_object_store(config: &StorageConfig) -> Arc<S3ObjectStore> {
    info!(
        "☁️  Object Storage: {} (Bucket: {}, Region: {})",
        config.endpoint_url.as_deref().unwrap_or("aws"),
        config.bucket,
        config.region
    );

    let mut loader = aws_config::from_env()
        .region(Region::new(config.region.clone()))
        .credentials_provider(Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "static",
        ));
    if let Some(endpoint_url) = &config.endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }
    let aws_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
        .force_path_style(config.endpoint_url.is_some())
        .build();

    let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
    Arc::new(S3ObjectStore::new(s3_client, config.bucket.clone()))
}
