pub mod api;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::{BrokerConfig, StorageConfig};
use crate::services::signature_issuer::{KeyPrefixes, SignatureIssuer};
use crate::services::signature_store::SignatureStore;
use crate::services::staging::StagingArea;
use crate::services::storage::ObjectStore;
use crate::services::transfer::TransferExecutor;
use crate::services::upload_coordinator::UploadCoordinator;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::signatures::issue_signature,
        api::handlers::upload::upload_file,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::signatures::SignatureRequest,
            api::handlers::signatures::SignatureResponse,
            api::handlers::upload::UploadResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "uploads", description = "Signature issuance and signed uploads"),
        (name = "system", description = "Operational endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<SignatureIssuer>,
    pub coordinator: Arc<UploadCoordinator>,
    pub executor: Arc<TransferExecutor>,
    pub config: BrokerConfig,
}

impl AppState {
    /// Wires the broker components around one object-store client and one signature store.
    pub fn new(
        storage_config: &StorageConfig,
        config: BrokerConfig,
        object_store: Arc<dyn ObjectStore>,
        signature_store: Arc<dyn SignatureStore>,
    ) -> Self {
        let issuer = Arc::new(SignatureIssuer::new(
            object_store.clone(),
            signature_store.clone(),
            KeyPrefixes::from(storage_config),
            config.presign_validity,
            config.signature_ttl,
        ));

        let executor = Arc::new(TransferExecutor::new(
            object_store,
            config.worker_pool_size,
            config.part_size,
            config.multipart_threshold,
        ));

        let coordinator = Arc::new(UploadCoordinator::new(
            StagingArea::new(config.staging_dir.clone(), config.max_file_size),
            signature_store,
            executor.clone(),
            storage_config.file_prefix.clone(),
            storage_config.base_url.clone(),
            config.consume_on_success,
        ));

        Self {
            issuer,
            coordinator,
            executor,
            config,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    // Room for multipart framing on top of the payload limit.
    let body_limit = usize::try_from(state.config.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(10 * 1024 * 1024);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/signatures",
            post(api::handlers::signatures::issue_signature),
        )
        .route(
            "/upload",
            post(api::handlers::upload::upload_file)
                .layer(axum::extract::DefaultBodyLimit::max(body_limit)),
        )
        // Inside the request-id layer so the span sees the generated id.
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get(api::middleware::request_id::REQUEST_ID_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
                    info!("📥 {} {}", request.method(), request.uri());
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     _span: &tracing::Span| {
                        info!(
                            "📤 Finished in {:?} with status {}",
                            latency,
                            response.status()
                        );
                    },
                ),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .with_state(state)
}
