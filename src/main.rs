use dotenvy::dotenv;
use signed_upload_broker::config::{BrokerConfig, StorageConfig};
use signed_upload_broker::infrastructure::storage;
use signed_upload_broker::services::signature_store::{MemorySignatureStore, SignatureSweeper};
use signed_upload_broker::{AppState, create_app};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Initialize tracing with EnvFilter
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signed_upload_broker=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting Signed Upload Broker...");

    let storage_config = StorageConfig::from_env()?;
    let broker_config = BrokerConfig::from_env();
    info!(
        "🛡️  Broker Config: Signature TTL={}s, Workers={}, Part Size={}MB, Max Size={}MB",
        broker_config.signature_ttl.as_secs(),
        broker_config.worker_pool_size,
        broker_config.part_size / 1024 / 1024,
        broker_config.max_file_size / 1024 / 1024
    );

    // Setup Infrastructure
    let object_store = storage::setup_object_store(&storage_config).await;
    let signature_store = Arc::new(MemorySignatureStore::new());

    // Setup Shutdown Channel
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let sweeper = SignatureSweeper::new(
        signature_store.clone(),
        broker_config.sweep_interval,
        shutdown_rx,
    );
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let addr: SocketAddr = broker_config.bind_addr.parse()?;
    let state = AppState::new(
        &storage_config,
        broker_config,
        object_store,
        signature_store,
    );
    let executor = state.executor.clone();

    let app = create_app(state);

    info!("✅ Server ready at http://{}", addr);
    info!("📖 Swagger UI: http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    executor.shutdown();
    info!("🛑 Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
