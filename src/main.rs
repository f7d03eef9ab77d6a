use clap::Parser;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use terrainflow::config::PipelineConfig;
use terrainflow::infrastructure::{database, storage};
use terrainflow::services::catalog::DatabaseCatalog;
use terrainflow::services::observer::TracingObserver;
use terrainflow::services::pipeline::ConversionPipeline;
use terrainflow::services::raster::GeoTiffDecoder;
use terrainflow::{AppState, create_app};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port for the API server
    #[arg(short, long, default_value_t = 3000)]
    port: u16,

    /// Require JWT_SECRET instead of falling back to a development secret
    #[arg(long, default_value_t = false)]
    production: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Environment & Logging
    dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "terrainflow=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting TerrainFlow...");

    // 2. Infrastructure
    let db = database::setup_database().await?;
    let storage_service = storage::setup_storage().await?;

    let config = if args.production {
        PipelineConfig::production()
    } else {
        PipelineConfig::from_env()
    };
    info!(
        "🛡️  Pipeline Config: Max Size={}MB, Timeout={:?}, Concurrency={}, Non-archive={:?}",
        config.max_file_size / 1024 / 1024,
        config.conversion_timeout,
        config.max_concurrent_files,
        config.non_archive_policy
    );

    // 3. Pipeline
    let catalog = Arc::new(DatabaseCatalog::new(db.clone()));
    let pipeline = Arc::new(ConversionPipeline::new(
        config.clone(),
        storage_service.clone(),
        catalog.clone(),
        Arc::new(GeoTiffDecoder::default()),
        Arc::new(TracingObserver),
    ));

    let state = AppState {
        db,
        storage: storage_service,
        catalog,
        pipeline,
        config,
    };

    // 4. HTTP
    let app = create_app(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("✅ API Server listening on: http://0.0.0.0:{}", args.port);
    info!(
        "📖 Swagger UI documentation: http://localhost:{}/swagger-ui",
        args.port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 TerrainFlow exited cleanly.");
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
            Ok(mut sig) => {
                sig.recv().await;
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
            info!("⌨️  Ctrl+C received, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, initiating graceful shutdown...");
        },
    }
}
