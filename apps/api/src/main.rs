mod analysis;
mod config;
mod db;
mod errors;
mod extraction;
mod llm_client;
mod models;
mod routes;
mod state;
mod storage;
mod usage;

use anyhow::Result;
use aws_config::Region;
use aws_sdk_s3::config::Credentials;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::analysis::admission::PollLimiter;
use crate::analysis::queue::JobQueue;
use crate::analysis::worker::run_worker_pool;
use crate::config::Config;
use crate::db::create_pool;
use crate::llm_client::LlmGateway;
use crate::routes::build_router;
use crate::state::AppState;
use crate::storage::ObjectStore;
use crate::usage::PgUsageService;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails fast on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting resume analysis API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Initialize Redis (job queue transport)
    let redis = redis::Client::open(config.redis_url.clone())?;
    let queue = JobQueue::new(redis);
    info!("Redis job queue initialized");

    // Initialize object storage
    let object_store = match config.storage_provider.as_str() {
        "s3" => {
            let s3 = build_s3_client(&config).await;
            info!("S3 object store initialized (bucket: {})", config.s3_bucket);
            ObjectStore::s3(s3, config.s3_bucket.clone())
        }
        _ => {
            info!("Local object store initialized (root: {})", config.storage_root);
            ObjectStore::local(config.storage_root.clone())
        }
    };

    // Initialize LLM gateway
    let llm = LlmGateway::new(&config);
    info!(
        "LLM gateway initialized (provider: {}, model: {})",
        config.llm_provider, config.llm_model
    );

    // Initialize quota gate and poll limiter
    let quota = Arc::new(PgUsageService::new(db.clone(), config.free_analysis_limit));
    let poll_limiter = Arc::new(PollLimiter::new(std::time::Duration::from_millis(
        config.poll_window_ms,
    )));

    // Build app state
    let state = AppState {
        db,
        queue,
        object_store: Arc::new(object_store),
        llm,
        quota,
        poll_limiter,
        config: config.clone(),
    };

    // Spawn the worker pool with a cooperative shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_pool = tokio::spawn(run_worker_pool(state.clone(), shutdown_rx));

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain in-flight analysis jobs before exiting
    info!("HTTP server stopped, draining workers");
    let _ = shutdown_tx.send(true);
    worker_pool.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
    }
}

/// Constructs an S3 client configured for MinIO (local) or AWS (production).
async fn build_s3_client(config: &Config) -> aws_sdk_s3::Client {
    let credentials = Credentials::new(
        &config.aws_access_key_id,
        &config.aws_secret_access_key,
        None,
        None,
        "analysis-static",
    );

    let s3_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
        .region(Region::new("us-east-1"))
        .credentials_provider(credentials)
        .endpoint_url(&config.s3_endpoint)
        .load()
        .await;

    aws_sdk_s3::Client::new(&s3_config)
}
