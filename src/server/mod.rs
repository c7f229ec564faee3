use crate::config::Config;
use crate::dispatcher::{start_janitor, Dispatcher};
use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod routes_jobs;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub dispatcher: Dispatcher,
    pub config: Arc<Config>,
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(welcome))
        .route("/health", get(health_check))
        .nest("/api", routes_jobs::job_routes())
        .layer(DefaultBodyLimit::max(ctx.config.server.max_upload_bytes))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn welcome() -> impl IntoResponse {
    "Mediaforge transcoding API. POST a media file to /api/jobs to get started."
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let dispatcher = Dispatcher::new(&config.scratch, &config.engine);

    // The boundary spools uploads under the scratch root, so it must exist
    // before the first request.
    tokio::fs::create_dir_all(dispatcher.scratch_root())
        .await
        .context("Failed to create scratch root")?;

    start_janitor(dispatcher.clone(), config.scratch.janitor_interval_secs);

    let ctx = AppContext {
        dispatcher,
        config: Arc::new(config),
    };
    let app = create_router(ctx);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutdown signal received");
}
