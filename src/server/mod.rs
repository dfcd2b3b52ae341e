//! HTTP server

pub mod http;

use anyhow::{Context, Result};
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::service::ProgressionService;

/// Shared server state
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub service: Arc<ProgressionService>,
}

/// Build the application router
pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let request_timeout = Duration::from_secs(state.config.server.request_timeout_secs);

    let learners = Router::new()
        .route("/learners/{id}", delete(http::erase_learner_handler))
        .route("/learners/{id}/modules", get(http::learner_modules_handler))
        .route("/learners/{id}/progress", post(http::progress_handler))
        .route(
            "/learners/{id}/recommendations",
            get(http::recommendations_handler),
        );

    let catalog = Router::new()
        .route(
            "/catalog",
            get(http::catalog_handler).put(http::replace_catalog_handler),
        )
        .route("/catalog/modules", get(http::list_modules_handler))
        .route("/catalog/modules/{id}", get(http::get_module_handler));

    Router::new()
        .merge(learners)
        .merge(catalog)
        .route("/api/status", get(http::status_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}

/// Start the web server and run until Ctrl-C
pub async fn start(config: Config) -> Result<()> {
    let service = Arc::new(ProgressionService::from_config(&config).await?);
    let config = Arc::new(config);

    let state = ServerState {
        config: config.clone(),
        service: service.clone(),
    };

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app = router(state);

    let catalog = service.catalog().await;
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("     {} server starting", crate::info());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    println!("✓ Server binding to: {}", addr);
    println!("✓ Catalog: {} modules (version {})", catalog.len(), catalog.version());
    if !catalog.warnings().is_empty() {
        println!("⚠ Catalog has {} warnings", catalog.warnings().len());
    }
    match &config.signals.endpoint {
        Some(endpoint) => println!("✓ Signals: {}", endpoint),
        None => println!("⚠ Signals: none configured"),
    }
    println!();
    println!("🚀 Listening on http://{}", addr);
    println!();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    if let Some(path) = &config.progress.snapshot_path {
        service.save_progress(path).await?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
