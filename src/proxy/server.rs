//! HTTP server setup and configuration.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::config::Config;
use crate::router::CompletionRouter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<CompletionRouter>,
}

impl AppState {
    pub fn new(router: CompletionRouter) -> Self {
        Self {
            router: Arc::new(router),
        }
    }
}

/// Wildcard CORS; preflight requests are answered here without reaching a handler.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/chat-completion", post(handlers::chat_completion))
        .route("/health", get(handlers::health))
        .route("/providers", get(handlers::list_providers))
        // State and middleware
        .with_state(state)
        .layer(cors_layer())
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();

    let router = CompletionRouter::from_config(&config)?;
    for profile in router.registry().iter() {
        tracing::info!(
            provider = %profile.id,
            endpoint = %profile.endpoint,
            format = profile.format.kind().as_str(),
            credential = router.has_credential(&profile.id),
            "Provider available"
        );
    }

    let app = create_router(AppState::new(router));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting chatrelay server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
