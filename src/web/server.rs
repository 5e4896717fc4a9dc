//! Axum web server implementation for the Strata backend.

use std::net::SocketAddr;

use axum::{
    extract::{ws::WebSocketUpgrade, State},
    http::{header, Method},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::routes::api::api_routes;
use super::state::AppState;
use super::ws::handle_stream_socket;

/// Server configuration options.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Enable CORS for development (allows any origin).
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_permissive: true,
        }
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
}

/// Health check endpoint handler; reports whether a model is loaded.
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let model_loaded = state.model().read().await.is_some();
    Json(HealthResponse {
        status: "ok",
        model_loaded,
    })
}

/// WebSocket upgrade handler for the live capture stream.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_stream_socket(socket, state))
}

/// Build the Axum router with all routes.
fn build_router(state: AppState, cors_permissive: bool) -> Router {
    let cors = if cors_permissive {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    };

    Router::new()
        .merge(api_routes())
        .route("/health", get(health))
        .route("/ws/stream", get(ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the web server.
///
/// Prints a readiness line on stdout once the listener is bound; the
/// desktop shell waits for it before connecting. Blocks until shutdown.
pub async fn run_server(state: AppState, config: ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let app = build_router(state, config.cors_permissive);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Starting web server at http://{}", addr);
    println!("Strata backend ready");

    axum::serve(listener, app).await?;

    Ok(())
}
