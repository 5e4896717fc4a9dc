//! REST API route definitions.

use axum::{
    routing::{get, post},
    Router,
};

use crate::web::handlers::{export, inference, models};
use crate::web::state::AppState;

/// Build the API router with all REST endpoints.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/load-model", post(models::load_model))
        .route("/run-inference", post(inference::run_inference))
        .route("/save-tensor", post(export::save_tensor))
        .route("/copy-tensor", post(export::copy_tensor))
        .route("/estimate-size", get(export::estimate_size))
}
