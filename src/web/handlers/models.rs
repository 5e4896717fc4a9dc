//! Model loading handler.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;

use crate::infer::ModelState;
use crate::model::GraphDescription;
use crate::web::error::WebError;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LoadModelRequest {
    pub path: PathBuf,
}

/// Load a model from disk, replace the current one, and return its graph
/// description. A failed load leaves the previous model in place.
pub async fn load_model(
    State(state): State<AppState>,
    Json(body): Json<LoadModelRequest>,
) -> Result<Json<GraphDescription>, WebError> {
    let loaders = state.loaders().clone();
    let path = body.path.clone();
    let (model, graph) = tokio::task::spawn_blocking(move || loaders.load(&path))
        .await
        .map_err(|e| WebError::Internal(format!("load task failed: {e}")))??;

    tracing::info!(path = %body.path.display(), model_type = %graph.model_type, "model loaded");

    let mut slot = state.model().write().await;
    *slot = Some(Arc::new(ModelState::new(model, graph.clone())));
    Ok(Json(graph))
}
