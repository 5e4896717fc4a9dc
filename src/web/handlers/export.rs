//! Export handlers over the capture cache: save to file, copy as JSON,
//! estimate size.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::capture::export::{estimate_bytes, format_bytes, render_record};
use crate::capture::record::{CaptureRecord, StreamRecord};
use crate::web::error::WebError;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SaveTensorRequest {
    pub layer_id: String,
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
pub struct SaveTensorResponse {
    pub success: bool,
    pub path: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct CopyTensorRequest {
    pub layer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct EstimateSizeQuery {
    pub layer_id: String,
}

#[derive(Debug, Serialize)]
pub struct EstimateSizeResponse {
    pub bytes: u64,
    pub human_readable: String,
}

fn lookup(state: &AppState, layer_id: &str) -> Result<Arc<CaptureRecord>, WebError> {
    state
        .cache()
        .read()
        .get_any(layer_id)
        .ok_or_else(|| WebError::NotFound(format!("layer {layer_id:?} not found in cache")))
}

/// Write the full layer record as plain text to the given path.
pub async fn save_tensor(
    State(state): State<AppState>,
    Json(body): Json<SaveTensorRequest>,
) -> Result<Json<SaveTensorResponse>, WebError> {
    let record = lookup(&state, &body.layer_id)?;
    let text = render_record(&record).map_err(WebError::from)?;
    tokio::fs::write(&body.path, text)
        .await
        .map_err(|e| WebError::Internal(format!("could not write export file: {e}")))?;
    Ok(Json(SaveTensorResponse {
        success: true,
        path: body.path,
    }))
}

/// Return the full layer record as JSON, tensors as nested arrays, for the
/// viewer's clipboard.
pub async fn copy_tensor(
    State(state): State<AppState>,
    Json(body): Json<CopyTensorRequest>,
) -> Result<Json<StreamRecord>, WebError> {
    let record = lookup(&state, &body.layer_id)?;
    let projection = record.to_stream_record().map_err(WebError::from)?;
    Ok(Json(projection))
}

/// Estimate the rendered export size of a layer's tensors.
pub async fn estimate_size(
    State(state): State<AppState>,
    Query(query): Query<EstimateSizeQuery>,
) -> Result<Json<EstimateSizeResponse>, WebError> {
    let record = lookup(&state, &query.layer_id)?;
    let bytes = estimate_bytes(&record);
    Ok(Json(EstimateSizeResponse {
        human_readable: format_bytes(bytes),
        bytes,
    }))
}
