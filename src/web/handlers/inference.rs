//! Inference handler: one instrumented pass per request.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::infer::{self, RunOptions};
use crate::model::input::prepare_input;
use crate::web::error::WebError;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RunInferenceRequest {
    pub input_data: String,
    #[serde(default)]
    pub input_hint: String,
    /// Static graphs only: capture every intermediate tensor.
    #[serde(default)]
    pub introspect: bool,
}

#[derive(Debug, Serialize)]
pub struct RunInferenceResponse {
    pub layer_ids: Vec<String>,
}

/// Drain stale stream items, run one pass on a blocking thread, and return
/// the captured layer ids in capture order.
pub async fn run_inference(
    State(state): State<AppState>,
    Json(body): Json<RunInferenceRequest>,
) -> Result<Json<RunInferenceResponse>, WebError> {
    // A connected viewer holds the receiver lock and is already draining the
    // queue live; only an idle receiver needs stale items discarded here.
    if let Ok(mut rx) = state.stream_receiver().try_lock() {
        rx.drain();
    }

    let input = prepare_input(
        &body.input_data,
        &body.input_hint,
        state.tokenizer().map(|t| t.as_ref()),
    )?;

    let model = state.model().read().await.clone();
    let cache = state.cache().clone();
    let stream = state.stream_sender().clone();
    let options = RunOptions {
        introspect: body.introspect,
    };

    let layer_ids = tokio::task::spawn_blocking(move || {
        infer::run_inference(model.as_deref(), &input, options, &cache, &stream)
    })
    .await
    .map_err(|e| WebError::Internal(format!("inference task failed: {e}")))??;

    Ok(Json(RunInferenceResponse { layer_ids }))
}
