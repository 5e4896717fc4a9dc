//! Capture point registry for eager-execution graphs.
//!
//! A [`HookSet`] attaches one capture callback per non-root node before a
//! pass and removes every callback when it goes out of scope, whether the
//! pass succeeded or not. Per-node capture is best-effort: a node whose
//! tensors cannot be extracted is logged and skipped, and must never abort
//! the pass or starve sibling nodes of their records.

use std::sync::Arc;

use candle_core::Tensor;

use crate::error::Result;
use crate::model::{EagerModel, EagerNodeInfo, ForwardHook, HookId, NodeValue};
use crate::stream::StreamSender;

use super::cache::SharedCache;
use super::record::{compute_stats, empty_tensor, normalize_id, CaptureRecord};

/// Output field names recognized as tensor carriers on structured results.
const OUTPUT_FIELD_CARRIERS: [&str; 2] = ["last_hidden_state", "logits"];

/// First tensor found depth-first across a value's alternatives.
pub fn first_input_tensor(value: &NodeValue) -> Option<&Tensor> {
    match value {
        NodeValue::Tensor(t) => Some(t),
        NodeValue::Seq(items) => items.iter().find_map(first_input_tensor),
        NodeValue::Fields(_) | NodeValue::Absent => None,
    }
}

/// First tensor found depth-first, additionally recognizing the well-known
/// output-carrier field names on structured results.
pub fn first_output_tensor(value: &NodeValue) -> Option<&Tensor> {
    match value {
        NodeValue::Tensor(t) => Some(t),
        NodeValue::Seq(items) => items.iter().find_map(first_output_tensor),
        NodeValue::Fields(fields) => OUTPUT_FIELD_CARRIERS.iter().find_map(|carrier| {
            fields
                .iter()
                .find(|(name, _)| name == carrier)
                .and_then(|(_, value)| first_output_tensor(value))
        }),
        NodeValue::Absent => None,
    }
}

/// Capture one node's snapshot into the cache and onto the stream.
///
/// Returns `Ok(false)` when the node is skipped because no output tensor
/// could be extracted; errors cover everything else that went wrong while
/// building the record.
fn capture_node(
    info: &EagerNodeInfo,
    inputs: &NodeValue,
    outputs: &NodeValue,
    cache: &SharedCache,
    stream: &StreamSender,
) -> Result<bool> {
    let id = normalize_id(&info.name);

    let Some(output_value) = first_output_tensor(outputs) else {
        return Ok(false);
    };
    let input_value = match first_input_tensor(inputs) {
        Some(t) => t.clone(),
        None => empty_tensor()?,
    };

    let stats = compute_stats(output_value)?;
    let record = Arc::new(CaptureRecord {
        id: id.clone(),
        display_name: info.name.clone(),
        kind: info.kind.clone(),
        param_count: info.param_count,
        trainable_param_count: info.trainable_param_count,
        input_shape: input_value.dims().to_vec(),
        output_shape: output_value.dims().to_vec(),
        stats,
        input_value,
        output_value: output_value.clone(),
    });

    let projection = record.to_stream_record()?;
    cache.write().put(id, record);
    stream.push_record(projection);
    Ok(true)
}

/// Scoped set of capture callbacks attached to every node of an eager model
/// for exactly one pass. Detaches all of them on drop.
pub struct HookSet {
    model: Arc<dyn EagerModel>,
    handles: Vec<HookId>,
}

impl HookSet {
    /// Attach one capture callback per non-root node. A node that refuses
    /// the hook is logged and left unobserved; attachment never fails as a
    /// whole.
    pub fn attach(
        model: Arc<dyn EagerModel>,
        cache: SharedCache,
        stream: StreamSender,
    ) -> Self {
        let mut handles = Vec::new();
        for info in model.nodes() {
            let cache = cache.clone();
            let stream = stream.clone();
            let node = info.clone();
            let hook: ForwardHook = Arc::new(move |inputs, outputs| {
                match capture_node(&node, inputs, outputs, &cache, &stream) {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::warn!(
                            node = %node.name,
                            "no output tensor to capture; skipping node"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(
                            node = %node.name,
                            error = %err,
                            "capture failed; skipping node"
                        );
                    }
                }
            });
            match model.register_hook(&info.name, hook) {
                Ok(id) => handles.push(id),
                Err(err) => {
                    tracing::warn!(node = %info.name, error = %err, "could not attach capture hook");
                }
            }
        }
        Self { model, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Drop for HookSet {
    fn drop(&mut self) {
        for id in self.handles.drain(..) {
            self.model.remove_hook(id);
        }
    }
}
