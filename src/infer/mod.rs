//! Inference orchestration: the single entry point that drives one
//! instrumented pass.
//!
//! A run clears the capture cache, dispatches on the model kind, drives
//! exactly one pass, and guarantees one terminal sentinel on the stream on
//! every code path. Validation failures (no model, unusable input) surface
//! before the cache is touched; an execution failure mid-pass leaves the
//! cache partially populated with no rollback.

pub mod introspect;

use std::collections::HashMap;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use parking_lot::Mutex;

use crate::capture::cache::SharedCache;
use crate::capture::hooks::HookSet;
use crate::capture::record::{compute_stats, empty_tensor, normalize_id, CaptureRecord};
use crate::error::{Result, StrataError};
use crate::model::{
    EagerModel, GraphDescription, LoadedModel, PreparedInput, StaticSession, TensorSpec,
};
use crate::stream::StreamSender;

use introspect::IntrospectedSession;

/// Per-run options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Static graphs only: rebuild the session so every intermediate tensor
    /// is captured, instead of only the declared outputs.
    pub introspect: bool,
}

/// A loaded model plus its graph description and the lazily built
/// introspected session.
pub struct ModelState {
    pub model: LoadedModel,
    pub graph: GraphDescription,
    introspected: Mutex<Option<Arc<IntrospectedSession>>>,
}

impl ModelState {
    pub fn new(model: LoadedModel, graph: GraphDescription) -> Self {
        Self {
            model,
            graph,
            introspected: Mutex::new(None),
        }
    }

    /// Build the introspected session once per model load and reuse it on
    /// later runs.
    fn introspected_session(&self) -> Result<Arc<IntrospectedSession>> {
        let LoadedModel::Static {
            backend,
            source_path,
            ..
        } = &self.model
        else {
            return Err(StrataError::InvalidInput(
                "introspection only applies to static-graph models".to_string(),
            ));
        };
        let mut slot = self.introspected.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        let path = source_path.as_ref().ok_or_else(|| {
            StrataError::InvalidInput(
                "introspection requires the original model file path".to_string(),
            )
        })?;
        let built = Arc::new(IntrospectedSession::build(backend, path)?);
        *slot = Some(built.clone());
        Ok(built)
    }
}

/// Run one instrumented inference pass.
///
/// Returns the captured node ids in capture order. Exactly one sentinel is
/// pushed onto the stream for every run that got past validation, success
/// or failure; a full queue drops it rather than retrying.
pub fn run_inference(
    model: Option<&ModelState>,
    input: &PreparedInput,
    options: RunOptions,
    cache: &SharedCache,
    stream: &StreamSender,
) -> Result<Vec<String>> {
    let state = model.ok_or_else(|| {
        StrataError::NotFound("no model loaded; load a model first".to_string())
    })?;

    // Surface input/option problems before any destructive cache mutation.
    if let LoadedModel::Static { source_path, .. } = &state.model {
        input.primary()?;
        if options.introspect && source_path.is_none() {
            return Err(StrataError::InvalidInput(
                "introspection requires the original model file path".to_string(),
            ));
        }
    }

    cache.write().clear();

    let result = match &state.model {
        LoadedModel::Eager(model) => run_eager(model, input, cache, stream),
        LoadedModel::Static { session, .. } => {
            if options.introspect {
                state
                    .introspected_session()
                    .and_then(|intro| run_static_introspected(&intro, input, cache, stream))
            } else {
                run_static_declared(session, &state.graph, input, cache, stream)
            }
        }
    };

    stream.push_sentinel();
    result
}

/// Eager path: capture hooks observe the pass; they detach on every exit.
fn run_eager(
    model: &Arc<dyn EagerModel>,
    input: &PreparedInput,
    cache: &SharedCache,
    stream: &StreamSender,
) -> Result<Vec<String>> {
    let hooks = HookSet::attach(model.clone(), cache.clone(), stream.clone());
    let outcome = model.forward(input);
    drop(hooks);
    outcome.map_err(|err| match err {
        StrataError::Execution(_) => err,
        other => StrataError::Execution(other.to_string()),
    })?;
    Ok(cache.read().ids())
}

/// Static path without introspection: fetch only the first declared output
/// of each graph node that lists one.
fn run_static_declared(
    session: &Arc<dyn StaticSession>,
    graph: &GraphDescription,
    input: &PreparedInput,
    cache: &SharedCache,
    stream: &StreamSender,
) -> Result<Vec<String>> {
    let declaring: Vec<&crate::model::GraphNode> = graph
        .nodes
        .iter()
        .filter(|node| !node.output_refs.is_empty())
        .collect();
    if declaring.is_empty() {
        return Ok(Vec::new());
    }
    let fetch: Vec<String> = declaring
        .iter()
        .map(|node| node.output_refs[0].clone())
        .collect();

    let mut feeds = HashMap::new();
    if let Some(first) = session.inputs().first() {
        feeds.insert(first.name.clone(), input.primary()?.clone());
    }

    let outputs = session
        .run(&feeds, &fetch)
        .map_err(|err| StrataError::Execution(err.to_string()))?;

    let mut ids = Vec::with_capacity(outputs.len());
    for (node, tensor) in declaring.iter().zip(outputs) {
        let record = static_record(
            node.id.clone(),
            node.name.clone(),
            node.kind.clone(),
            node.param_count,
            node.trainable_params,
            tensor,
        )?;
        let projection = record.to_stream_record()?;
        cache.write().put(node.id.clone(), Arc::new(record));
        stream.push_record(projection);
        ids.push(node.id.clone());
    }
    Ok(ids)
}

/// Static path with introspection: one record per produced output, stored
/// under both its raw and normalized id.
fn run_static_introspected(
    intro: &IntrospectedSession,
    input: &PreparedInput,
    cache: &SharedCache,
    stream: &StreamSender,
) -> Result<Vec<String>> {
    let session = intro.session();
    let feeds = assemble_feeds(&session.inputs(), input)?;
    let fetch = intro.output_names().to_vec();
    if fetch.is_empty() {
        return Ok(Vec::new());
    }

    let outputs = session
        .run(&feeds, &fetch)
        .map_err(|err| StrataError::Execution(err.to_string()))?;

    let mut ids = Vec::with_capacity(outputs.len());
    for (raw, tensor) in fetch.iter().zip(outputs) {
        let normalized = normalize_id(raw);
        let id = if normalized.is_empty() {
            raw.clone()
        } else {
            normalized.clone()
        };
        let kind = intro
            .node_for_output(raw)
            .map(|node| node.kind.clone())
            .unwrap_or_else(|| "Output".to_string());
        let record = Arc::new(static_record(id.clone(), raw.clone(), kind, 0, 0, tensor)?);
        let projection = record.to_stream_record()?;
        {
            let mut cache = cache.write();
            cache.put(raw.clone(), record.clone());
            if &id != raw {
                cache.put(id.clone(), record);
            }
        }
        stream.push_record(projection);
        ids.push(id);
    }
    Ok(ids)
}

/// Build a record for a static output. The static path cannot attribute an
/// output to a specific incoming tensor, so input fields stay empty.
fn static_record(
    id: String,
    display_name: String,
    kind: String,
    param_count: usize,
    trainable_param_count: usize,
    output: Tensor,
) -> Result<CaptureRecord> {
    let stats = compute_stats(&output)?;
    Ok(CaptureRecord {
        id,
        display_name,
        kind,
        param_count,
        trainable_param_count,
        input_value: empty_tensor()?,
        input_shape: Vec::new(),
        output_shape: output.dims().to_vec(),
        stats,
        output_value: output,
    })
}

/// Feed every declared session input: named tensors by name, the primary
/// tensor for the first unmatched input, zero-valued tensors for the rest.
/// Unknown dimensions default to 1; a wholly unknown shape becomes a single
/// element.
fn assemble_feeds(
    specs: &[TensorSpec],
    input: &PreparedInput,
) -> Result<HashMap<String, Tensor>> {
    let mut feeds = HashMap::new();
    let mut primary_used = false;
    for spec in specs {
        if let Some(named) = input.get(&spec.name) {
            feeds.insert(spec.name.clone(), named.clone());
            continue;
        }
        if !primary_used {
            feeds.insert(spec.name.clone(), input.primary()?.clone());
            primary_used = true;
            continue;
        }
        feeds.insert(spec.name.clone(), zero_feed(spec)?);
    }
    Ok(feeds)
}

fn zero_feed(spec: &TensorSpec) -> Result<Tensor> {
    let dims: Vec<usize> = match &spec.shape {
        Some(dims) if !dims.is_empty() => dims.iter().map(|d| d.unwrap_or(1)).collect(),
        _ => vec![1],
    };
    Ok(Tensor::zeros(dims, DType::F32, &Device::Cpu)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::cache::CaptureCache;
    use crate::model::mock::{
        MockEagerModel, MockOp, MockOutputStyle, MockStaticBackend,
    };
    use crate::model::{GraphEdge, GraphNode, StaticBackend, StaticGraphDef, StaticNode};
    use crate::stream::{stream_channel, StreamItem, StreamReceiver};

    fn eager_three_nodes() -> MockEagerModel {
        MockEagerModel::new()
            .with_node("fc1", "Linear", 8, MockOp::Affine { mul: 2.0, add: 1.0 }, MockOutputStyle::Tensor)
            .with_node("act", "Relu", 0, MockOp::Relu, MockOutputStyle::Seq)
            .with_node("head", "Linear", 4, MockOp::Affine { mul: 0.5, add: 0.0 }, MockOutputStyle::Logits)
    }

    fn tensor_input() -> PreparedInput {
        PreparedInput::Tensor(
            Tensor::from_vec(vec![1.0f32, -2.0, 3.0], (1, 3), &Device::Cpu).unwrap(),
        )
    }

    fn eager_state(model: MockEagerModel) -> ModelState {
        ModelState::new(
            LoadedModel::Eager(Arc::new(model)),
            GraphDescription {
                model_type: "eager".to_string(),
                nodes: Vec::new(),
                edges: Vec::new(),
                total_params: 12,
                trainable_params: 12,
            },
        )
    }

    fn static_state(def: StaticGraphDef, nodes: Vec<GraphNode>) -> ModelState {
        let backend: Arc<dyn StaticBackend> = Arc::new(MockStaticBackend::new(def.clone()));
        let session = backend.build_session(&def).unwrap();
        ModelState::new(
            LoadedModel::Static {
                session,
                backend,
                source_path: Some(std::path::PathBuf::from("model.json")),
            },
            GraphDescription {
                model_type: "static".to_string(),
                nodes,
                edges: Vec::<GraphEdge>::new(),
                total_params: 0,
                trainable_params: 0,
            },
        )
    }

    fn two_node_def() -> StaticGraphDef {
        StaticGraphDef {
            nodes: vec![
                StaticNode {
                    id: "gemm_0".to_string(),
                    name: "/model/Gemm".to_string(),
                    kind: "Gemm".to_string(),
                    inputs: vec!["input".to_string()],
                    outputs: vec!["hidden".to_string()],
                },
                StaticNode {
                    id: "relu_0".to_string(),
                    name: "/model/Relu".to_string(),
                    kind: "Relu".to_string(),
                    inputs: vec!["hidden".to_string()],
                    outputs: vec!["output".to_string()],
                },
            ],
            inputs: vec![TensorSpec {
                name: "input".to_string(),
                shape: Some(vec![Some(1), Some(3)]),
            }],
            outputs: vec![TensorSpec {
                name: "output".to_string(),
                shape: Some(vec![Some(1), Some(4)]),
            }],
        }
    }

    fn drain_stream(rx: &mut StreamReceiver) -> (usize, usize) {
        let mut records = 0;
        let mut sentinels = 0;
        loop {
            match rx.try_recv() {
                Some(StreamItem::Record(_)) => records += 1,
                Some(StreamItem::Sentinel) => sentinels += 1,
                None => break,
            }
        }
        (records, sentinels)
    }

    #[test]
    fn eager_run_captures_every_node_in_order() {
        let cache = CaptureCache::shared();
        let (tx, mut rx) = stream_channel(64);
        let state = eager_state(eager_three_nodes());

        let ids =
            run_inference(Some(&state), &tensor_input(), RunOptions::default(), &cache, &tx)
                .unwrap();
        assert_eq!(ids, vec!["fc1", "act", "head"]);

        let (records, sentinels) = drain_stream(&mut rx);
        assert_eq!(records, 3);
        assert_eq!(sentinels, 1);

        let guard = cache.read();
        let head = guard.get("head").unwrap();
        assert_eq!(head.kind, "Linear");
        assert_eq!(head.param_count, 4);
        assert_eq!(head.input_shape, vec![1, 3]);
    }

    #[test]
    fn one_failing_extractor_does_not_starve_siblings() {
        let model = MockEagerModel::new()
            .with_node("a", "Linear", 0, MockOp::Affine { mul: 1.0, add: 0.0 }, MockOutputStyle::Tensor)
            .with_node("b", "Custom", 0, MockOp::Relu, MockOutputStyle::Opaque)
            .with_node("c", "Linear", 0, MockOp::Tanh, MockOutputStyle::Tensor);
        let cache = CaptureCache::shared();
        let (tx, _rx) = stream_channel(64);
        let state = eager_state(model);

        let ids =
            run_inference(Some(&state), &tensor_input(), RunOptions::default(), &cache, &tx)
                .unwrap();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(cache.read().len(), 2);
    }

    #[test]
    fn execution_failure_leaves_partial_cache_and_one_sentinel() {
        let model = eager_three_nodes().failing_at("head");
        let cache = CaptureCache::shared();
        let (tx, mut rx) = stream_channel(64);
        let state = eager_state(model);

        let err =
            run_inference(Some(&state), &tensor_input(), RunOptions::default(), &cache, &tx)
                .unwrap_err();
        assert!(matches!(err, StrataError::Execution(_)));

        // Nodes before the failure are captured; no rollback.
        assert_eq!(cache.read().ids(), vec!["fc1", "act"]);
        let (records, sentinels) = drain_stream(&mut rx);
        assert_eq!(records, 2);
        assert_eq!(sentinels, 1);
    }

    #[test]
    fn missing_model_is_not_found_and_cache_untouched() {
        let cache = CaptureCache::shared();
        cache.write().put(
            "stale",
            Arc::new(
                static_record(
                    "stale".to_string(),
                    "stale".to_string(),
                    "Linear".to_string(),
                    0,
                    0,
                    Tensor::from_vec(vec![1.0f32], (1,), &Device::Cpu).unwrap(),
                )
                .unwrap(),
            ),
        );
        let (tx, mut rx) = stream_channel(64);

        let err = run_inference(None, &tensor_input(), RunOptions::default(), &cache, &tx)
            .unwrap_err();
        assert!(matches!(err, StrataError::NotFound(_)));
        assert_eq!(cache.read().len(), 1);
        let (_, sentinels) = drain_stream(&mut rx);
        assert_eq!(sentinels, 0);
    }

    #[test]
    fn rerun_replaces_previous_records_wholesale() {
        let cache = CaptureCache::shared();
        let (tx, mut rx) = stream_channel(64);
        let state = eager_state(eager_three_nodes());

        run_inference(Some(&state), &tensor_input(), RunOptions::default(), &cache, &tx)
            .unwrap();
        let first = cache.read().get("fc1").unwrap();

        run_inference(Some(&state), &tensor_input(), RunOptions::default(), &cache, &tx)
            .unwrap();
        let second = cache.read().get("fc1").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(cache.read().len(), 3);

        let (records, sentinels) = drain_stream(&mut rx);
        assert_eq!(records, 6);
        assert_eq!(sentinels, 2);
    }

    #[test]
    fn static_declared_run_fetches_first_output_per_node() {
        let def = two_node_def();
        let nodes = vec![
            GraphNode {
                id: "gemm_0".to_string(),
                name: "/model/Gemm".to_string(),
                kind: "Gemm".to_string(),
                param_count: 0,
                trainable_params: 0,
                input_refs: vec!["input".to_string()],
                output_refs: vec!["hidden".to_string()],
            },
            GraphNode {
                id: "relu_0".to_string(),
                name: "/model/Relu".to_string(),
                kind: "Relu".to_string(),
                param_count: 0,
                trainable_params: 0,
                input_refs: vec!["hidden".to_string()],
                output_refs: vec!["output".to_string()],
            },
        ];
        // The plain session only declares "output", so fetching "hidden"
        // fails: restrict the graph nodes to the declared one.
        let state = static_state(def, vec![nodes[1].clone()]);
        let cache = CaptureCache::shared();
        let (tx, mut rx) = stream_channel(64);

        let ids =
            run_inference(Some(&state), &tensor_input(), RunOptions::default(), &cache, &tx)
                .unwrap();
        assert_eq!(ids, vec!["relu_0"]);

        let guard = cache.read();
        let record = guard.get("relu_0").unwrap();
        assert_eq!(record.kind, "Relu");
        assert_eq!(record.input_shape, Vec::<usize>::new());
        assert_eq!(record.input_value.elem_count(), 0);
        drop(guard);

        let (records, sentinels) = drain_stream(&mut rx);
        assert_eq!(records, 1);
        assert_eq!(sentinels, 1);
    }

    #[test]
    fn static_run_with_zero_declaring_nodes_emits_only_sentinel() {
        let state = static_state(two_node_def(), Vec::new());
        let cache = CaptureCache::shared();
        let (tx, mut rx) = stream_channel(64);

        let ids =
            run_inference(Some(&state), &tensor_input(), RunOptions::default(), &cache, &tx)
                .unwrap();
        assert!(ids.is_empty());
        assert!(cache.read().is_empty());

        let (records, sentinels) = drain_stream(&mut rx);
        assert_eq!(records, 0);
        assert_eq!(sentinels, 1);
    }

    #[test]
    fn introspected_run_captures_every_intermediate() {
        let state = static_state(two_node_def(), Vec::new());
        let cache = CaptureCache::shared();
        let (tx, mut rx) = stream_channel(64);
        let options = RunOptions { introspect: true };

        let ids = run_inference(Some(&state), &tensor_input(), options, &cache, &tx).unwrap();
        // Augmented session order: declared output first, then intermediates.
        assert_eq!(ids, vec!["output", "hidden"]);

        let guard = cache.read();
        assert_eq!(guard.get("hidden").unwrap().kind, "Gemm");
        assert_eq!(guard.get("output").unwrap().kind, "Relu");
        drop(guard);

        let (records, sentinels) = drain_stream(&mut rx);
        assert_eq!(records, 2);
        assert_eq!(sentinels, 1);
    }

    #[test]
    fn introspected_records_live_under_raw_and_normalized_ids() {
        let mut def = two_node_def();
        def.nodes[0].outputs = vec!["model/hidden:0".to_string()];
        def.nodes[1].inputs = vec!["model/hidden:0".to_string()];
        let state = static_state(def, Vec::new());
        let cache = CaptureCache::shared();
        let (tx, _rx) = stream_channel(64);

        let ids = run_inference(
            Some(&state),
            &tensor_input(),
            RunOptions { introspect: true },
            &cache,
            &tx,
        )
        .unwrap();
        assert!(ids.contains(&"model_hidden_0".to_string()));

        let guard = cache.read();
        let by_raw = guard.get("model/hidden:0").unwrap();
        let by_norm = guard.get("model_hidden_0").unwrap();
        assert!(Arc::ptr_eq(&by_raw, &by_norm));
    }

    #[test]
    fn introspection_without_source_path_is_invalid_input() {
        let def = two_node_def();
        let backend: Arc<dyn StaticBackend> = Arc::new(MockStaticBackend::new(def.clone()));
        let session = backend.build_session(&def).unwrap();
        let state = ModelState::new(
            LoadedModel::Static {
                session,
                backend,
                source_path: None,
            },
            GraphDescription {
                model_type: "static".to_string(),
                nodes: Vec::new(),
                edges: Vec::new(),
                total_params: 0,
                trainable_params: 0,
            },
        );
        let cache = CaptureCache::shared();
        cache.write().clear();
        let (tx, _rx) = stream_channel(64);

        let err = run_inference(
            Some(&state),
            &tensor_input(),
            RunOptions { introspect: true },
            &cache,
            &tx,
        )
        .unwrap_err();
        assert!(matches!(err, StrataError::InvalidInput(_)));
    }
}
