//! Deterministic mock models for tests and the demo loader.
//!
//! These implement the model-facing traits without any real runtime so the
//! capture pipeline can be exercised end to end: a configurable eager node
//! chain with hook support and failure injection, and a static backend
//! whose sessions produce stable synthetic outputs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use candle_core::{Device, Tensor};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::{Result, StrataError};

use super::{
    EagerModel, EagerNodeInfo, ForwardHook, HookId, NodeValue, PreparedInput, StaticBackend,
    StaticGraphDef, StaticSession, TensorSpec,
};

/// Elementwise operation applied by one mock eager node.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MockOp {
    Affine { mul: f64, add: f64 },
    Relu,
    Tanh,
}

impl MockOp {
    fn apply(&self, x: &Tensor) -> Result<Tensor> {
        let y = match self {
            MockOp::Affine { mul, add } => x.affine(*mul, *add)?,
            MockOp::Relu => x.relu()?,
            MockOp::Tanh => x.tanh()?,
        };
        Ok(y)
    }
}

/// How a mock node wraps its output, covering every [`NodeValue`] variant
/// the capture path has to deal with.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockOutputStyle {
    /// A bare tensor.
    #[default]
    Tensor,
    /// A tuple-like collection with the tensor first.
    Seq,
    /// A structured result carrying the tensor under `last_hidden_state`.
    Hidden,
    /// A structured result carrying the tensor under `logits`.
    Logits,
    /// A structured result with no recognized carrier field; capture must
    /// skip this node without aborting the pass.
    Opaque,
}

/// Specification for one node of a mock eager model.
#[derive(Debug, Clone)]
pub struct MockNodeSpec {
    pub info: EagerNodeInfo,
    pub op: MockOp,
    pub output_style: MockOutputStyle,
}

/// Eager-execution model built from a chain of elementwise nodes.
pub struct MockEagerModel {
    specs: Vec<MockNodeSpec>,
    hooks: Mutex<Vec<(HookId, String, ForwardHook)>>,
    next_hook: AtomicU64,
    fail_at: Option<String>,
}

impl MockEagerModel {
    pub fn new() -> Self {
        Self {
            specs: Vec::new(),
            hooks: Mutex::new(Vec::new()),
            next_hook: AtomicU64::new(1),
            fail_at: None,
        }
    }

    pub fn with_node(
        mut self,
        name: &str,
        kind: &str,
        params: usize,
        op: MockOp,
        output_style: MockOutputStyle,
    ) -> Self {
        self.specs.push(MockNodeSpec {
            info: EagerNodeInfo {
                name: name.to_string(),
                kind: kind.to_string(),
                param_count: params,
                trainable_param_count: params,
            },
            op,
            output_style,
        });
        self
    }

    /// Make `forward` fail when it reaches the named node, after earlier
    /// nodes have executed and fired their hooks.
    pub fn failing_at(mut self, node: &str) -> Self {
        self.fail_at = Some(node.to_string());
        self
    }

    fn wrap_output(style: MockOutputStyle, tensor: Tensor) -> NodeValue {
        match style {
            MockOutputStyle::Tensor => NodeValue::Tensor(tensor),
            MockOutputStyle::Seq => {
                NodeValue::Seq(vec![NodeValue::Tensor(tensor), NodeValue::Absent])
            }
            MockOutputStyle::Hidden => NodeValue::Fields(vec![
                ("last_hidden_state".to_string(), NodeValue::Tensor(tensor)),
            ]),
            MockOutputStyle::Logits => NodeValue::Fields(vec![
                ("logits".to_string(), NodeValue::Tensor(tensor)),
            ]),
            MockOutputStyle::Opaque => NodeValue::Fields(vec![
                ("aux_state".to_string(), NodeValue::Tensor(tensor)),
            ]),
        }
    }

    fn fire_hooks(&self, node: &str, inputs: &NodeValue, outputs: &NodeValue) {
        let hooks: Vec<ForwardHook> = {
            let guard = self.hooks.lock();
            guard
                .iter()
                .filter(|(_, name, _)| name == node)
                .map(|(_, _, hook)| hook.clone())
                .collect()
        };
        for hook in hooks {
            hook(inputs, outputs);
        }
    }
}

impl Default for MockEagerModel {
    fn default() -> Self {
        Self::new()
    }
}

impl EagerModel for MockEagerModel {
    fn nodes(&self) -> Vec<EagerNodeInfo> {
        self.specs.iter().map(|s| s.info.clone()).collect()
    }

    fn register_hook(&self, node: &str, hook: ForwardHook) -> Result<HookId> {
        if !self.specs.iter().any(|s| s.info.name == node) {
            return Err(StrataError::NotFound(format!("no such node: {node}")));
        }
        let id = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        self.hooks.lock().push((id, node.to_string(), hook));
        Ok(id)
    }

    fn remove_hook(&self, id: HookId) {
        self.hooks.lock().retain(|(hook_id, _, _)| *hook_id != id);
    }

    fn forward(&self, input: &PreparedInput) -> Result<NodeValue> {
        let mut current = input.primary()?.clone();
        for spec in &self.specs {
            if self.fail_at.as_deref() == Some(spec.info.name.as_str()) {
                return Err(StrataError::Execution(format!(
                    "mock node {} raised",
                    spec.info.name
                )));
            }
            let inputs = NodeValue::Seq(vec![NodeValue::Tensor(current.clone())]);
            let next = spec.op.apply(&current)?;
            let outputs = Self::wrap_output(spec.output_style, next.clone());
            self.fire_hooks(&spec.info.name, &inputs, &outputs);
            current = next;
        }
        Ok(NodeValue::Tensor(current))
    }
}

/// Static session producing stable synthetic tensors for whatever outputs
/// it is asked to fetch.
pub struct MockStaticSession {
    def: StaticGraphDef,
}

impl MockStaticSession {
    fn output_shape(&self, name: &str) -> Vec<usize> {
        self.def
            .outputs
            .iter()
            .find(|spec| spec.name == name)
            .and_then(|spec| spec.shape.as_ref())
            .map(|dims| dims.iter().map(|d| d.unwrap_or(1)).collect())
            .unwrap_or_else(|| vec![1, 4])
    }

    fn synth(name: &str, count: usize, base: f32) -> Vec<f32> {
        let seed = name.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        let offset = (seed % 97) as f32 * 0.1;
        (0..count).map(|i| base + offset + i as f32 * 0.5).collect()
    }
}

impl StaticSession for MockStaticSession {
    fn inputs(&self) -> Vec<TensorSpec> {
        self.def.inputs.clone()
    }

    fn outputs(&self) -> Vec<String> {
        self.def.outputs.iter().map(|s| s.name.clone()).collect()
    }

    fn run(&self, feeds: &HashMap<String, Tensor>, fetch: &[String]) -> Result<Vec<Tensor>> {
        for spec in &self.def.inputs {
            if !feeds.contains_key(&spec.name) {
                return Err(StrataError::Execution(format!(
                    "missing feed for graph input {}",
                    spec.name
                )));
            }
        }
        // Outputs depend on the primary feed so reruns with different
        // inputs are distinguishable.
        let base = self
            .def
            .inputs
            .first()
            .and_then(|spec| feeds.get(&spec.name))
            .map(|t| crate::capture::record::flatten_to_vec(t).map(|v| v.iter().sum::<f32>()))
            .transpose()?
            .unwrap_or(0.0);

        fetch
            .iter()
            .map(|name| {
                if !self.def.declares_output(name) {
                    return Err(StrataError::Execution(format!(
                        "output {name} was not declared when the session was built"
                    )));
                }
                let shape = self.output_shape(name);
                let count = shape.iter().product::<usize>().max(1);
                let shape = if shape.is_empty() { vec![1] } else { shape };
                let values = Self::synth(name, count, base);
                Ok(Tensor::from_vec(values, shape, &Device::Cpu)?)
            })
            .collect()
    }
}

/// Static backend over a fixed in-memory graph definition.
pub struct MockStaticBackend {
    def: StaticGraphDef,
    fail_shape_inference: bool,
}

impl MockStaticBackend {
    pub fn new(def: StaticGraphDef) -> Self {
        Self {
            def,
            fail_shape_inference: false,
        }
    }

    /// Make `infer_shapes` fail; introspection must survive this.
    pub fn with_failing_shape_inference(mut self) -> Self {
        self.fail_shape_inference = true;
        self
    }
}

impl StaticBackend for MockStaticBackend {
    fn load_graph(&self, _path: &std::path::Path) -> Result<StaticGraphDef> {
        Ok(self.def.clone())
    }

    fn infer_shapes(&self, def: &mut StaticGraphDef) -> Result<()> {
        if self.fail_shape_inference {
            return Err(StrataError::Execution(
                "mock shape inference failure".to_string(),
            ));
        }
        for spec in &mut def.outputs {
            if spec.shape.is_none() {
                spec.shape = Some(vec![Some(1), Some(4)]);
            }
        }
        Ok(())
    }

    fn build_session(&self, def: &StaticGraphDef) -> Result<Arc<dyn StaticSession>> {
        Ok(Arc::new(MockStaticSession { def: def.clone() }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_def() -> StaticGraphDef {
        StaticGraphDef {
            nodes: vec![super::super::StaticNode {
                id: "gemm_0".to_string(),
                name: "/model/Gemm".to_string(),
                kind: "Gemm".to_string(),
                inputs: vec!["input".to_string()],
                outputs: vec!["hidden".to_string()],
            }],
            inputs: vec![TensorSpec {
                name: "input".to_string(),
                shape: Some(vec![Some(1), Some(4)]),
            }],
            outputs: vec![TensorSpec {
                name: "hidden".to_string(),
                shape: Some(vec![Some(1), Some(2)]),
            }],
        }
    }

    #[test]
    fn session_refuses_undeclared_outputs() {
        let backend = MockStaticBackend::new(graph_def());
        let session = backend.build_session(&graph_def()).unwrap();
        let mut feeds = HashMap::new();
        feeds.insert(
            "input".to_string(),
            Tensor::zeros((1, 4), candle_core::DType::F32, &Device::Cpu).unwrap(),
        );
        let err = session
            .run(&feeds, &["not_declared".to_string()])
            .unwrap_err();
        assert!(matches!(err, StrataError::Execution(_)));
    }

    #[test]
    fn session_outputs_are_deterministic() {
        let backend = MockStaticBackend::new(graph_def());
        let session = backend.build_session(&graph_def()).unwrap();
        let mut feeds = HashMap::new();
        feeds.insert(
            "input".to_string(),
            Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (1, 4), &Device::Cpu).unwrap(),
        );
        let a = session.run(&feeds, &["hidden".to_string()]).unwrap();
        let b = session.run(&feeds, &["hidden".to_string()]).unwrap();
        assert_eq!(
            a[0].flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            b[0].flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
        assert_eq!(a[0].dims(), &[1, 2]);
    }

    #[test]
    fn eager_hooks_fire_per_node_and_detach() {
        use std::sync::atomic::AtomicUsize;

        let model = MockEagerModel::new()
            .with_node("fc1", "Linear", 8, MockOp::Affine { mul: 2.0, add: 0.0 }, MockOutputStyle::Tensor)
            .with_node("act", "Relu", 0, MockOp::Relu, MockOutputStyle::Seq);

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_ref = fired.clone();
        let hook: ForwardHook = Arc::new(move |_, _| {
            fired_ref.fetch_add(1, Ordering::Relaxed);
        });
        let id = model.register_hook("fc1", hook).unwrap();

        let input = PreparedInput::Tensor(
            Tensor::from_vec(vec![1.0f32, -1.0], (2,), &Device::Cpu).unwrap(),
        );
        model.forward(&input).unwrap();
        assert_eq!(fired.load(Ordering::Relaxed), 1);

        model.remove_hook(id);
        model.forward(&input).unwrap();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }
}
