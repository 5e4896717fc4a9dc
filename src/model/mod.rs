//! Model-facing interfaces.
//!
//! Strata never parses model files itself; that work belongs to loader
//! backends behind the traits in this module. The core only needs two
//! things from a model: a way to observe an eager-execution graph node by
//! node ([`EagerModel`]), and a way to rebuild and run a static-graph
//! session with extra declared outputs ([`StaticBackend`] /
//! [`StaticSession`]).

pub mod input;
pub mod loader;
pub mod mock;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};

/// Value flowing between nodes of an eager graph.
///
/// Modeled as a closed tagged union instead of duck-typed probing: a node's
/// input or output is a single tensor, an ordered collection, a structured
/// result with named tensor fields, or nothing at all.
#[derive(Debug, Clone)]
pub enum NodeValue {
    Tensor(Tensor),
    Seq(Vec<NodeValue>),
    Fields(Vec<(String, NodeValue)>),
    Absent,
}

impl NodeValue {
    pub fn tensor(t: Tensor) -> Self {
        NodeValue::Tensor(t)
    }
}

/// Structural description of one eager node, root excluded.
#[derive(Debug, Clone)]
pub struct EagerNodeInfo {
    /// Structural name, e.g. `encoder.layer.0`.
    pub name: String,
    /// Module type tag, e.g. `Linear`.
    pub kind: String,
    /// Parameters owned directly by the node.
    pub param_count: usize,
    pub trainable_param_count: usize,
}

/// Opaque handle for one registered capture callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(pub u64);

/// Callback invoked synchronously when a node executes: `(inputs, outputs)`.
pub type ForwardHook = Arc<dyn Fn(&NodeValue, &NodeValue) + Send + Sync>;

/// A model whose structure is walked live during execution.
pub trait EagerModel: Send + Sync {
    /// Non-root nodes in structural order.
    fn nodes(&self) -> Vec<EagerNodeInfo>;

    /// Install a forward hook on the named node for the next pass.
    fn register_hook(&self, node: &str, hook: ForwardHook) -> Result<HookId>;

    /// Remove a previously installed hook. Removing an unknown handle is a
    /// no-op so that cleanup never fails.
    fn remove_hook(&self, id: HookId);

    /// Run one forward pass.
    fn forward(&self, input: &PreparedInput) -> Result<NodeValue>;
}

/// Name plus optional per-dimension shape of a graph input or output.
/// `None` dimensions are symbolic/unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    #[serde(default)]
    pub shape: Option<Vec<Option<usize>>>,
}

/// One operation of a static graph definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticNode {
    pub id: String,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Ahead-of-time graph definition, mutable only through introspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticGraphDef {
    pub nodes: Vec<StaticNode>,
    pub inputs: Vec<TensorSpec>,
    /// Declared graph outputs; the only tensors a plain session returns.
    pub outputs: Vec<TensorSpec>,
}

impl StaticGraphDef {
    pub fn declares_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|spec| spec.name == name)
    }
}

/// Loads graph definitions and instantiates executable sessions for them.
pub trait StaticBackend: Send + Sync {
    fn load_graph(&self, path: &std::path::Path) -> Result<StaticGraphDef>;

    /// Best-effort shape inference over a (possibly augmented) definition.
    /// Failure is non-fatal for callers; shapes simply stay unresolved.
    fn infer_shapes(&self, def: &mut StaticGraphDef) -> Result<()>;

    fn build_session(&self, def: &StaticGraphDef) -> Result<Arc<dyn StaticSession>>;
}

/// Compiled, executable form of a static graph. Only returns outputs that
/// were declared when the session was built.
pub trait StaticSession: Send + Sync {
    fn inputs(&self) -> Vec<TensorSpec>;
    fn outputs(&self) -> Vec<String>;

    /// Run once, fetching the named outputs in order.
    fn run(&self, feeds: &HashMap<String, Tensor>, fetch: &[String]) -> Result<Vec<Tensor>>;
}

/// Viewer-facing node of the unified graph description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub param_count: usize,
    #[serde(default)]
    pub trainable_params: usize,
    #[serde(default)]
    pub input_refs: Vec<String>,
    #[serde(default)]
    pub output_refs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

/// Unified graph description returned to viewers on model load. The core
/// treats this as a read-only source of node identities and order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDescription {
    pub model_type: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub total_params: usize,
    pub trainable_params: usize,
}

/// A loaded model ready for instrumented inference.
#[derive(Clone)]
pub enum LoadedModel {
    Eager(Arc<dyn EagerModel>),
    Static {
        session: Arc<dyn StaticSession>,
        backend: Arc<dyn StaticBackend>,
        /// Original model file; required only for full-intermediate
        /// introspection, which rebuilds the session from it.
        source_path: Option<PathBuf>,
    },
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadedModel::Eager(_) => f.debug_tuple("Eager").finish_non_exhaustive(),
            LoadedModel::Static { source_path, .. } => f
                .debug_struct("Static")
                .field("source_path", source_path)
                .finish_non_exhaustive(),
        }
    }
}

/// Model-ready input: one tensor, or named tensors for multi-input models.
#[derive(Debug, Clone)]
pub enum PreparedInput {
    Tensor(Tensor),
    Named(Vec<(String, Tensor)>),
}

impl PreparedInput {
    /// The tensor a single-input execution path should consume. Named text
    /// inputs carry it under `input_ids`; anything else is unusable for a
    /// static-graph run.
    pub fn primary(&self) -> Result<&Tensor> {
        match self {
            PreparedInput::Tensor(t) => Ok(t),
            PreparedInput::Named(entries) => entries
                .iter()
                .find(|(name, _)| name == "input_ids")
                .map(|(_, t)| t)
                .ok_or_else(|| {
                    StrataError::InvalidInput(
                        "named input produced no input_ids tensor".to_string(),
                    )
                }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        match self {
            PreparedInput::Tensor(_) => None,
            PreparedInput::Named(entries) => entries
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, t)| t),
        }
    }
}
