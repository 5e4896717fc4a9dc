//! Model loading: extension-dispatched loader registry.
//!
//! Parsing real model formats is a backend concern; Strata ships the
//! registry plus a JSON "demo bundle" loader backed by the mock
//! implementations, which gives the server and the test suite a complete
//! end-to-end path.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::capture::record::normalize_id;
use crate::error::{Result, StrataError};

use super::mock::{MockEagerModel, MockOp, MockOutputStyle, MockStaticBackend};
use super::{
    GraphDescription, GraphEdge, GraphNode, LoadedModel, StaticBackend, StaticGraphDef,
};

/// Loads one family of model files into a runnable model plus its graph
/// description.
pub trait ModelLoader: Send + Sync {
    /// Lowercase file extensions this loader accepts, without dots.
    fn supported_extensions(&self) -> &[&'static str];

    fn load(&self, path: &Path) -> Result<(LoadedModel, GraphDescription)>;
}

/// Extension-dispatched collection of loaders.
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    loaders: Vec<Arc<dyn ModelLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in demo bundle loader.
    pub fn with_defaults() -> Self {
        Self::new().register(Arc::new(DemoBundleLoader))
    }

    pub fn register(mut self, loader: Arc<dyn ModelLoader>) -> Self {
        self.loaders.push(loader);
        self
    }

    /// Load a model from disk based on its file extension.
    pub fn load(&self, path: &Path) -> Result<(LoadedModel, GraphDescription)> {
        if !path.exists() {
            return Err(StrataError::NotFound(format!(
                "no file found at {}",
                path.display()
            )));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        let loader = self
            .loaders
            .iter()
            .find(|l| l.supported_extensions().contains(&ext.as_str()))
            .ok_or_else(|| {
                let supported: Vec<&str> = self
                    .loaders
                    .iter()
                    .flat_map(|l| l.supported_extensions().iter().copied())
                    .collect();
                StrataError::UnsupportedFormat(format!(
                    "extension {ext:?} is not supported (supported: {})",
                    supported.join(", ")
                ))
            })?;
        loader.load(path)
    }
}

/// One node of an eager demo bundle.
#[derive(Debug, Deserialize)]
struct DemoNodeSpec {
    name: String,
    #[serde(default = "default_node_kind")]
    kind: String,
    #[serde(default)]
    params: usize,
    #[serde(flatten)]
    op: MockOp,
    #[serde(default)]
    output: MockOutputStyle,
}

fn default_node_kind() -> String {
    "Op".to_string()
}

/// JSON demo bundle: an eager node chain or a static graph definition.
#[derive(Debug, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
enum DemoBundle {
    Eager { nodes: Vec<DemoNodeSpec> },
    Static { graph: StaticGraphDef },
}

/// Loader for `.json` demo bundles, executed by the mock runtimes.
pub struct DemoBundleLoader;

impl ModelLoader for DemoBundleLoader {
    fn supported_extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn load(&self, path: &Path) -> Result<(LoadedModel, GraphDescription)> {
        let contents = fs::read_to_string(path)?;
        let bundle: DemoBundle = serde_json::from_str(&contents).map_err(|e| {
            StrataError::InvalidInput(format!("could not parse demo bundle: {e}"))
        })?;

        match bundle {
            DemoBundle::Eager { nodes } => {
                if nodes.is_empty() {
                    return Err(StrataError::InvalidInput(
                        "demo bundle declares no nodes".to_string(),
                    ));
                }
                let mut model = MockEagerModel::new();
                for spec in &nodes {
                    model = model.with_node(
                        &spec.name,
                        &spec.kind,
                        spec.params,
                        spec.op,
                        spec.output,
                    );
                }
                let graph = eager_graph_description(&nodes);
                Ok((LoadedModel::Eager(Arc::new(model)), graph))
            }
            DemoBundle::Static { graph } => {
                let description = static_graph_description(&graph);
                let backend: Arc<dyn StaticBackend> =
                    Arc::new(MockStaticBackend::new(graph.clone()));
                let session = backend.build_session(&graph)?;
                Ok((
                    LoadedModel::Static {
                        session,
                        backend,
                        source_path: Some(path.to_path_buf()),
                    },
                    description,
                ))
            }
        }
    }
}

fn eager_graph_description(nodes: &[DemoNodeSpec]) -> GraphDescription {
    let graph_nodes: Vec<GraphNode> = nodes
        .iter()
        .map(|spec| GraphNode {
            id: normalize_id(&spec.name),
            name: spec.name.clone(),
            kind: spec.kind.clone(),
            param_count: spec.params,
            trainable_params: spec.params,
            input_refs: Vec::new(),
            output_refs: Vec::new(),
        })
        .collect();
    let edges = graph_nodes
        .windows(2)
        .map(|pair| GraphEdge {
            from: pair[0].id.clone(),
            to: pair[1].id.clone(),
        })
        .collect();
    let total: usize = nodes.iter().map(|s| s.params).sum();
    GraphDescription {
        model_type: "eager".to_string(),
        nodes: graph_nodes,
        edges,
        total_params: total,
        trainable_params: total,
    }
}

fn static_graph_description(graph: &StaticGraphDef) -> GraphDescription {
    let nodes: Vec<GraphNode> = graph
        .nodes
        .iter()
        .map(|node| GraphNode {
            id: normalize_id(&node.id),
            name: node.name.clone(),
            kind: node.kind.clone(),
            param_count: 0,
            trainable_params: 0,
            input_refs: node.inputs.clone(),
            output_refs: node.outputs.clone(),
        })
        .collect();

    // Edge from producer to consumer wherever an output ref feeds an input.
    let mut producer_of = std::collections::HashMap::new();
    for (node, graph_node) in graph.nodes.iter().zip(&nodes) {
        for output in &node.outputs {
            producer_of.insert(output.clone(), graph_node.id.clone());
        }
    }
    let mut edges = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (node, graph_node) in graph.nodes.iter().zip(&nodes) {
        for input in &node.inputs {
            if let Some(from) = producer_of.get(input) {
                if seen.insert((from.clone(), graph_node.id.clone())) {
                    edges.push(GraphEdge {
                        from: from.clone(),
                        to: graph_node.id.clone(),
                    });
                }
            }
        }
    }

    GraphDescription {
        model_type: "static".to_string(),
        nodes,
        edges,
        total_params: 0,
        trainable_params: 0,
    }
}
