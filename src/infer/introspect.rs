//! Static-graph introspection.
//!
//! A plain static session only returns the outputs declared when it was
//! built, so intermediate tensors are invisible. Introspection rewrites the
//! graph definition to declare every node output as a graph output and
//! instantiates a fresh session from the augmented definition. This rebuild
//! happens once per model load and is the heavier execution path; the plain
//! session remains the cheap one when only declared outputs are needed.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{StaticBackend, StaticGraphDef, StaticNode, StaticSession, TensorSpec};

/// A static session rebuilt so that every intermediate tensor is a declared
/// output.
pub struct IntrospectedSession {
    session: Arc<dyn StaticSession>,
    def: StaticGraphDef,
    output_names: Vec<String>,
}

impl IntrospectedSession {
    /// Load the graph, expose every node output, run best-effort shape
    /// inference, and instantiate the augmented session.
    pub fn build(backend: &Arc<dyn StaticBackend>, path: &Path) -> Result<Self> {
        let mut def = backend.load_graph(path)?;

        let mut declared: HashSet<String> =
            def.outputs.iter().map(|spec| spec.name.clone()).collect();
        let additions: Vec<String> = def
            .nodes
            .iter()
            .flat_map(|node| node.outputs.iter())
            .filter(|name| declared.insert((*name).clone()))
            .cloned()
            .collect();
        for name in additions {
            // Type and shape stay unresolved until inference fills them in.
            def.outputs.push(TensorSpec { name, shape: None });
        }

        if let Err(err) = backend.infer_shapes(&mut def) {
            tracing::warn!(error = %err, "shape inference failed; shapes stay unresolved");
        }

        let session = backend.build_session(&def)?;
        let output_names = session.outputs();
        Ok(Self {
            session,
            def,
            output_names,
        })
    }

    /// Full ordered list of outputs the augmented session produces.
    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }

    pub fn session(&self) -> &Arc<dyn StaticSession> {
        &self.session
    }

    /// The node producing the named output, when the graph declares one.
    pub fn node_for_output(&self, output: &str) -> Option<&StaticNode> {
        self.def
            .nodes
            .iter()
            .find(|node| node.outputs.iter().any(|name| name == output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mock::MockStaticBackend;

    fn two_node_graph() -> StaticGraphDef {
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
                shape: Some(vec![Some(1), Some(4)]),
            }],
            outputs: vec![TensorSpec {
                name: "output".to_string(),
                shape: Some(vec![Some(1), Some(4)]),
            }],
        }
    }

    #[test]
    fn build_exposes_every_intermediate_output() {
        let backend: Arc<dyn StaticBackend> =
            Arc::new(MockStaticBackend::new(two_node_graph()));
        let intro = IntrospectedSession::build(&backend, Path::new("model.json")).unwrap();
        // Original declared output first, then the appended intermediate.
        assert_eq!(intro.output_names(), &["output", "hidden"]);
    }

    #[test]
    fn already_declared_outputs_are_not_duplicated() {
        let backend: Arc<dyn StaticBackend> =
            Arc::new(MockStaticBackend::new(two_node_graph()));
        let intro = IntrospectedSession::build(&backend, Path::new("model.json")).unwrap();
        let count = intro
            .output_names()
            .iter()
            .filter(|name| name.as_str() == "output")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn shape_inference_failure_is_not_fatal() {
        let backend: Arc<dyn StaticBackend> = Arc::new(
            MockStaticBackend::new(two_node_graph()).with_failing_shape_inference(),
        );
        let intro = IntrospectedSession::build(&backend, Path::new("model.json")).unwrap();
        assert_eq!(intro.output_names().len(), 2);
    }

    #[test]
    fn node_lookup_by_output_name() {
        let backend: Arc<dyn StaticBackend> =
            Arc::new(MockStaticBackend::new(two_node_graph()));
        let intro = IntrospectedSession::build(&backend, Path::new("model.json")).unwrap();
        assert_eq!(intro.node_for_output("hidden").unwrap().kind, "Gemm");
        assert!(intro.node_for_output("missing").is_none());
    }
}
