use serde::{Deserialize, Serialize};

use protocol::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Dataset,
    Problem,
    Optimizer,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Dataset => write!(f, "dataset"),
            NodeKind::Problem => write!(f, "problem"),
            NodeKind::Optimizer => write!(f, "optimizer"),
        }
    }
}

/// A node as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Caller-chosen id, unique within the graph.
    pub id: String,
    pub kind: NodeKind,
    /// `owner/name` for problems and optimizers, a platform dataset id for datasets.
    pub reference: String,
    /// Parameter overrides (ignored for datasets).
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
}

/// A workflow as submitted: typed nodes plus directed edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
}

impl WorkflowGraph {
    pub fn add_node(
        &mut self,
        id: &str,
        kind: NodeKind,
        reference: &str,
        params: Params,
    ) -> &mut Self {
        self.nodes.push(GraphNode {
            id: id.to_owned(),
            kind,
            reference: reference.to_owned(),
            params,
        });
        self
    }

    pub fn add_edge(&mut self, source: &str, target: &str) -> &mut Self {
        self.edges.push(GraphEdge {
            source: source.to_owned(),
            target: target.to_owned(),
        });
        self
    }
}
