/// Typed ids for nodes in a validated graph
mod id;
pub use id::NodeId;

/// Workflow graph definition as submitted by callers
mod graph;
pub use graph::{GraphEdge, GraphNode, NodeKind, WorkflowGraph};

/// Graph validation
mod validate;
pub use validate::{Node, NodeRef, ValidatedGraph};

/// Compiling a validated graph into ordered steps
mod plan;
pub use plan::{Plan, WorkflowStep};

/// Aggregated error reporting
mod error;
pub use error::{AggregatedErrors, Errors};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("Workflow has no problem node")]
    NoProblemNode,
    #[error("Workflow has no optimizer node")]
    NoOptimizerNode,
    #[error("Node id \"{0}\" is defined more than once")]
    DuplicateNode(String),
    #[error("Node \"{0}\" has an invalid reference: {1}")]
    InvalidReference(String, protocol::ValidationError),
    #[error("Dataset node \"{0}\" has an empty dataset id")]
    EmptyDatasetId(String),
    #[error("Edge {0} -> {1} refers to unknown node \"{2}\"")]
    UnknownNode(String, String, String),
    #[error("Optimizer node \"{0}\" cannot be the source of an edge")]
    OptimizerAsSource(String),
    #[error("Dataset node \"{0}\" cannot be the target of an edge")]
    DatasetAsTarget(String),
    #[error("Edge {0} -> {1}: a dataset can only connect to a problem")]
    DatasetTargetNotProblem(String, String),
    #[error("Edge {0} -> {1}: a problem can only connect to an optimizer")]
    ProblemTargetNotOptimizer(String, String),
    #[error("Problem node \"{0}\" is bound to more than one dataset")]
    MultipleDatasets(String),
    #[error("No problem node is connected to an optimizer node")]
    NoSteps,
}
