use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use protocol::{ArtifactRef, ExecutionRequest, Params, ResourceLimits};

use crate::{Error, NodeId, NodeRef, ValidatedGraph, WorkflowGraph};

/// One (problem, optimizer, optional dataset) triple; runs as exactly one job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStep {
    /// Position in the compiled plan, starting at zero.
    pub index: usize,
    pub problem_node: String,
    pub optimizer_node: String,
    pub problem: ArtifactRef,
    pub optimizer: ArtifactRef,
    pub problem_params: Params,
    pub optimizer_params: Params,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
}

impl WorkflowStep {
    /// Component identity used to label this step's log events.
    pub fn label(&self) -> String {
        format!(
            "step-{}:{}->{}",
            self.index + 1,
            self.problem_node,
            self.optimizer_node
        )
    }

    /// Build the execution request this step runs as.
    pub fn to_request(&self, resources: ResourceLimits, timeout_secs: u64) -> ExecutionRequest {
        ExecutionRequest {
            problem: self.problem.clone(),
            optimizer: self.optimizer.clone(),
            problem_params: self.problem_params.clone(),
            optimizer_params: self.optimizer_params.clone(),
            dataset: self.dataset.clone(),
            resources,
            timeout_secs,
        }
    }
}

/// Ordered list of steps compiled from a workflow graph.
/// Steps always run one after another, never in parallel.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub steps: Vec<WorkflowStep>,
}

impl Plan {
    /// Validate and compile in one go.
    pub fn from_graph(graph: &WorkflowGraph) -> Result<Self> {
        let validated = graph.validate()?;
        Ok(Self::compile(&validated)?)
    }

    /// One step per connected (problem, optimizer) pair, ordered by problem
    /// declaration order and then optimizer declaration order.
    pub fn compile(graph: &ValidatedGraph) -> Result<Self, Error> {
        let mut steps = Vec::with_capacity(graph.len());
        for problem in graph.problems() {
            let optimizers = graph.optimizers_of(problem);
            if optimizers.is_empty() {
                log::warn!(
                    "Problem node {} is not connected to any optimizer; skipping",
                    graph.node(problem).name.yellow()
                );
                continue;
            }
            for &optimizer in optimizers {
                let index = steps.len();
                steps.push(make_step(graph, index, problem, optimizer));
            }
        }
        if steps.is_empty() {
            return Err(Error::NoSteps);
        }
        log::debug!("Compiled workflow into {} steps", steps.len());
        Ok(Self { steps })
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn make_step(
    graph: &ValidatedGraph,
    index: usize,
    problem: NodeId,
    optimizer: NodeId,
) -> WorkflowStep {
    let p = graph.node(problem);
    let o = graph.node(optimizer);
    let dataset = graph
        .dataset_of(problem)
        .and_then(|d| match &graph.node(d).reference {
            NodeRef::Dataset(id) => Some(id.clone()),
            NodeRef::Artifact(_) => None,
        });
    WorkflowStep {
        index,
        problem_node: p.name.clone(),
        optimizer_node: o.name.clone(),
        problem: artifact(&p.reference),
        optimizer: artifact(&o.reference),
        problem_params: p.params.clone(),
        optimizer_params: o.params.clone(),
        dataset,
    }
}

// validation guarantees problems and optimizers carry artifact references:
fn artifact(reference: &NodeRef) -> ArtifactRef {
    match reference {
        NodeRef::Artifact(a) => a.clone(),
        NodeRef::Dataset(id) => ArtifactRef::new("", id.as_str()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::NodeKind;
    use serde_json::json;

    fn params(value: serde_json::Value) -> Params {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_one_step_per_pair() {
        let mut g = WorkflowGraph::default();
        g.add_node("d", NodeKind::Dataset, "ds-1", Params::new())
            .add_node("p1", NodeKind::Problem, "alice/tsp-50", params(json!({"n": 50})))
            .add_node("p2", NodeKind::Problem, "alice/maxcut", Params::new())
            .add_node("o1", NodeKind::Optimizer, "bob/sa", params(json!({"iterations": 1000})))
            .add_node("o2", NodeKind::Optimizer, "bob/ga", Params::new())
            .add_edge("d", "p1")
            // declared out of order, and duplicated:
            .add_edge("p1", "o2")
            .add_edge("p1", "o1")
            .add_edge("p1", "o1")
            .add_edge("p2", "o2");

        let plan = Plan::from_graph(&g).unwrap();
        assert_eq!(plan.len(), 3);

        let labels: Vec<_> = plan.steps.iter().map(|s| s.label()).collect();
        assert_eq!(
            labels,
            vec!["step-1:p1->o1", "step-2:p1->o2", "step-3:p2->o2"]
        );

        let first = &plan.steps[0];
        assert_eq!(first.dataset.as_deref(), Some("ds-1"));
        assert_eq!(first.problem_params["n"], 50);
        assert_eq!(first.optimizer_params["iterations"], 1000);
        assert_eq!(plan.steps[2].dataset, None);

        let req = first.to_request(ResourceLimits::default(), 60);
        assert_eq!(req.problem.repo_id(), "alice/tsp-50");
        assert_eq!(req.timeout_secs, 60);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_no_connected_pairs() {
        let mut g = WorkflowGraph::default();
        g.add_node("p", NodeKind::Problem, "alice/tsp", Params::new())
            .add_node("o", NodeKind::Optimizer, "bob/sa", Params::new());
        let validated = g.validate().unwrap();
        assert_eq!(Plan::compile(&validated).unwrap_err(), Error::NoSteps);
    }

    #[test]
    fn test_invalid_graph_reports_aggregate() {
        let mut g = WorkflowGraph::default();
        g.add_node("o", NodeKind::Optimizer, "bob/sa", Params::new());
        let e = Plan::from_graph(&g).unwrap_err();
        let agg = e.downcast_ref::<crate::AggregatedErrors>().unwrap();
        assert_eq!(agg.errors, vec![Error::NoProblemNode.to_string()]);
    }
}
