use protocol::{ArtifactRef, Params};
use util::{HashMap, HashSet, IdVec};

use crate::{AggregatedErrors, Error, Errors, NodeId, NodeKind, WorkflowGraph};

/// What a validated node points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    Dataset(String),
    Artifact(ArtifactRef),
}

/// A node that passed validation.
#[derive(Debug, Clone)]
pub struct Node {
    /// Caller-chosen id, used in step labels.
    pub name: String,
    pub kind: NodeKind,
    pub reference: NodeRef,
    pub params: Params,
}

/// A graph whose nodes and edges all satisfy the workflow rules.
/// Only obtainable through `WorkflowGraph::validate`.
#[derive(Debug)]
pub struct ValidatedGraph {
    nodes: IdVec<NodeId, Node>,
    /// problem -> optimizers, in declaration order.
    successors: Vec<Vec<NodeId>>,
    /// problem -> bound dataset.
    datasets: Vec<Option<NodeId>>,
}

impl ValidatedGraph {
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes.get(id)
    }

    /// Problem nodes in declaration order.
    pub fn problems(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter_ids()
            .filter(|(_, node)| node.kind == NodeKind::Problem)
            .map(|(id, _)| id)
    }

    /// Optimizers a problem is connected to, in declaration order.
    pub fn optimizers_of(&self, problem: NodeId) -> &[NodeId] {
        &self.successors[usize::from(problem)]
    }

    pub fn dataset_of(&self, problem: NodeId) -> Option<NodeId> {
        self.datasets[usize::from(problem)]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl WorkflowGraph {
    /// Check every workflow rule, reporting all violations at once.
    pub fn validate(&self) -> Result<ValidatedGraph, AggregatedErrors> {
        let mut errors = Errors::default();

        if !self.nodes.iter().any(|n| n.kind == NodeKind::Problem) {
            errors.add(Error::NoProblemNode);
        }
        if !self.nodes.iter().any(|n| n.kind == NodeKind::Optimizer) {
            errors.add(Error::NoOptimizerNode);
        }

        let mut nodes = IdVec::with_capacity(self.nodes.len());
        let mut ids: HashMap<&str, NodeId> = util::hash_map(self.nodes.len());
        // nodes that already produced an error; edges touching them are not re-reported:
        let mut broken: HashSet<&str> = util::hash_set(0);

        for node in &self.nodes {
            if ids.contains_key(node.id.as_str()) {
                errors.add(Error::DuplicateNode(node.id.clone()));
                continue;
            }
            let reference = match node.kind {
                NodeKind::Dataset if node.reference.trim().is_empty() => {
                    errors.add(Error::EmptyDatasetId(node.id.clone()));
                    broken.insert(&node.id);
                    continue;
                }
                NodeKind::Dataset => NodeRef::Dataset(node.reference.trim().to_owned()),
                _ => match node.reference.parse::<ArtifactRef>() {
                    Ok(artifact) => NodeRef::Artifact(artifact),
                    Err(e) => {
                        errors.add(Error::InvalidReference(node.id.clone(), e));
                        broken.insert(&node.id);
                        continue;
                    }
                },
            };
            let id = nodes.push(Node {
                name: node.id.clone(),
                kind: node.kind,
                reference,
                params: node.params.clone(),
            });
            ids.insert(&node.id, id);
        }

        let mut successors = vec![Vec::new(); nodes.len()];
        let mut datasets: Vec<Option<NodeId>> = vec![None; nodes.len()];

        for edge in &self.edges {
            let mut lookup = |name: &str| -> Option<NodeId> {
                let id = ids.get(name).copied();
                if id.is_none() && !broken.contains(name) {
                    errors.add(Error::UnknownNode(
                        edge.source.clone(),
                        edge.target.clone(),
                        name.to_owned(),
                    ));
                }
                id
            };
            let (Some(src), Some(tgt)) = (lookup(&edge.source), lookup(&edge.target)) else {
                continue;
            };

            let src_kind = nodes.get(src).kind;
            let tgt_kind = nodes.get(tgt).kind;

            let mut allowed = true;
            if src_kind == NodeKind::Optimizer {
                errors.add(Error::OptimizerAsSource(edge.source.clone()));
                allowed = false;
            }
            if tgt_kind == NodeKind::Dataset {
                errors.add(Error::DatasetAsTarget(edge.target.clone()));
                allowed = false;
            }
            if !allowed {
                continue;
            }

            match (src_kind, tgt_kind) {
                (NodeKind::Dataset, NodeKind::Problem) => match datasets[usize::from(tgt)] {
                    Some(existing) if existing != src => {
                        errors.add(Error::MultipleDatasets(edge.target.clone()));
                    }
                    _ => datasets[usize::from(tgt)] = Some(src),
                },
                (NodeKind::Dataset, _) => errors.add(Error::DatasetTargetNotProblem(
                    edge.source.clone(),
                    edge.target.clone(),
                )),
                (NodeKind::Problem, NodeKind::Optimizer) => {
                    let targets = &mut successors[usize::from(src)];
                    if !targets.contains(&tgt) {
                        targets.push(tgt);
                    }
                }
                (NodeKind::Problem, _) => errors.add(Error::ProblemTargetNotOptimizer(
                    edge.source.clone(),
                    edge.target.clone(),
                )),
                // rejected above:
                (NodeKind::Optimizer, _) => {}
            }
        }

        errors.finish("validating workflow")?;

        for targets in &mut successors {
            targets.sort();
        }

        Ok(ValidatedGraph {
            nodes,
            successors,
            datasets,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use protocol::Params;

    fn graph() -> WorkflowGraph {
        let mut g = WorkflowGraph::default();
        g.add_node("d", NodeKind::Dataset, "ds-42", Params::new())
            .add_node("p", NodeKind::Problem, "alice/tsp-50", Params::new())
            .add_node("o", NodeKind::Optimizer, "bob/sa-optimizer", Params::new())
            .add_edge("d", "p")
            .add_edge("p", "o");
        g
    }

    fn errors_of(g: &WorkflowGraph) -> Vec<String> {
        g.validate().unwrap_err().errors
    }

    #[test]
    fn test_valid_graph() {
        let v = graph().validate().unwrap();
        assert_eq!(v.len(), 3);
        let problems: Vec<_> = v.problems().collect();
        assert_eq!(problems.len(), 1);
        assert_eq!(v.optimizers_of(problems[0]).len(), 1);
        let dataset = v.dataset_of(problems[0]).unwrap();
        assert_eq!(v.node(dataset).reference, NodeRef::Dataset("ds-42".to_owned()));
    }

    #[test]
    fn test_requires_problem_and_optimizer() {
        let g = WorkflowGraph::default();
        let errs = errors_of(&g);
        assert_eq!(
            errs,
            vec![
                Error::NoProblemNode.to_string(),
                Error::NoOptimizerNode.to_string()
            ]
        );
    }

    #[test]
    fn test_optimizer_cannot_be_source() {
        let mut g = graph();
        g.add_edge("o", "p");
        assert_eq!(errors_of(&g), vec![Error::OptimizerAsSource("o".into()).to_string()]);
    }

    #[test]
    fn test_dataset_cannot_be_target() {
        let mut g = graph();
        g.add_edge("p", "d");
        let errs = errors_of(&g);
        assert_eq!(errs, vec![Error::DatasetAsTarget("d".into()).to_string()]);
    }

    #[test]
    fn test_dataset_must_target_problem() {
        let mut g = graph();
        g.add_edge("d", "o");
        assert_eq!(
            errors_of(&g),
            vec![Error::DatasetTargetNotProblem("d".into(), "o".into()).to_string()]
        );
    }

    #[test]
    fn test_problem_must_target_optimizer() {
        let mut g = graph();
        g.add_node("p2", NodeKind::Problem, "alice/knapsack", Params::new())
            .add_edge("p", "p2");
        assert_eq!(
            errors_of(&g),
            vec![Error::ProblemTargetNotOptimizer("p".into(), "p2".into()).to_string()]
        );
    }

    #[test]
    fn test_collects_every_error() {
        let mut g = graph();
        g.add_node("p", NodeKind::Problem, "alice/dup", Params::new())
            .add_node("bad", NodeKind::Optimizer, "no-owner", Params::new())
            .add_edge("p", "missing")
            .add_edge("bad", "p");
        let errs = errors_of(&g);
        assert_eq!(errs.len(), 3, "{errs:?}");
        assert!(errs[0].contains("defined more than once"));
        assert!(errs[1].contains("invalid reference"));
        assert!(errs[2].contains("unknown node \"missing\""));
    }

    #[test]
    fn test_multiple_datasets() {
        let mut g = graph();
        g.add_node("d2", NodeKind::Dataset, "ds-43", Params::new())
            .add_edge("d2", "p");
        assert_eq!(errors_of(&g), vec![Error::MultipleDatasets("p".into()).to_string()]);
    }

    #[test]
    fn test_graph_from_json() {
        let json = r#"{
            "nodes": [
                {"id": "p", "kind": "problem", "reference": "alice/tsp-50", "params": {"n": 50}},
                {"id": "o", "kind": "optimizer", "reference": "bob/sa-optimizer"}
            ],
            "edges": [{"source": "p", "target": "o"}]
        }"#;
        let g: WorkflowGraph = serde_json::from_str(json).unwrap();
        let v = g.validate().unwrap();
        assert_eq!(v.node(NodeId::from(0)).params["n"], 50);
    }
}
