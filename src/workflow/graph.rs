//! Workflow Graph
//!
//! The validated, immutable dependency structure of a run together with the
//! mutable per-node state. Only [`GraphBuilder`](super::GraphBuilder) creates
//! a [`Workflow`], so every instance is non-empty, uniquely named and acyclic.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use super::state::{ActionNode, ActionState};

/// A validated action graph.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub(super) nodes: Vec<ActionNode>,
    pub(super) index: HashMap<String, usize>,
    pub(super) dependencies: Vec<Vec<usize>>,
    pub(super) dependents: Vec<Vec<usize>>,
    /// `(dependent, dependency)` pairs declared `strict`
    pub(super) strict_edges: HashSet<(usize, usize)>,
    pub(super) order: Vec<usize>,
    pub(super) context: BTreeMap<String, String>,
}

impl Workflow {
    /// Returns the number of actions in the workflow.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the workflow has no actions.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[ActionNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&ActionNode> {
        self.nodes.get(index)
    }

    pub(crate) fn node_mut(&mut self, index: usize) -> Option<&mut ActionNode> {
        self.nodes.get_mut(index)
    }

    /// Looks up a node by action name.
    pub fn get(&self, name: &str) -> Option<&ActionNode> {
        self.index_of(name).map(|i| &self.nodes[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Current state of the named action.
    pub fn state_of(&self, name: &str) -> Option<ActionState> {
        self.get(name).map(|n| n.state())
    }

    /// Indices of the direct dependencies of a node.
    pub fn dependencies(&self, index: usize) -> &[usize] {
        self.dependencies.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Indices of the nodes that directly depend on a node.
    pub fn dependents(&self, index: usize) -> &[usize] {
        self.dependents.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether the edge from `dependent` to `dependency` was declared strict.
    pub fn is_strict(&self, dependent: usize, dependency: usize) -> bool {
        self.strict_edges.contains(&(dependent, dependency))
    }

    /// Node indices in an order where every node follows its dependencies.
    pub fn topological_order(&self) -> &[usize] {
        &self.order
    }

    /// Static key/value context available to templates.
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Every node reachable through dependents edges, excluding the start.
    pub fn downstream_of(&self, index: usize) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.dependents(index).iter().copied().collect();

        while let Some(current) = queue.pop_front() {
            if seen.insert(current) {
                queue.extend(self.dependents(current).iter().copied());
            }
        }

        seen
    }

    /// Root nodes (no dependencies), in declaration order.
    pub fn roots(&self) -> Vec<&ActionNode> {
        (0..self.nodes.len())
            .filter(|&i| self.dependencies[i].is_empty())
            .map(|i| &self.nodes[i])
            .collect()
    }

    /// Number of nodes currently in each state.
    pub fn state_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for node in &self.nodes {
            *counts.entry(node.state().as_str()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use crate::workflow::{ActionSpec, GraphBuilder};

    #[test]
    fn test_downstream_is_transitive() {
        let workflow = GraphBuilder::new()
            .build(vec![
                ActionSpec::new("a", "echo"),
                ActionSpec::new("b", "echo").depends_on("a"),
                ActionSpec::new("c", "echo").depends_on("b"),
                ActionSpec::new("d", "echo"),
            ])
            .unwrap();

        let a = workflow.index_of("a").unwrap();
        let names: Vec<_> = workflow
            .downstream_of(a)
            .into_iter()
            .map(|i| workflow.nodes()[i].name().to_string())
            .collect();

        assert_eq!(names, vec!["b", "c"]);
        assert!(workflow.downstream_of(workflow.index_of("d").unwrap()).is_empty());
    }

    #[test]
    fn test_lookup_and_roots() {
        let workflow = GraphBuilder::new()
            .build(vec![
                ActionSpec::new("root", "echo"),
                ActionSpec::new("leaf", "echo").depends_on("root"),
            ])
            .unwrap();

        assert_eq!(workflow.len(), 2);
        assert_eq!(workflow.roots().len(), 1);
        assert_eq!(workflow.roots()[0].name(), "root");
        assert!(workflow.get("missing").is_none());
        assert_eq!(workflow.dependents(0), &[1]);
        assert_eq!(workflow.state_counts()["PENDING"], 2);
    }
}
