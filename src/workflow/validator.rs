//! Workflow Validation
//!
//! Turns a list of [`ActionSpec`] declarations into a [`Workflow`]:
//! - Name validation (non-empty, unique)
//! - Reference integrity checking (missing `external` dependencies are dropped)
//! - Dependency graph validation (no cycles, with the offending path)
//! - Topological sorting
//!
//! Nothing is executed here; every failure is a [`ConfigurationError`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::{debug, info, warn};

use super::graph::Workflow;
use super::model::ActionSpec;
use super::state::ActionNode;
use crate::error::ConfigurationError;

/// Builds validated [`Workflow`] graphs.
///
/// # Example
///
/// ```
/// use rustrunner::workflow::{ActionSpec, GraphBuilder};
///
/// let workflow = GraphBuilder::new()
///     .with_context_value("env", "staging")
///     .build(vec![
///         ActionSpec::new("compile", "shell").with_parameter("command", "make"),
///         ActionSpec::new("test", "shell")
///             .with_parameter("command", "make test")
///             .depends_on("compile"),
///     ])
///     .unwrap();
///
/// assert_eq!(workflow.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct GraphBuilder {
    context: BTreeMap<String, String>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the static context.
    pub fn with_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.context = context;
        self
    }

    /// Adds one context entry.
    pub fn with_context_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Validates the declarations and materializes all nodes in PENDING.
    ///
    /// Performs the following checks:
    /// 1. Workflow is not empty
    /// 2. Names are non-empty and unique
    /// 3. All dependencies point to declared actions, except `external`
    ///    ones, whose edge is dropped when the action is missing
    /// 4. No cyclic dependencies
    pub fn build(self, specs: Vec<ActionSpec>) -> Result<Workflow, ConfigurationError> {
        info!("Validating workflow with {} actions", specs.len());

        if specs.is_empty() {
            return Err(ConfigurationError::EmptyWorkflow);
        }

        let mut index: HashMap<String, usize> = HashMap::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            if spec.name.trim().is_empty() {
                return Err(ConfigurationError::EmptyActionName);
            }
            if index.insert(spec.name.clone(), i).is_some() {
                return Err(ConfigurationError::DuplicateAction(spec.name.clone()));
            }
        }

        let mut dependencies: Vec<Vec<usize>> = Vec::with_capacity(specs.len());
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); specs.len()];
        let mut strict_edges: HashSet<(usize, usize)> = HashSet::new();

        for (i, spec) in specs.iter().enumerate() {
            let mut resolved: Vec<usize> = Vec::with_capacity(spec.dependencies.len());
            for dependency in &spec.dependencies {
                let Some(&dep) = index.get(&dependency.name) else {
                    if dependency.external {
                        info!(
                            "Action '{}': external dependency '{}' is not declared, ignoring it",
                            spec.name, dependency.name
                        );
                        continue;
                    }
                    return Err(ConfigurationError::UnknownDependency {
                        action: spec.name.clone(),
                        dependency: dependency.name.clone(),
                    });
                };
                if dependency.strict {
                    strict_edges.insert((i, dep));
                }
                if resolved.contains(&dep) {
                    warn!(
                        "Action '{}' lists dependency '{}' more than once",
                        spec.name, dependency.name
                    );
                    continue;
                }
                resolved.push(dep);
                dependents[dep].push(i);
            }

            if resolved.is_empty() {
                debug!("Action '{}' is a root action (no dependencies)", spec.name);
            }
            dependencies.push(resolved);
        }

        let order = topological_sort(&dependencies, &dependents).map_err(|remaining| {
            let cycle = find_cycle(&remaining, &dependencies)
                .into_iter()
                .map(|i| specs[i].name.clone())
                .collect();
            ConfigurationError::DependencyCycle { cycle }
        })?;

        debug!(
            "Topological order: {:?}",
            order.iter().map(|&i| &specs[i].name).collect::<Vec<_>>()
        );

        let nodes: Vec<ActionNode> = specs.into_iter().map(ActionNode::new).collect();

        info!("Workflow validated: {} actions", nodes.len());

        Ok(Workflow {
            nodes,
            index,
            dependencies,
            dependents,
            strict_edges,
            order,
            context: self.context,
        })
    }
}

/// Performs topological sort on node indices using Kahn's algorithm.
///
/// Ties are broken by declaration order. On a cycle, returns the set of
/// nodes that could not be ordered.
fn topological_sort(
    dependencies: &[Vec<usize>],
    dependents: &[Vec<usize>],
) -> Result<Vec<usize>, BTreeSet<usize>> {
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();

    // Start with root nodes (in-degree = 0)
    let mut ready: BTreeSet<usize> = (0..dependencies.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();

    let mut sorted_order: Vec<usize> = Vec::with_capacity(dependencies.len());

    while let Some(current) = ready.pop_first() {
        sorted_order.push(current);

        for &successor in &dependents[current] {
            in_degree[successor] -= 1;
            if in_degree[successor] == 0 {
                ready.insert(successor);
            }
        }
    }

    if sorted_order.len() != dependencies.len() {
        let remaining = (0..dependencies.len())
            .filter(|&i| in_degree[i] > 0)
            .collect();
        return Err(remaining);
    }

    Ok(sorted_order)
}

/// Extracts one concrete cycle from the nodes left over by Kahn's algorithm.
///
/// Every leftover node has at least one leftover dependency, so walking
/// dependency edges inside the set must revisit a node. The returned path
/// starts and ends with the same node.
fn find_cycle(remaining: &BTreeSet<usize>, dependencies: &[Vec<usize>]) -> Vec<usize> {
    let Some(&start) = remaining.first() else {
        return Vec::new();
    };

    let mut path: Vec<usize> = Vec::new();
    let mut position: HashMap<usize, usize> = HashMap::new();
    let mut current = start;

    loop {
        if let Some(&at) = position.get(&current) {
            let mut cycle = path[at..].to_vec();
            cycle.push(current);
            return cycle;
        }
        position.insert(current, path.len());
        path.push(current);

        match dependencies[current]
            .iter()
            .find(|&&dep| remaining.contains(&dep))
        {
            Some(&next) => current = next,
            None => return path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::Dependency;

    fn build(specs: Vec<ActionSpec>) -> Result<Workflow, ConfigurationError> {
        GraphBuilder::new().build(specs)
    }

    fn names(workflow: &Workflow) -> Vec<&str> {
        workflow
            .topological_order()
            .iter()
            .map(|&i| workflow.nodes()[i].name())
            .collect()
    }

    #[test]
    fn test_valid_workflow() {
        let workflow = build(vec![
            ActionSpec::new("step1", "echo"),
            ActionSpec::new("step2", "echo").depends_on("step1"),
        ])
        .unwrap();

        assert_eq!(workflow.len(), 2);
        assert_eq!(names(&workflow), vec!["step1", "step2"]);
    }

    #[test]
    fn test_empty_workflow() {
        assert_eq!(build(vec![]).unwrap_err(), ConfigurationError::EmptyWorkflow);
    }

    #[test]
    fn test_empty_name() {
        let err = build(vec![ActionSpec::new("  ", "echo")]).unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyActionName);
    }

    #[test]
    fn test_duplicate_names() {
        let err = build(vec![
            ActionSpec::new("same", "echo"),
            ActionSpec::new("same", "shell"),
        ])
        .unwrap_err();

        assert_eq!(err, ConfigurationError::DuplicateAction("same".into()));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = build(vec![ActionSpec::new("step1", "echo").depends_on("ghost")]).unwrap_err();

        assert_eq!(
            err,
            ConfigurationError::UnknownDependency {
                action: "step1".into(),
                dependency: "ghost".into(),
            }
        );
    }

    #[test]
    fn test_two_node_cycle_reports_path() {
        let err = build(vec![
            ActionSpec::new("a", "echo").depends_on("b"),
            ActionSpec::new("b", "echo").depends_on("a"),
        ])
        .unwrap_err();

        match err {
            ConfigurationError::DependencyCycle { cycle } => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_cycle_behind_valid_prefix() {
        let err = build(vec![
            ActionSpec::new("root", "echo"),
            ActionSpec::new("x", "echo").depends_on("root").depends_on("z"),
            ActionSpec::new("y", "echo").depends_on("x"),
            ActionSpec::new("z", "echo").depends_on("y"),
            ActionSpec::new("tail", "echo").depends_on("z"),
        ])
        .unwrap_err();

        let ConfigurationError::DependencyCycle { cycle } = err else {
            panic!("expected cycle");
        };
        assert_eq!(cycle.first(), cycle.last());
        assert_eq!(cycle.len(), 4);
        assert!(!cycle.contains(&"root".to_string()));
        assert!(!cycle.contains(&"tail".to_string()));
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = build(vec![ActionSpec::new("loop", "echo").depends_on("loop")]).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::DependencyCycle {
                cycle: vec!["loop".into(), "loop".into()],
            }
        );
    }

    #[test]
    fn test_topological_sort_linear() {
        let workflow = build(vec![
            ActionSpec::new("step3", "echo").depends_on("step2"),
            ActionSpec::new("step1", "echo"),
            ActionSpec::new("step2", "echo").depends_on("step1"),
        ])
        .unwrap();

        assert_eq!(names(&workflow), vec!["step1", "step2", "step3"]);
    }

    #[test]
    fn test_topological_sort_multiple_roots_keeps_declaration_order() {
        let workflow = build(vec![
            ActionSpec::new("c", "echo"),
            ActionSpec::new("a", "echo"),
            ActionSpec::new("b", "echo"),
        ])
        .unwrap();

        assert_eq!(names(&workflow), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_diamond_dependents() {
        let workflow = build(vec![
            ActionSpec::new("top", "echo"),
            ActionSpec::new("left", "echo").depends_on("top"),
            ActionSpec::new("right", "echo").depends_on("top"),
            ActionSpec::new("bottom", "echo").depends_on("left").depends_on("right"),
        ])
        .unwrap();

        assert_eq!(workflow.dependents(0), &[1, 2]);
        assert_eq!(workflow.dependencies(3), &[1, 2]);
        assert_eq!(names(&workflow).last(), Some(&"bottom"));
    }

    #[test]
    fn test_duplicate_dependency_collapsed() {
        let workflow = build(vec![
            ActionSpec::new("a", "echo"),
            ActionSpec::new("b", "echo").depends_on("a").depends_on("a"),
        ])
        .unwrap();

        assert_eq!(workflow.dependencies(1), &[0]);
        assert_eq!(workflow.dependents(0), &[1]);
    }

    #[test]
    fn test_missing_external_dependency_is_dropped() {
        let workflow = build(vec![
            ActionSpec::new("a", "echo"),
            ActionSpec::new("b", "echo")
                .depends_on(Dependency::new("a").external())
                .depends_on(Dependency::new("elsewhere").external()),
        ])
        .unwrap();

        assert_eq!(workflow.dependencies(1), &[0]);
        assert_eq!(workflow.roots().len(), 1);
    }

    #[test]
    fn test_only_dependency_external_makes_root() {
        let workflow = build(vec![
            ActionSpec::new("b", "echo").depends_on(Dependency::new("elsewhere").external()),
        ])
        .unwrap();

        assert!(workflow.dependencies(0).is_empty());
        assert_eq!(workflow.roots()[0].name(), "b");
    }

    #[test]
    fn test_strict_edges_recorded() {
        let workflow = build(vec![
            ActionSpec::new("a", "echo"),
            ActionSpec::new("b", "echo"),
            ActionSpec::new("c", "echo")
                .depends_on(Dependency::new("a").strict())
                .depends_on("b"),
        ])
        .unwrap();

        assert!(workflow.is_strict(2, 0));
        assert!(!workflow.is_strict(2, 1));
        assert!(!workflow.is_strict(0, 2));
    }

    #[test]
    fn test_duplicate_entry_keeps_strictness() {
        let workflow = build(vec![
            ActionSpec::new("a", "echo"),
            ActionSpec::new("b", "echo")
                .depends_on("a")
                .depends_on(Dependency::new("a").strict()),
        ])
        .unwrap();

        assert_eq!(workflow.dependencies(1), &[0]);
        assert!(workflow.is_strict(1, 0));
    }

    #[test]
    fn test_context_is_attached() {
        let workflow = GraphBuilder::new()
            .with_context_value("region", "eu")
            .build(vec![ActionSpec::new("a", "echo")])
            .unwrap();

        assert_eq!(workflow.context()["region"], "eu");
    }
}
