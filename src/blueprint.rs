//! Task graph declaration and resolution.
//!
//! A [`Blueprint`] collects named tasks together with the names of the tasks
//! they depend on. Every declaration is validated on the spot: duplicate
//! names and edges that would close a cycle are rejected, and a rejected
//! declaration leaves the blueprint untouched. Dependencies may be named
//! before they are declared; [`Blueprint::finish`] insists that every such
//! forward reference has been filled in and yields an immutable
//! [`TaskGraph`].
//!
//! Edges point from a dependency to its dependent, so walking the graph
//! forward visits everything that has to be redone when a task reruns, and
//! walking it backwards visits everything a task needs.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::core::{ArcStr, Artifact, ArtifactKind, Variant};
use crate::error::{GraphError, TaskError};
use crate::session::BuildSession;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of a single task action.
pub type TaskResult = Result<(), TaskError>;

/// Type-erased asynchronous task action.
pub(crate) type Action = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, TaskResult> + Send + Sync>;

/// Everything a running task action gets to see.
#[derive(Clone)]
pub struct TaskContext {
    /// Name of the running task.
    pub name: ArcStr,
    /// Build cycle the task runs in.
    pub cycle: u64,
    /// The session the cycle belongs to.
    pub session: Arc<BuildSession>,
    /// Span the action is instrumented with.
    pub span: tracing::Span,
}

impl TaskContext {
    /// Latest artifact of the given identity and variant.
    pub fn input(&self, kind: ArtifactKind, variant: Variant) -> Result<Artifact, TaskError> {
        self.session
            .artifact(kind, variant)
            .ok_or(TaskError::MissingInput { kind, variant })
    }

    /// Persist the artifact (when it has a file) and publish it to later
    /// tasks. Nothing is published if the write fails.
    pub async fn commit(&self, artifact: Artifact) -> TaskResult {
        self.session.commit(artifact).await?;
        Ok(())
    }
}

pub(crate) struct Task {
    pub name: ArcStr,
    pub action: Action,
    /// Declared through [`TaskDef::group`].
    pub group: bool,
}

struct Slot {
    name: ArcStr,
    /// `None` while the task is only known as somebody's dependency.
    action: Option<Action>,
    group: bool,
}

/// Mutable task graph under construction.
///
/// # Example
///
/// ```rust
/// use tsumiki::Blueprint;
///
/// let mut blueprint = Blueprint::new();
/// blueprint.task("compile").run(|_| async { Ok(()) })?;
/// blueprint
///     .task("minify")
///     .depends_on(["compile"])
///     .run(|_| async { Ok(()) })?;
///
/// let graph = blueprint.finish()?;
/// assert_eq!(graph.resolve_order(["minify"])?.len(), 2);
/// # Ok::<(), tsumiki::GraphError>(())
/// ```
#[derive(Default)]
pub struct Blueprint {
    graph: Graph<Slot, ()>,
    index: HashMap<ArcStr, NodeIndex>,
}

impl Blueprint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a fluent task declaration.
    pub fn task(&mut self, name: impl Into<ArcStr>) -> TaskDef<'_> {
        TaskDef {
            blueprint: self,
            name: name.into(),
            dependencies: Vec::new(),
        }
    }

    /// Registers a task with its dependencies and action.
    pub fn declare<F, Fut>(&mut self, name: &str, dependencies: &[&str], action: F) -> Result<(), GraphError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        let dependencies: Vec<ArcStr> = dependencies.iter().map(|&dep| ArcStr::from(dep)).collect();
        self.insert(
            ArcStr::from(name),
            dependencies,
            Arc::new(move |ctx| Box::pin(action(ctx))),
            false,
        )
    }

    /// Names of tasks that are referenced as dependencies but not declared.
    pub fn missing(&self) -> Vec<ArcStr> {
        let mut missing: Vec<_> = self
            .graph
            .node_weights()
            .filter(|slot| slot.action.is_none())
            .map(|slot| slot.name.clone())
            .collect();
        missing.sort();
        missing
    }

    fn insert(&mut self, name: ArcStr, dependencies: Vec<ArcStr>, action: Action, group: bool) -> Result<(), GraphError> {
        let existing = self.index.get(&name).copied();

        if let Some(index) = existing
            && self.graph[index].action.is_some()
        {
            return Err(GraphError::DuplicateTask(name));
        }

        let mut unique = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            if !unique.contains(&dependency) {
                unique.push(dependency);
            }
        }

        // Validate every edge before touching the graph, so that a rejected
        // declaration leaves no trace.
        for dependency in &unique {
            if *dependency == name {
                return Err(GraphError::CyclicDependency {
                    task: name.clone(),
                    dependency: dependency.clone(),
                });
            }

            // A placeholder may already have dependents. If the dependency
            // is reachable from it, the new edge would close a loop.
            if let (Some(task), Some(&dep)) = (existing, self.index.get(dependency))
                && petgraph::algo::has_path_connecting(&self.graph, task, dep, None)
            {
                return Err(GraphError::CyclicDependency {
                    task: name.clone(),
                    dependency: dependency.clone(),
                });
            }
        }

        let task = match existing {
            Some(index) => {
                let slot = &mut self.graph[index];
                slot.action = Some(action);
                slot.group = group;
                index
            }
            None => self.add_slot(name, Some(action), group),
        };

        for dependency in unique {
            let dep = match self.index.get(&dependency) {
                Some(&index) => index,
                None => self.add_slot(dependency, None, false),
            };
            self.graph.add_edge(dep, task, ());
        }

        Ok(())
    }

    fn add_slot(&mut self, name: ArcStr, action: Option<Action>, group: bool) -> NodeIndex {
        let index = self.graph.add_node(Slot {
            name: name.clone(),
            action,
            group,
        });
        self.index.insert(name, index);
        index
    }

    /// Freezes the blueprint. Fails if a dependency was never declared.
    pub fn finish(self) -> Result<TaskGraph, GraphError> {
        if let Some(name) = self.missing().into_iter().next() {
            return Err(GraphError::UnknownTask(name));
        }

        // Nothing gets filtered out, so node indices are preserved.
        let graph = self.graph.filter_map(
            |_, slot| {
                slot.action.clone().map(|action| Task {
                    name: slot.name.clone(),
                    action,
                    group: slot.group,
                })
            },
            |_, _| Some(()),
        );

        Ok(TaskGraph {
            graph,
            index: self.index,
        })
    }
}

pub struct TaskDef<'a> {
    blueprint: &'a mut Blueprint,
    name: ArcStr,
    dependencies: Vec<ArcStr>,
}

impl<'a> TaskDef<'a> {
    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ArcStr>,
    {
        self.dependencies.extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn run<F, Fut>(self, callback: F) -> Result<(), GraphError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskResult> + Send + 'static,
    {
        self.blueprint.insert(
            self.name,
            self.dependencies,
            Arc::new(move |ctx| Box::pin(callback(ctx))),
            false,
        )
    }

    /// Declares an aggregate task that only exists to group its
    /// dependencies under one name. Its action does nothing.
    pub fn group(self) -> Result<(), GraphError> {
        let action: Action =
            Arc::new(|_: TaskContext| -> BoxFuture<'static, TaskResult> { Box::pin(async { Ok(()) }) });
        self.blueprint.insert(self.name, self.dependencies, action, true)
    }
}

/// Immutable snapshot of a fully declared task graph.
pub struct TaskGraph {
    graph: Graph<Task, ()>,
    index: HashMap<ArcStr, NodeIndex>,
}

impl TaskGraph {
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &ArcStr> {
        self.graph.node_weights().map(|task| &task.name)
    }

    /// Direct dependencies of a task, sorted by name.
    pub fn dependencies(&self, name: &str) -> Result<Vec<ArcStr>, GraphError> {
        let index = self.node(name)?;
        let mut names: Vec<_> = self
            .graph
            .neighbors_directed(index, Direction::Incoming)
            .map(|dep| self.graph[dep].name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Whether the task is an aggregate declared with [`TaskDef::group`].
    pub fn is_group(&self, name: &str) -> Result<bool, GraphError> {
        Ok(self.task(name)?.group)
    }

    pub(crate) fn task(&self, name: &str) -> Result<&Task, GraphError> {
        Ok(&self.graph[self.node(name)?])
    }

    fn node(&self, name: &str) -> Result<NodeIndex, GraphError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| GraphError::UnknownTask(name.into()))
    }

    /// Computes the wave plan for `goal`: the goal tasks plus everything
    /// they transitively depend on.
    pub fn resolve_order<I, S>(&self, goal: I) -> Result<Plan, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut stack = goal
            .into_iter()
            .map(|name| self.node(name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut required = HashSet::new();

        while let Some(index) = stack.pop() {
            if required.insert(index) {
                stack.extend(self.graph.neighbors_directed(index, Direction::Incoming));
            }
        }

        // The graph is acyclic by construction.
        let order = petgraph::algo::toposort(&self.graph, None).map_err(|cycle| {
            let name = self.graph[cycle.node_id()].name.clone();
            GraphError::CyclicDependency {
                task: name.clone(),
                dependency: name,
            }
        })?;

        let mut wave_of: HashMap<NodeIndex, usize> = HashMap::new();
        let mut waves: Vec<Vec<ArcStr>> = Vec::new();

        for index in order.into_iter().filter(|i| required.contains(i)) {
            let wave = self
                .graph
                .neighbors_directed(index, Direction::Incoming)
                .filter_map(|dep| wave_of.get(&dep))
                .max()
                .map(|w| w + 1)
                .unwrap_or(0);

            wave_of.insert(index, wave);
            if waves.len() <= wave {
                waves.resize_with(wave + 1, Vec::new);
            }
            waves[wave].push(self.graph[index].name.clone());
        }

        for wave in &mut waves {
            wave.sort();
        }

        Ok(Plan { waves })
    }

    /// The given tasks together with every task that transitively depends
    /// on them.
    pub fn dependents<I, S>(&self, names: I) -> Result<BTreeSet<ArcStr>, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut closure = BTreeSet::new();

        for name in names {
            let start = self.node(name.as_ref())?;
            let mut dfs = petgraph::visit::Dfs::new(&self.graph, start);
            while let Some(index) = dfs.next(&self.graph) {
                closure.insert(self.graph[index].name.clone());
            }
        }

        Ok(closure)
    }

    pub(crate) fn edges(&self) -> impl Iterator<Item = (&ArcStr, &ArcStr)> {
        self.graph.raw_edges().iter().map(|edge| {
            (
                &self.graph[edge.source()].name,
                &self.graph[edge.target()].name,
            )
        })
    }
}

impl std::fmt::Display for TaskGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].name.replace('"', "\\\"");
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(
                f,
                "    {:?} --> {:?}",
                edge.source().index(),
                edge.target().index()
            )?;
        }

        Ok(())
    }
}

/// Tasks grouped into waves. Every task's dependencies within the plan sit
/// in strictly earlier waves; tasks inside one wave are independent.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Plan {
    waves: Vec<Vec<ArcStr>>,
}

impl Plan {
    pub fn waves(&self) -> &[Vec<ArcStr>] {
        &self.waves
    }

    /// Number of tasks in the plan.
    pub fn len(&self) -> usize {
        self.waves.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.wave_of(name).is_some()
    }

    pub fn wave_of(&self, name: &str) -> Option<usize> {
        self.waves
            .iter()
            .position(|wave| wave.iter().any(|task| &**task == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(blueprint: &mut Blueprint, name: &str, deps: &[&str]) -> Result<(), GraphError> {
        blueprint.declare(name, deps, |_| async { Ok(()) })
    }

    fn diamond() -> TaskGraph {
        let mut blueprint = Blueprint::new();
        noop(&mut blueprint, "js", &[]).unwrap();
        noop(&mut blueprint, "css", &[]).unwrap();
        noop(&mut blueprint, "css-code", &["css"]).unwrap();
        noop(&mut blueprint, "standalone", &["js", "css-code"]).unwrap();
        noop(&mut blueprint, "lint", &[]).unwrap();
        blueprint.finish().unwrap()
    }

    #[test]
    fn test_duplicate_task() {
        let mut blueprint = Blueprint::new();
        noop(&mut blueprint, "a", &[]).unwrap();

        let err = noop(&mut blueprint, "a", &[]).unwrap_err();
        assert_eq!(err, GraphError::DuplicateTask("a".into()));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let mut blueprint = Blueprint::new();
        let err = noop(&mut blueprint, "a", &["a"]).unwrap_err();

        assert!(matches!(err, GraphError::CyclicDependency { .. }));
        assert!(blueprint.finish().unwrap().is_empty());
    }

    #[test]
    fn test_cycle_through_forward_reference() {
        let mut blueprint = Blueprint::new();
        // `a` names `b` before `b` exists.
        noop(&mut blueprint, "a", &["b"]).unwrap();
        noop(&mut blueprint, "c", &["a"]).unwrap();

        // b -> a -> c, so `b` may not depend on `c`.
        let err = noop(&mut blueprint, "b", &["x", "c"]).unwrap_err();
        assert_eq!(
            err,
            GraphError::CyclicDependency {
                task: "b".into(),
                dependency: "c".into()
            }
        );

        // The rejected declaration left nothing behind, not even the
        // placeholder for `x`.
        assert_eq!(blueprint.missing(), vec![ArcStr::from("b")]);

        noop(&mut blueprint, "b", &[]).unwrap();
        let graph = blueprint.finish().unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.dependencies("b").unwrap(), Vec::<ArcStr>::new());
    }

    #[test]
    fn test_finish_with_undeclared_dependency() {
        let mut blueprint = Blueprint::new();
        noop(&mut blueprint, "a", &["ghost"]).unwrap();

        assert_eq!(
            blueprint.finish().err(),
            Some(GraphError::UnknownTask("ghost".into()))
        );
    }

    #[test]
    fn test_resolve_unknown_goal() {
        let graph = diamond();
        assert_eq!(
            graph.resolve_order(["nope"]),
            Err(GraphError::UnknownTask("nope".into()))
        );
    }

    #[test]
    fn test_resolve_minimal_waves() {
        let graph = diamond();
        let plan = graph.resolve_order(["standalone"]).unwrap();

        let waves: Vec<Vec<&str>> = plan
            .waves()
            .iter()
            .map(|wave| wave.iter().map(|name| &**name).collect())
            .collect();

        assert_eq!(
            waves,
            vec![vec!["css", "js"], vec!["css-code"], vec!["standalone"]]
        );
        assert!(!plan.contains("lint"));
    }

    #[test]
    fn test_resolve_pulls_in_every_dependency() {
        let graph = diamond();
        let plan = graph.resolve_order(["css-code", "standalone"]).unwrap();

        assert_eq!(plan.len(), 4);
        assert_eq!(plan.wave_of("js"), Some(0));
        assert_eq!(plan.wave_of("css"), Some(0));
        assert_eq!(plan.wave_of("standalone"), Some(2));
    }

    #[test]
    fn test_group_flag() {
        let mut blueprint = Blueprint::new();
        blueprint.task("all").depends_on(["a"]).group().unwrap();
        noop(&mut blueprint, "a", &[]).unwrap();
        let graph = blueprint.finish().unwrap();

        assert_eq!(graph.is_group("all"), Ok(true));
        assert_eq!(graph.is_group("a"), Ok(false));
        assert_eq!(graph.is_group("b"), Err(GraphError::UnknownTask("b".into())));
    }

    #[test]
    fn test_dependents_closure() {
        let graph = diamond();
        let closure = graph.dependents(["css"]).unwrap();

        let closure: Vec<&str> = closure.iter().map(|name| &**name).collect();
        assert_eq!(closure, vec!["css", "css-code", "standalone"]);
    }

    #[test]
    fn test_display_mermaid() {
        let graph = diamond();
        let rendered = graph.to_string();

        assert!(rendered.starts_with("graph LR\n"));
        assert!(rendered.contains("[\"standalone\"]"));
        assert_eq!(rendered.matches("-->").count(), 3);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn waves_respect_dependencies(
                matrix in prop::collection::vec(prop::collection::vec(any::<bool>(), 12), 1..12)
            ) {
                // Task i may only depend on tasks j < i, which keeps the
                // declaration acyclic.
                let mut blueprint = Blueprint::new();
                let names: Vec<String> = (0..matrix.len()).map(|i| format!("t{i}")).collect();

                for (i, row) in matrix.iter().enumerate() {
                    let deps: Vec<&str> = (0..i)
                        .filter(|&j| row[j])
                        .map(|j| names[j].as_str())
                        .collect();
                    noop(&mut blueprint, &names[i], &deps).unwrap();
                }

                let graph = blueprint.finish().unwrap();
                let plan = graph.resolve_order(&names).unwrap();
                prop_assert_eq!(plan.len(), names.len());

                for name in &names {
                    let wave = plan.wave_of(name).unwrap();
                    for dep in graph.dependencies(name).unwrap() {
                        prop_assert!(plan.wave_of(&dep).unwrap() < wave);
                    }
                }
            }

            #[test]
            fn closing_a_cycle_is_rejected(len in 2usize..8) {
                let mut blueprint = Blueprint::new();
                let names: Vec<String> = (0..len).map(|i| format!("t{i}")).collect();

                // A chain t0 -> t1 -> ... where t0 is only a placeholder.
                for i in 1..len {
                    noop(&mut blueprint, &names[i], &[names[i - 1].as_str()]).unwrap();
                }

                let last = names[len - 1].as_str();
                let closing = noop(&mut blueprint, &names[0], &[last]);
                prop_assert!(
                    matches!(closing, Err(GraphError::CyclicDependency { .. })),
                    "expected a cycle error"
                );
                prop_assert_eq!(blueprint.missing(), vec![ArcStr::from(names[0].as_str())]);
            }
        }
    }
}
