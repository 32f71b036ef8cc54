//! Task graph for dependency management.
//!
//! The `TaskGraph` represents tasks and their dependency edges as a
//! directed acyclic graph, enabling parallel execution of independent
//! branches. Acyclicity is enforced at every edge insertion, so a
//! constructed graph is valid by construction.

use crate::core::task::{Task, TaskId, TaskStatus};
use crate::error::{Error, Result};
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// Serializable snapshot of a task graph: tasks plus dependency edges.
///
/// Snapshots are what the coordinator persists and what `GetStatus`
/// callers receive; they are plain data with no graph indices.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GraphSnapshot {
    /// All tasks, in insertion order.
    pub tasks: Vec<Task>,
    /// Dependency edges as `(dependency, dependent)` id pairs.
    pub edges: Vec<(TaskId, TaskId)>,
}

impl GraphSnapshot {
    /// Count tasks currently in the given status (by discriminant).
    pub fn count_where(&self, pred: impl Fn(&Task) -> bool) -> usize {
        self.tasks.iter().filter(|t| pred(t)).count()
    }

    /// Look up a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == *id)
    }
}

/// The task dependency graph.
///
/// Nodes are tasks, edges point from a dependency to its dependent.
/// An id index supports O(1) lookups by `TaskId`.
#[derive(Debug)]
pub struct TaskGraph {
    graph: DiGraph<Task, ()>,
    task_index: HashMap<TaskId, NodeIndex>,
}

impl Default for TaskGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGraph {
    /// Create a new empty task graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            task_index: HashMap::new(),
        }
    }

    /// Add a task to the graph.
    ///
    /// If the task already exists (same `TaskId`), the existing node is kept.
    pub fn add_task(&mut self, task: Task) -> NodeIndex {
        if let Some(&index) = self.task_index.get(&task.id) {
            return index;
        }
        let id = task.id;
        let index = self.graph.add_node(task);
        self.task_index.insert(id, index);
        index
    }

    /// Add a dependency edge: `from` must succeed before `to` can start.
    ///
    /// The dependent task's `dependencies` set is kept in sync with the
    /// edge. Fails with `GraphCycle` if the edge would create a cycle,
    /// leaving the graph unchanged.
    pub fn add_dependency(&mut self, from: &TaskId, to: &TaskId) -> Result<()> {
        let from_index = *self
            .task_index
            .get(from)
            .ok_or(Error::TaskNotFound { id: *from })?;
        let to_index = *self
            .task_index
            .get(to)
            .ok_or(Error::TaskNotFound { id: *to })?;

        let edge = self.graph.add_edge(from_index, to_index, ());
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            let name = |idx: NodeIndex| {
                self.graph
                    .node_weight(idx)
                    .map(|t| t.name.clone())
                    .unwrap_or_else(|| "unknown".to_string())
            };
            return Err(Error::GraphCycle {
                from: name(from_index),
                to: name(to_index),
            });
        }

        if let Some(task) = self.graph.node_weight_mut(to_index) {
            task.dependencies.insert(*from);
        }
        Ok(())
    }

    /// Get a reference to a task by its id.
    pub fn get_task(&self, id: &TaskId) -> Option<&Task> {
        self.task_index
            .get(id)
            .and_then(|&index| self.graph.node_weight(index))
    }

    /// Get a mutable reference to a task by its id.
    pub fn get_task_mut(&mut self, id: &TaskId) -> Option<&mut Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph.node_weight_mut(index)
        } else {
            None
        }
    }

    /// Number of tasks in the graph.
    pub fn task_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of dependency edges in the graph.
    pub fn dependency_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Check if a dependency edge exists between two tasks.
    pub fn has_dependency(&self, from: &TaskId, to: &TaskId) -> bool {
        if let (Some(&f), Some(&t)) = (self.task_index.get(from), self.task_index.get(to)) {
            self.graph.find_edge(f, t).is_some()
        } else {
            false
        }
    }

    /// Whether the graph contains a task.
    pub fn contains_task(&self, id: &TaskId) -> bool {
        self.task_index.contains_key(id)
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Tasks the given task depends on (predecessors).
    pub fn dependencies_of(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, petgraph::Direction::Incoming)
    }

    /// Tasks that depend on the given task (successors).
    pub fn dependents_of(&self, id: &TaskId) -> Vec<&Task> {
        self.neighbors(id, petgraph::Direction::Outgoing)
    }

    fn neighbors(&self, id: &TaskId, dir: petgraph::Direction) -> Vec<&Task> {
        if let Some(&index) = self.task_index.get(id) {
            self.graph
                .neighbors_directed(index, dir)
                .filter_map(|n| self.graph.node_weight(n))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// All tasks in the graph.
    pub fn all_tasks(&self) -> Vec<&Task> {
        self.graph.node_weights().collect()
    }

    /// Promote `Pending` tasks whose dependencies have all succeeded.
    ///
    /// Returns the ids of tasks that became `Ready` in this pass.
    pub fn advance_ready(&mut self) -> Vec<TaskId> {
        let mut promoted = Vec::new();
        let indices: Vec<NodeIndex> = self.graph.node_indices().collect();
        for index in indices {
            let is_pending = self
                .graph
                .node_weight(index)
                .map(|t| t.status == TaskStatus::Pending)
                .unwrap_or(false);
            if !is_pending {
                continue;
            }
            let deps_succeeded = self
                .graph
                .neighbors_directed(index, petgraph::Direction::Incoming)
                .all(|dep| {
                    self.graph
                        .node_weight(dep)
                        .map(|t| t.succeeded())
                        .unwrap_or(false)
                });
            if deps_succeeded {
                if let Some(task) = self.graph.node_weight_mut(index) {
                    task.mark_ready();
                    promoted.push(task.id);
                }
            }
        }
        promoted
    }

    /// Tasks currently in `Ready` status, highest priority first.
    ///
    /// Ties break by name then id for a deterministic dispatch order.
    pub fn ready_tasks(&self) -> Vec<TaskId> {
        let mut ready: Vec<&Task> = self
            .graph
            .node_weights()
            .filter(|t| t.status == TaskStatus::Ready)
            .collect();
        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.0.cmp(&b.id.0))
        });
        ready.into_iter().map(|t| t.id).collect()
    }

    /// Queued (Ready or Assigned, not Running) tasks assigned to an agent.
    pub fn queued_for(&self, agent: &crate::agent::AgentId) -> Vec<&Task> {
        self.graph
            .node_weights()
            .filter(|t| t.is_queued() && t.assigned_agent.as_ref() == Some(agent))
            .collect()
    }

    /// Cancel a task and, transitively, every not-yet-started dependent.
    ///
    /// Running tasks are never touched here: a dependent cannot be running
    /// while its dependency is unfinished, and the root itself is only
    /// cancelled when still queued. Returns the ids that were cancelled.
    pub fn cancel_cascade(&mut self, id: &TaskId, reason: &str) -> Vec<TaskId> {
        let mut cancelled = Vec::new();
        let Some(&root) = self.task_index.get(id) else {
            return cancelled;
        };

        let mut queue = VecDeque::from([root]);
        let mut seen = HashSet::from([root]);
        while let Some(index) = queue.pop_front() {
            if let Some(task) = self.graph.node_weight_mut(index) {
                if !task.is_terminal() && task.status != TaskStatus::Running {
                    task.cancel(reason);
                    cancelled.push(task.id);
                }
            }
            for next in self
                .graph
                .neighbors_directed(index, petgraph::Direction::Outgoing)
                .collect::<Vec<_>>()
            {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        cancelled
    }

    /// Whether every task has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.graph.node_weights().all(|t| t.is_terminal())
    }

    /// Whether any non-optional task has failed.
    pub fn has_required_failure(&self) -> bool {
        self.graph
            .node_weights()
            .any(|t| !t.optional && matches!(t.status, TaskStatus::Failed { .. }))
    }

    /// Tasks in topological order (dependencies before dependents).
    pub fn topological_order(&self) -> Result<Vec<&Task>> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            let name = self
                .graph
                .node_weight(cycle.node_id())
                .map(|t| t.name.clone())
                .unwrap_or_else(|| "unknown".to_string());
            Error::GraphCycle {
                from: name.clone(),
                to: name,
            }
        })?;
        Ok(sorted
            .into_iter()
            .filter_map(|index| self.graph.node_weight(index))
            .collect())
    }

    /// Produce a serializable snapshot of tasks and edges.
    pub fn snapshot(&self) -> GraphSnapshot {
        let tasks = self.graph.node_weights().cloned().collect();
        let edges = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                Some((self.graph.node_weight(a)?.id, self.graph.node_weight(b)?.id))
            })
            .collect();
        GraphSnapshot { tasks, edges }
    }

    /// Rebuild a graph from a snapshot.
    ///
    /// Fails with `GraphCycle` if the snapshot's edges are not acyclic.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self> {
        let mut graph = Self::new();
        for task in snapshot.tasks {
            graph.add_task(task);
        }
        for (from, to) in snapshot.edges {
            graph.add_dependency(&from, &to)?;
        }
        Ok(graph)
    }
}
