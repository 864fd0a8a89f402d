// src/dag/graph.rs

use std::collections::{HashMap, HashSet, VecDeque};

use crate::errors::{HakuError, Result};
use crate::model::Task;
use crate::types::TaskId;

/// Per-node readiness bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    /// Not yet handed to the scheduler.
    Waiting,
    /// Submitted (possibly retried), not yet done.
    Started,
    Done,
}

/// Arena node: the task plus index-based adjacency.
#[derive(Debug, Clone)]
struct GraphNode {
    task: Task,
    /// Indices of prerequisite tasks.
    deps: Vec<usize>,
    /// Indices of tasks that list this one as a prerequisite.
    dependents: Vec<usize>,
    /// Prerequisites that have not completed yet.
    in_degree: usize,
    state: NodeState,
}

/// In-memory DAG for a single pipeline run.
///
/// Tasks live in a flat vector indexed by a dense id assigned at build time;
/// edges are index lists, so there are no pointer cycles. After `build` only
/// the in-degree counters and node states change.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    nodes: Vec<GraphNode>,
    index: HashMap<TaskId, usize>,
    edge_count: usize,
    completed: usize,
}

impl TaskGraph {
    /// Build and validate a graph from a pipeline's tasks.
    ///
    /// Fails with `DanglingDependency` if a dependency is not in `tasks`, and
    /// with `CycleDetected` if Kahn's algorithm cannot resolve every node.
    /// Repeated dependency ids on one task count as a single edge.
    pub fn build(tasks: Vec<Task>) -> Result<Self> {
        let mut index = HashMap::with_capacity(tasks.len());
        for (i, task) in tasks.iter().enumerate() {
            if index.insert(task.id.clone(), i).is_some() {
                return Err(HakuError::ValidationError(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }

        let mut nodes: Vec<GraphNode> = Vec::with_capacity(tasks.len());
        for task in tasks {
            let mut deps = Vec::with_capacity(task.dependencies.len());
            let mut seen = HashSet::new();
            for dep in &task.dependencies {
                let dep_idx = *index.get(dep).ok_or_else(|| HakuError::DanglingDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                })?;
                if seen.insert(dep_idx) {
                    deps.push(dep_idx);
                }
            }
            nodes.push(GraphNode {
                in_degree: deps.len(),
                task,
                deps,
                dependents: Vec::new(),
                state: NodeState::Waiting,
            });
        }

        let mut edge_count = 0;
        for i in 0..nodes.len() {
            let deps = nodes[i].deps.clone();
            edge_count += deps.len();
            for dep in deps {
                nodes[dep].dependents.push(i);
            }
        }

        let graph = Self {
            nodes,
            index,
            edge_count,
            completed: 0,
        };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Kahn's algorithm on a scratch copy of the in-degrees.
    fn check_acyclic(&self) -> Result<()> {
        let order = self.kahn_order();
        if order.len() == self.nodes.len() {
            return Ok(());
        }

        let resolved: HashSet<usize> = order.into_iter().collect();
        let stuck = (0..self.nodes.len())
            .find(|i| !resolved.contains(i))
            .map(|i| self.nodes[i].task.id.clone())
            .unwrap_or_default();
        Err(HakuError::CycleDetected(stuck))
    }

    fn kahn_order(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.deps.len()).collect();
        let mut queue: VecDeque<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &dependent in &self.nodes[i].dependents {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }
        order
    }

    /// Tasks in a dependency-respecting order.
    pub fn topological_order(&self) -> Vec<&Task> {
        self.kahn_order()
            .into_iter()
            .map(|i| &self.nodes[i].task)
            .collect()
    }

    /// Tasks whose prerequisites are all done and that have not been started.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        self.nodes
            .iter()
            .filter(|n| n.in_degree == 0 && n.state == NodeState::Waiting)
            .map(|n| &n.task)
            .collect()
    }

    /// Record that the scheduler handed `task` to the worker pool.
    pub fn mark_started(&mut self, task: &str) -> Result<()> {
        let idx = self.lookup(task)?;
        let node = &mut self.nodes[idx];
        match node.state {
            NodeState::Waiting if node.in_degree == 0 => {
                node.state = NodeState::Started;
                Ok(())
            }
            NodeState::Waiting => Err(HakuError::Invariant(format!(
                "task '{}' started with {} unfinished dependencies",
                task, node.in_degree
            ))),
            NodeState::Started | NodeState::Done => Err(HakuError::Invariant(format!(
                "task '{}' started twice",
                task
            ))),
        }
    }

    /// Record that `task` completed successfully.
    ///
    /// Every dependent's in-degree drops by exactly one; the dependents that
    /// reach zero are returned. Must be called once per task, only after the
    /// task really finished.
    pub fn mark_done(&mut self, task: &str) -> Result<Vec<&Task>> {
        let idx = self.lookup(task)?;
        if self.nodes[idx].state != NodeState::Started {
            return Err(HakuError::Invariant(format!(
                "mark_done for task '{}' which is not running (state {:?})",
                task, self.nodes[idx].state
            )));
        }
        self.nodes[idx].state = NodeState::Done;
        self.completed += 1;

        let dependents = self.nodes[idx].dependents.clone();
        let mut newly_ready = Vec::new();
        for dep in dependents {
            let node = &mut self.nodes[dep];
            node.in_degree = node.in_degree.checked_sub(1).ok_or_else(|| {
                HakuError::Invariant(format!("in-degree underflow on task '{}'", node.task.id))
            })?;
            if node.in_degree == 0 {
                newly_ready.push(dep);
            }
        }

        Ok(newly_ready
            .into_iter()
            .map(|i| &self.nodes[i].task)
            .collect())
    }

    fn lookup(&self, task: &str) -> Result<usize> {
        self.index
            .get(task)
            .copied()
            .ok_or_else(|| HakuError::Invariant(format!("task '{}' is not in the graph", task)))
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.index.get(id).map(|&i| &self.nodes[i].task)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.nodes.iter().map(|n| &n.task)
    }

    /// Current count of unfinished prerequisites.
    pub fn in_degree(&self, id: &str) -> Option<usize> {
        self.index.get(id).map(|&i| self.nodes[i].in_degree)
    }

    /// Immediate dependents of a task.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        match self.index.get(id) {
            Some(&i) => self.nodes[i]
                .dependents
                .iter()
                .map(|&d| self.nodes[d].task.id.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Number of successful `mark_done` calls so far.
    pub fn completed_count(&self) -> usize {
        self.completed
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.nodes.len()
    }
}
