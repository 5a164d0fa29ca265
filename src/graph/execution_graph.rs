//! In-memory DAG for one pipeline run.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{TaskContextId, TaskId};

/// Node identity in the execution graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskVertex {
    pub task_id: TaskId,
    pub task_context_id: TaskContextId,
}

impl TaskVertex {
    pub fn new(task_id: TaskId, task_context_id: TaskContextId) -> Self {
        Self {
            task_id,
            task_context_id,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Graph is broken: task #{task_id} has no descendants where at least one is required")]
    BrokenGraph { task_id: TaskId },

    #[error("Edge {from} -> {to} would introduce a cycle")]
    CycleDetected { from: TaskId, to: TaskId },

    #[error("Vertex #{0} not found in graph")]
    VertexNotFound(TaskId),

    #[error("Vertex #{0} cannot be removed: it has started")]
    VertexHasStarted(TaskId),
}

/// Adjacency-list DAG, persisted as one serialized document per exec
/// context and always mutated read-modify-write-replace under the guard.
///
/// `BTreeMap` keys keep vertex iteration in ascending task-id order, which
/// the assignment service relies on for oldest-first fairness.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionGraph {
    vertices: BTreeMap<TaskId, TaskVertex>,
    /// task id -> direct successor task ids
    successors: BTreeMap<TaskId, BTreeSet<TaskId>>,
    /// task id -> direct predecessor task ids
    predecessors: BTreeMap<TaskId, BTreeSet<TaskId>>,
}

impl ExecutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, vertex: TaskVertex) {
        self.successors.entry(vertex.task_id).or_default();
        self.predecessors.entry(vertex.task_id).or_default();
        self.vertices.insert(vertex.task_id, vertex);
    }

    pub fn contains(&self, task_id: TaskId) -> bool {
        self.vertices.contains_key(&task_id)
    }

    pub fn vertex(&self, task_id: TaskId) -> Option<&TaskVertex> {
        self.vertices.get(&task_id)
    }

    pub fn vertices(&self) -> impl Iterator<Item = &TaskVertex> {
        self.vertices.values()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Insert one edge. The cycle check is defensive: production never
    /// constructs a cycle, so hitting it is a structural error.
    pub fn add_edge(&mut self, from: TaskId, to: TaskId) -> Result<(), GraphError> {
        if !self.vertices.contains_key(&from) {
            return Err(GraphError::VertexNotFound(from));
        }
        if !self.vertices.contains_key(&to) {
            return Err(GraphError::VertexNotFound(to));
        }
        if from == to || self.is_reachable(to, from) {
            return Err(GraphError::CycleDetected { from, to });
        }
        self.successors.entry(from).or_default().insert(to);
        self.predecessors.entry(to).or_default().insert(from);
        Ok(())
    }

    /// Link every `from` task to every `to` vertex, inserting missing
    /// target vertices first. This is the single splice operation dynamic
    /// fan-out uses to connect all branch tails to the pre-recorded
    /// descendant set.
    pub fn add_edges(&mut self, from_ids: &[TaskId], to: &BTreeSet<TaskVertex>) -> Result<(), GraphError> {
        for vertex in to {
            if !self.contains(vertex.task_id) {
                self.add_vertex(vertex.clone());
            }
        }
        for &from in from_ids {
            for vertex in to {
                self.add_edge(from, vertex.task_id)?;
            }
        }
        Ok(())
    }

    /// Forward reachability walk from `task_id`, excluding the vertex
    /// itself. Terminates because the graph is acyclic. Idempotent and
    /// monotonic under state-only changes: only structural mutation can
    /// alter the result.
    pub fn find_descendants(&self, task_id: TaskId) -> Result<BTreeSet<TaskVertex>, GraphError> {
        if !self.vertices.contains_key(&task_id) {
            return Err(GraphError::VertexNotFound(task_id));
        }
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([task_id]);
        while let Some(current) = queue.pop_front() {
            if let Some(next) = self.successors.get(&current) {
                for &succ in next {
                    if seen.insert(succ) {
                        queue.push_back(succ);
                    }
                }
            }
        }
        Ok(seen
            .into_iter()
            .map(|id| self.vertices[&id].clone())
            .collect())
    }

    /// Direct predecessors of a task.
    pub fn find_direct_ancestors(&self, task_id: TaskId) -> Result<BTreeSet<TaskVertex>, GraphError> {
        let preds = self
            .predecessors
            .get(&task_id)
            .ok_or(GraphError::VertexNotFound(task_id))?;
        Ok(preds
            .iter()
            .map(|id| self.vertices[id].clone())
            .collect())
    }

    pub fn direct_successors(&self, task_id: TaskId) -> Result<BTreeSet<TaskVertex>, GraphError> {
        let succs = self
            .successors
            .get(&task_id)
            .ok_or(GraphError::VertexNotFound(task_id))?;
        Ok(succs
            .iter()
            .map(|id| self.vertices[id].clone())
            .collect())
    }

    /// Vertices with no predecessors.
    pub fn roots(&self) -> BTreeSet<TaskVertex> {
        self.vertices
            .values()
            .filter(|v| {
                self.predecessors
                    .get(&v.task_id)
                    .is_none_or(BTreeSet::is_empty)
            })
            .cloned()
            .collect()
    }

    /// Remove a vertex, splicing its predecessors to its successors.
    ///
    /// Only legal for never-started, skipped tasks; the caller checks the
    /// state table before calling.
    pub fn remove_vertex(&mut self, task_id: TaskId) -> Result<(), GraphError> {
        if !self.vertices.contains_key(&task_id) {
            return Err(GraphError::VertexNotFound(task_id));
        }
        let preds = self.predecessors.remove(&task_id).unwrap_or_default();
        let succs = self.successors.remove(&task_id).unwrap_or_default();
        for &p in &preds {
            if let Some(out) = self.successors.get_mut(&p) {
                out.remove(&task_id);
            }
        }
        for &s in &succs {
            if let Some(inc) = self.predecessors.get_mut(&s) {
                inc.remove(&task_id);
            }
        }
        for &p in &preds {
            for &s in &succs {
                self.add_edge(p, s)?;
            }
        }
        self.vertices.remove(&task_id);
        Ok(())
    }

    fn is_reachable(&self, from: TaskId, target: TaskId) -> bool {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == target {
                return true;
            }
            if let Some(next) = self.successors.get(&current) {
                for &succ in next {
                    if seen.insert(succ) {
                        queue.push_back(succ);
                    }
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vertex(id: TaskId) -> TaskVertex {
        TaskVertex::new(id, TaskContextId::root())
    }

    fn chain(ids: &[TaskId]) -> ExecutionGraph {
        let mut graph = ExecutionGraph::new();
        for &id in ids {
            graph.add_vertex(vertex(id));
        }
        for pair in ids.windows(2) {
            graph.add_edge(pair[0], pair[1]).unwrap();
        }
        graph
    }

    #[test]
    fn test_find_descendants_walks_forward() {
        let graph = chain(&[1, 2, 3]);
        let descendants = graph.find_descendants(1).unwrap();
        let ids: Vec<TaskId> = descendants.iter().map(|v| v.task_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(graph.find_descendants(3).unwrap().is_empty());
    }

    #[test]
    fn test_find_descendants_is_idempotent() {
        let graph = chain(&[1, 2, 3, 4]);
        let first = graph.find_descendants(2).unwrap();
        let second = graph.find_descendants(2).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_direct_ancestors() {
        let mut graph = chain(&[1, 2]);
        graph.add_vertex(vertex(3));
        graph.add_edge(1, 3).unwrap();
        graph.add_edge(3, 2).unwrap();

        let ancestors = graph.find_direct_ancestors(2).unwrap();
        let ids: Vec<TaskId> = ancestors.iter().map(|v| v.task_id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let mut graph = chain(&[1, 2, 3]);
        assert_eq!(
            graph.add_edge(3, 1),
            Err(GraphError::CycleDetected { from: 3, to: 1 })
        );
        assert_eq!(
            graph.add_edge(1, 1),
            Err(GraphError::CycleDetected { from: 1, to: 1 })
        );
    }

    #[test]
    fn test_add_edges_inserts_missing_vertices() {
        let mut graph = chain(&[1]);
        let targets: BTreeSet<TaskVertex> = [vertex(5), vertex(6)].into_iter().collect();
        graph.add_edges(&[1], &targets).unwrap();
        assert!(graph.contains(5));
        assert!(graph.contains(6));
        assert_eq!(graph.find_descendants(1).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_vertex_splices_edges() {
        let mut graph = chain(&[1, 2, 3]);
        graph.remove_vertex(2).unwrap();
        assert!(!graph.contains(2));
        let descendants = graph.find_descendants(1).unwrap();
        let ids: Vec<TaskId> = descendants.iter().map(|v| v.task_id).collect();
        assert_eq!(ids, vec![3]);
        let ancestors = graph.find_direct_ancestors(3).unwrap();
        assert_eq!(ancestors.iter().next().unwrap().task_id, 1);
    }

    #[test]
    fn test_roots() {
        let mut graph = chain(&[1, 2]);
        graph.add_vertex(vertex(10));
        let roots: Vec<TaskId> = graph.roots().iter().map(|v| v.task_id).collect();
        assert_eq!(roots, vec![1, 10]);
    }

    #[test]
    fn test_serde_round_trip() {
        let graph = chain(&[1, 2, 3]);
        let json = serde_json::to_value(&graph).unwrap();
        let back: ExecutionGraph = serde_json::from_value(json).unwrap();
        assert_eq!(back.vertex_count(), 3);
        assert_eq!(back.find_descendants(1).unwrap().len(), 2);
    }
}
