//! Wait-For Graph of blocked processes
//!
//! This module implements a directed wait-for graph (WFG) that tracks runtime
//! dependencies between simulated processes. An edge `A -> B` means process A
//! is blocked on a lock currently held by process B.
//!
//! # Layout
//!
//! Nodes live in an arena indexed by process id, so lookups never hash and a
//! cycle search only needs a flat mark array. Each node keeps two sorted
//! adjacency lists:
//! 1. *Outgoing (`out`)*: `A -> {B}`. Walked by the cycle detector in
//!    ascending id order, which keeps its output deterministic.
//! 2. *Incoming (`incoming`)*: `B -> {A}`. Used to drop every edge pointing at
//!    a process when it terminates, without scanning the whole arena.

use crate::core::error::GraphInconsistency;
use crate::core::types::ProcessId;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    out: Vec<ProcessId>,
    incoming: Vec<ProcessId>,
}

/// Represents a directed graph of process wait relationships
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitForGraph {
    nodes: Vec<Option<Node>>,
    edge_count: usize,
}

fn insert_sorted(list: &mut Vec<ProcessId>, id: ProcessId) -> bool {
    match list.binary_search(&id) {
        Ok(_) => false,
        Err(pos) => {
            list.insert(pos, id);
            true
        }
    }
}

fn remove_sorted(list: &mut Vec<ProcessId>, id: ProcessId) -> bool {
    match list.binary_search(&id) {
        Ok(pos) => {
            list.remove(pos);
            true
        }
        Err(_) => false,
    }
}

impl WaitForGraph {
    /// Create a new empty wait-for graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a process node. Registering twice is a no-op.
    pub fn add_node(&mut self, process: ProcessId) {
        if self.nodes.len() <= process {
            self.nodes.resize_with(process + 1, || None);
        }
        if self.nodes[process].is_none() {
            self.nodes[process] = Some(Node::default());
        }
    }

    pub fn contains(&self, process: ProcessId) -> bool {
        matches!(self.nodes.get(process), Some(Some(_)))
    }

    /// Upper bound (exclusive) of the ids that may appear in the graph
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    /// Registered process ids in ascending order
    pub fn node_ids(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(id, node)| node.as_ref().map(|_| id))
    }

    /// Processes that `process` waits for, ascending
    pub fn successors(&self, process: ProcessId) -> &[ProcessId] {
        match self.nodes.get(process) {
            Some(Some(node)) => &node.out,
            _ => &[],
        }
    }

    /// Processes waiting for `process`, ascending
    pub fn predecessors(&self, process: ProcessId) -> &[ProcessId] {
        match self.nodes.get(process) {
            Some(Some(node)) => &node.incoming,
            _ => &[],
        }
    }

    pub fn has_edge(&self, from: ProcessId, to: ProcessId) -> bool {
        self.successors(from).binary_search(&to).is_ok()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// All edges as `(from, to)` pairs, ordered by `from` then `to`
    pub fn edges(&self) -> Vec<(ProcessId, ProcessId)> {
        self.node_ids()
            .flat_map(|from| self.successors(from).iter().map(move |&to| (from, to)))
            .collect()
    }

    /// Add a directed edge: `from` waits for `to`
    ///
    /// # Returns
    /// `true` if the edge is new, `false` if it already existed
    ///
    /// # Errors
    /// Fails if either endpoint is not a registered process.
    pub fn add_edge(&mut self, from: ProcessId, to: ProcessId) -> Result<bool, GraphInconsistency> {
        if !self.contains(from) {
            return Err(GraphInconsistency::UnknownProcess(from));
        }
        if !self.contains(to) {
            return Err(GraphInconsistency::UnknownProcess(to));
        }

        let added = match &mut self.nodes[from] {
            Some(node) => insert_sorted(&mut node.out, to),
            None => false,
        };
        if added {
            if let Some(node) = &mut self.nodes[to] {
                insert_sorted(&mut node.incoming, from);
            }
            self.edge_count += 1;
        }
        Ok(added)
    }

    /// Remove a specific directed edge. Missing edges are ignored.
    pub fn remove_edge(&mut self, from: ProcessId, to: ProcessId) -> bool {
        let removed = match self.nodes.get_mut(from) {
            Some(Some(node)) => remove_sorted(&mut node.out, to),
            _ => false,
        };
        if removed {
            if let Some(Some(node)) = self.nodes.get_mut(to) {
                remove_sorted(&mut node.incoming, from);
            }
            self.edge_count -= 1;
        }
        removed
    }

    /// Clear the outgoing edges of a process (what it is waiting for)
    pub fn clear_wait_edges(&mut self, process: ProcessId) {
        let targets = match self.nodes.get_mut(process) {
            Some(Some(node)) => std::mem::take(&mut node.out),
            _ => return,
        };
        self.edge_count -= targets.len();
        for target in targets {
            if let Some(Some(node)) = self.nodes.get_mut(target) {
                remove_sorted(&mut node.incoming, process);
            }
        }
    }

    /// Remove a process and every edge touching it
    pub fn remove_node(&mut self, process: ProcessId) {
        self.clear_wait_edges(process);

        let waiters = match self.nodes.get_mut(process) {
            Some(Some(node)) => std::mem::take(&mut node.incoming),
            _ => return,
        };
        self.edge_count -= waiters.len();
        for waiter in waiters {
            if let Some(Some(node)) = self.nodes.get_mut(waiter) {
                remove_sorted(&mut node.out, process);
            }
        }
        self.nodes[process] = None;
    }
}
