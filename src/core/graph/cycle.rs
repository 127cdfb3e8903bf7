//! Cycle detection over the wait-for graph
//!
//! Iterative depth-first search with an on-stack mark. A successor that is
//! still on the stack closes a cycle: the stack segment from that successor
//! to the current node is reported. Roots and successors are visited in
//! ascending id order so the same graph always yields the same cycles, and
//! cycles are listed in the order their lowest member was first reached.

use crate::core::error::GraphInconsistency;
use crate::core::graph::WaitForGraph;
use crate::core::types::ProcessId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Reusable cycle search
///
/// Keeps its scratch buffers between runs so that repeated detection on a
/// graph of stable size does not allocate beyond the reported cycles.
#[derive(Debug, Default)]
pub struct CycleDetector {
    marks: Vec<Mark>,
    /// Preorder index at which each node was first reached
    discovered: Vec<usize>,
    path: Vec<ProcessId>,
    /// DFS frames: (node, index of the next successor to visit)
    frames: Vec<(ProcessId, usize)>,
}

impl CycleDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the cycles of `graph`
    ///
    /// Each cycle is rotated so that its lowest process id comes first.
    /// Cycles are ordered by when the search first reached that lowest
    /// member, so a low root leading into a high cycle reports it early.
    ///
    /// # Errors
    /// Returns [`GraphInconsistency::DanglingEdge`] if an edge points at a
    /// process that is not a node of the graph.
    pub fn detect(
        &mut self,
        graph: &WaitForGraph,
    ) -> Result<Vec<Vec<ProcessId>>, GraphInconsistency> {
        let n = graph.capacity();
        self.marks.clear();
        self.marks.resize(n, Mark::Unvisited);
        self.discovered.clear();
        self.discovered.resize(n, usize::MAX);
        self.path.clear();
        self.frames.clear();

        let mut cycles = Vec::new();
        let mut reached = 0;

        for root in graph.node_ids() {
            if self.marks[root] != Mark::Unvisited {
                continue;
            }
            self.marks[root] = Mark::OnStack;
            self.discovered[root] = reached;
            reached += 1;
            self.path.push(root);
            self.frames.push((root, 0));

            while let Some(frame) = self.frames.last_mut() {
                let node = frame.0;
                let successors = graph.successors(node);

                if frame.1 >= successors.len() {
                    self.marks[node] = Mark::Done;
                    self.path.pop();
                    self.frames.pop();
                    continue;
                }

                let next = successors[frame.1];
                frame.1 += 1;

                if next >= n || !graph.contains(next) {
                    return Err(GraphInconsistency::DanglingEdge {
                        from: node,
                        to: next,
                    });
                }

                match self.marks[next] {
                    Mark::Unvisited => {
                        self.marks[next] = Mark::OnStack;
                        self.discovered[next] = reached;
                        reached += 1;
                        self.path.push(next);
                        self.frames.push((next, 0));
                    }
                    Mark::OnStack => {
                        if let Some(start) = self.path.iter().position(|&p| p == next) {
                            cycles.push(canonical(&self.path[start..]));
                        }
                    }
                    Mark::Done => {}
                }
            }
        }

        cycles.sort_by_key(|cycle: &Vec<ProcessId>| self.discovered[cycle[0]]);
        Ok(cycles)
    }
}

/// Rotate a cycle so it starts at its lowest member
fn canonical(segment: &[ProcessId]) -> Vec<ProcessId> {
    let mut cycle = segment.to_vec();
    if let Some((min_pos, _)) = cycle.iter().enumerate().min_by_key(|&(_, p)| *p) {
        cycle.rotate_left(min_pos);
    }
    cycle
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::WaitForGraphBuilder;
    use crate::core::types::LockId;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn graph(n: usize, edges: &[(ProcessId, ProcessId)]) -> WaitForGraph {
        let mut graph = WaitForGraph::new();
        for p in 0..n {
            graph.add_node(p);
        }
        for &(from, to) in edges {
            graph.add_edge(from, to).unwrap();
        }
        graph
    }

    /// Reference answer: some node reaches itself
    fn has_cycle_brute_force(graph: &WaitForGraph) -> bool {
        graph.node_ids().any(|start| {
            let mut seen = vec![false; graph.capacity()];
            let mut stack = graph.successors(start).to_vec();
            while let Some(node) = stack.pop() {
                if node == start {
                    return true;
                }
                if !seen[node] {
                    seen[node] = true;
                    stack.extend_from_slice(graph.successors(node));
                }
            }
            false
        })
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let g = graph(5, &[(0, 1), (1, 2), (2, 3), (0, 3), (4, 3)]);
        assert!(CycleDetector::new().detect(&g).unwrap().is_empty());
    }

    #[test]
    fn test_single_cycle_of_each_length() {
        for k in 2..=7 {
            let edges: Vec<_> = (0..k).map(|i| (i, (i + 1) % k)).collect();
            let g = graph(k, &edges);
            let cycles = CycleDetector::new().detect(&g).unwrap();
            assert_eq!(cycles, vec![(0..k).collect::<Vec<_>>()], "k = {k}");
        }
    }

    #[test]
    fn test_cycle_is_rotated_to_lowest_member() {
        // 5 -> 3 -> 4 -> 5, entered from 0
        let g = graph(6, &[(0, 5), (5, 3), (3, 4), (4, 5)]);
        let cycles = CycleDetector::new().detect(&g).unwrap();
        assert_eq!(cycles, vec![vec![3, 4, 5]]);
    }

    #[test]
    fn test_disjoint_cycles_reported_in_discovery_order() {
        // Root 0 leads into {4, 6} before roots 1 and 2 are visited
        let g = graph(7, &[(6, 4), (4, 6), (5, 1), (1, 5), (2, 3), (3, 2), (0, 6)]);
        let cycles = CycleDetector::new().detect(&g).unwrap();
        assert_eq!(cycles, vec![vec![4, 6], vec![1, 5], vec![2, 3]]);
    }

    #[test]
    fn test_low_root_into_high_cycle_comes_first() {
        let g = graph(7, &[(0, 6), (6, 4), (4, 6), (5, 1), (1, 5)]);
        let cycles = CycleDetector::new().detect(&g).unwrap();
        assert_eq!(cycles, vec![vec![4, 6], vec![1, 5]]);
    }

    #[test]
    fn test_without_entry_edges_order_follows_lowest_id() {
        let g = graph(7, &[(6, 4), (4, 6), (5, 1), (1, 5), (2, 3), (3, 2)]);
        let cycles = CycleDetector::new().detect(&g).unwrap();
        assert_eq!(cycles, vec![vec![1, 5], vec![2, 3], vec![4, 6]]);
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let g = graph(2, &[(1, 1)]);
        assert_eq!(CycleDetector::new().detect(&g).unwrap(), vec![vec![1]]);
    }

    #[test]
    fn test_detection_is_idempotent() {
        let g = graph(6, &[(0, 1), (1, 0), (2, 3), (3, 4), (4, 2), (5, 0)]);
        let mut detector = CycleDetector::new();
        let first = detector.detect(&g).unwrap();
        let second = detector.detect(&g).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_random_lock_traffic_matches_reference() {
        let mut rng = StdRng::seed_from_u64(0x1bc5);
        let locks: Vec<LockId> = (0..4).map(|i| LockId::new(format!("l{i}"))).collect();

        for _round in 0..50 {
            let mut builder = WaitForGraphBuilder::new();
            for p in 0..6 {
                builder.add_process(p);
            }
            let mut detector = CycleDetector::new();

            for _step in 0..40 {
                let process = rng.random_range(0..6);
                let lock = &locks[rng.random_range(0..locks.len())];

                if builder.waiting_on(process).is_some() {
                    continue;
                }
                if rng.random_bool(0.6) {
                    let _ = builder.on_lock_wait(process, lock);
                } else if let Some(held) = builder.held_by(process).first().cloned() {
                    builder.on_lock_release(process, &held).unwrap();
                }

                builder.check_invariants().unwrap();
                let cycles = detector.detect(builder.graph()).unwrap();
                assert_eq!(!cycles.is_empty(), has_cycle_brute_force(builder.graph()));
                for cycle in &cycles {
                    for (i, &p) in cycle.iter().enumerate() {
                        let next = cycle[(i + 1) % cycle.len()];
                        assert!(builder.graph().has_edge(p, next));
                    }
                }
            }
        }
    }
}
