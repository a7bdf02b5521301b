// topo.rs — Deterministic topological sorter over dense node indexes
//
// Kahn's algorithm where the ready set is a min-heap, so among nodes with
// no pending producers the lowest index always goes first. Graphs that are
// already in dependency order come back unchanged.
//
// Preconditions: edge endpoints are `< num_nodes`.
// Postconditions: `Ok(order)` is a permutation of `0..num_nodes` in which
//                 every edge source precedes its target.
// Failure modes: `Err(cycle)` lists the indexes of one cycle, in edge order,
//                starting from its lowest index.
// Side effects: none.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone)]
pub struct TopologicalSorter {
    succs: Vec<Vec<usize>>,
    preds: Vec<Vec<usize>>,
}

impl TopologicalSorter {
    pub fn new(num_nodes: usize) -> Self {
        TopologicalSorter {
            succs: vec![Vec::new(); num_nodes],
            preds: vec![Vec::new(); num_nodes],
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.succs.len()
    }

    /// `from` must be emitted before `to`. Repeated edges are allowed.
    pub fn add_edge(&mut self, from: usize, to: usize) {
        self.succs[from].push(to);
        self.preds[to].push(from);
    }

    pub fn sort(&self) -> Result<Vec<usize>, Vec<usize>> {
        let n = self.num_nodes();
        let mut in_degree: Vec<usize> = self.preds.iter().map(Vec::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(n);
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &next in &self.succs[node] {
                in_degree[next] -= 1;
                if in_degree[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() == n {
            return Ok(order);
        }
        let mut remaining = vec![true; n];
        for &node in &order {
            remaining[node] = false;
        }
        Err(self.find_cycle(&remaining))
    }

    /// Every unsorted node still has an unsorted producer, so walking
    /// producers from any of them must revisit a node.
    fn find_cycle(&self, remaining: &[bool]) -> Vec<usize> {
        let Some(start) = remaining.iter().position(|&r| r) else {
            return Vec::new();
        };
        let mut position: Vec<Option<usize>> = vec![None; remaining.len()];
        let mut path = Vec::new();
        let mut node = start;
        loop {
            if let Some(at) = position[node] {
                let mut cycle = path.split_off(at);
                cycle.reverse();
                if let Some(min_at) = cycle.iter().enumerate().min_by_key(|&(_, v)| *v).map(|(i, _)| i) {
                    cycle.rotate_left(min_at);
                }
                return cycle;
            }
            position[node] = Some(path.len());
            path.push(node);
            match self.preds[node].iter().copied().filter(|&p| remaining[p]).min() {
                Some(pred) => node = pred,
                None => return path,
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unordered_nodes_keep_index_order() {
        let sorter = TopologicalSorter::new(4);
        assert_eq!(sorter.sort(), Ok(vec![0, 1, 2, 3]));
    }

    #[test]
    fn producers_move_ahead_of_consumers() {
        let mut sorter = TopologicalSorter::new(3);
        sorter.add_edge(2, 0);
        sorter.add_edge(1, 2);
        assert_eq!(sorter.sort(), Ok(vec![1, 2, 0]));
    }

    #[test]
    fn lowest_ready_index_first() {
        // 3 -> 0, and 1, 2 free: 1 and 2 come before 3's consumer
        let mut sorter = TopologicalSorter::new(4);
        sorter.add_edge(3, 0);
        assert_eq!(sorter.sort(), Ok(vec![1, 2, 3, 0]));
    }

    #[test]
    fn repeated_edges() {
        let mut sorter = TopologicalSorter::new(2);
        sorter.add_edge(1, 0);
        sorter.add_edge(1, 0);
        assert_eq!(sorter.sort(), Ok(vec![1, 0]));
    }

    #[test]
    fn cycle_is_reported_in_edge_order() {
        let mut sorter = TopologicalSorter::new(5);
        sorter.add_edge(0, 1);
        sorter.add_edge(3, 2);
        sorter.add_edge(2, 4);
        sorter.add_edge(4, 3);
        // 1 is free after 0; 2 -> 4 -> 3 -> 2 is stuck
        assert_eq!(sorter.sort(), Err(vec![2, 4, 3]));
    }

    #[test]
    fn downstream_of_cycle_is_not_part_of_it() {
        let mut sorter = TopologicalSorter::new(3);
        sorter.add_edge(1, 0);
        sorter.add_edge(2, 1);
        sorter.add_edge(1, 2);
        assert_eq!(sorter.sort(), Err(vec![1, 2]));
    }

    #[test]
    fn self_loop() {
        let mut sorter = TopologicalSorter::new(2);
        sorter.add_edge(1, 1);
        assert_eq!(sorter.sort(), Err(vec![1]));
    }
}
