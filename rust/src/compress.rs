//! Collapsing link chains into single ops and expanding schedules back.

use crate::graph::{Graph, Merged, OpAddress};

/// A graph with every link chain merged into one op.
///
/// Any schedule of the compressed graph expands to a schedule of the
/// original graph in which every chain is contiguous and in link order.
#[derive(Clone, Debug)]
pub struct LinkCompressor {
    merged: Merged,
    n_parent_ops: usize,
}

impl LinkCompressor {
    pub fn new(graph: &Graph) -> Self {
        Self {
            merged: graph.merged(&graph.link_chains()),
            n_parent_ops: graph.n_ops(),
        }
    }

    pub fn compressed(&self) -> &Graph {
        &self.merged.child
    }

    /// The original ops a compressed op stands for, in link order.
    pub fn parents(&self, compressed: OpAddress) -> &[OpAddress] {
        &self.merged.child_to_parents[compressed]
    }

    /// Number of compressed ops standing for more than one original op.
    pub fn n_chains(&self) -> usize {
        self.merged
            .child_to_parents
            .iter()
            .filter(|p| p.len() > 1)
            .count()
    }

    /// Original ops of a set of compressed ops, ascending.
    pub fn to_parent_ops(&self, compressed: &[OpAddress]) -> Vec<OpAddress> {
        let mut ops: Vec<OpAddress> = compressed
            .iter()
            .flat_map(|&c| self.parents(c).iter().copied())
            .collect();
        ops.sort_unstable();
        ops
    }

    /// Replace every compressed op in `order` by its chain.
    pub fn expand(&self, order: &[OpAddress]) -> Vec<OpAddress> {
        let mut expanded = Vec::with_capacity(self.n_parent_ops);
        for &c in order {
            expanded.extend_from_slice(self.parents(c));
        }
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::is_valid_schedule;

    #[test]
    fn test_chain_becomes_one_op() {
        // 0 -> 1 => 2 => 3 -> 4, with 0 -> 3 and 2 -> 4 as well.
        let mut g = Graph::new();
        g.insert_ops(5);
        g.insert_constraint(0, 1).unwrap();
        g.insert_link(1, 2).unwrap();
        g.insert_link(2, 3).unwrap();
        g.insert_constraint(3, 4).unwrap();
        g.insert_constraint(0, 3).unwrap();
        g.insert_constraint(2, 4).unwrap();

        let lc = LinkCompressor::new(&g);
        let c = lc.compressed();
        assert_eq!(c.n_ops(), 3);
        assert_eq!(lc.n_chains(), 1);
        assert_eq!(lc.parents(0), &[1, 2, 3]);
        assert_eq!(lc.parents(1), &[0]);
        assert_eq!(lc.parents(2), &[4]);
        assert_eq!(c.op(1).outs(), &[0]);
        assert_eq!(c.op(0).outs(), &[2]);
        assert_eq!(c.op(0).ins(), &[1]);

        let expanded = lc.expand(&[1, 0, 2]);
        assert_eq!(expanded, vec![0, 1, 2, 3, 4]);
        assert!(is_valid_schedule(&g, &expanded));
        assert_eq!(lc.to_parent_ops(&[2, 0]), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_no_links_is_identity() {
        let mut g = Graph::new();
        g.insert_ops(3);
        g.insert_constraint(2, 0).unwrap();
        let lc = LinkCompressor::new(&g);
        assert_eq!(lc.n_chains(), 0);
        assert_eq!(lc.compressed(), &g);
        assert_eq!(lc.expand(&[1, 2, 0]), vec![1, 2, 0]);
    }
}
