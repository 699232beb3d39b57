//! Schedules and their liveness.

use crate::error::StructuralError;
use crate::graph::{AllocAddress, Graph, OpAddress, ScheduleIndex};
use crate::weight::AllocWeight;

/// A total order of a graph's ops, with its inverse.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schedule {
    /// `order[i]` is the op at schedule index `i`.
    order: Vec<OpAddress>,
    /// `positions[op]` is the schedule index of `op`.
    positions: Vec<ScheduleIndex>,
}

impl Schedule {
    /// Wrap `order`, which must be a permutation of `0..order.len()`.
    pub fn from_order(order: Vec<OpAddress>) -> Result<Self, StructuralError> {
        let n_ops = order.len();
        let mut positions = vec![usize::MAX; n_ops];
        for (i, &op) in order.iter().enumerate() {
            if op >= n_ops {
                return Err(StructuralError::OpOutOfRange { op, n_ops });
            }
            if positions[op] != usize::MAX {
                return Err(StructuralError::InvalidOrder {
                    n_ops,
                    reason: format!("op {} appears twice", op),
                });
            }
            positions[op] = i;
        }
        Ok(Self { order, positions })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    #[inline]
    pub fn op_at(&self, index: ScheduleIndex) -> OpAddress {
        self.order[index]
    }

    #[inline]
    pub fn position(&self, op: OpAddress) -> ScheduleIndex {
        self.positions[op]
    }

    pub fn order(&self) -> &[OpAddress] {
        &self.order
    }

    pub fn positions(&self) -> &[ScheduleIndex] {
        &self.positions
    }

    pub fn into_order(self) -> Vec<OpAddress> {
        self.order
    }

    /// First and last schedule index of an alloc's ops, if it has any.
    pub fn alloc_span(&self, graph: &Graph, alloc: AllocAddress) -> Option<(usize, usize)> {
        let ops = graph.alloc(alloc).ops();
        let first = ops.iter().map(|&op| self.positions[op]).min()?;
        let last = ops.iter().map(|&op| self.positions[op]).max()?;
        Some((first, last))
    }

    /// Sum over allocs of weight times the number of slots it is live for.
    pub fn sum_liveness(&self, graph: &Graph) -> AllocWeight {
        (0..graph.n_allocs())
            .filter_map(|a| {
                self.alloc_span(graph, a)
                    .map(|(first, last)| graph.alloc(a).weight() * (last - first + 1))
            })
            .sum()
    }

    /// Largest total weight live at any one slot.
    pub fn max_liveness(&self, graph: &Graph) -> AllocWeight {
        self.liveness_profile(graph)
            .into_iter()
            .max()
            .unwrap_or_default()
    }

    /// The live weight at every slot.
    pub fn liveness_profile(&self, graph: &Graph) -> Vec<AllocWeight> {
        let mut delta = vec![AllocWeight::zero(); self.order.len() + 1];
        for a in 0..graph.n_allocs() {
            if let Some((first, last)) = self.alloc_span(graph, a) {
                let w = graph.alloc(a).weight();
                delta[first] += w;
                delta[last + 1] -= w;
            }
        }
        let mut live = AllocWeight::zero();
        delta[..self.order.len()]
            .iter()
            .map(|d| {
                live += *d;
                live
            })
            .collect()
    }
}

/// True if `order` is a permutation of the graph's ops respecting every
/// constraint and link.
pub fn is_valid_schedule(graph: &Graph, order: &[OpAddress]) -> bool {
    if order.len() != graph.n_ops() {
        return false;
    }
    let Ok(schedule) = Schedule::from_order(order.to_vec()) else {
        return false;
    };
    graph.ops().iter().all(|op| {
        let p = schedule.position(op.address());
        op.outs().iter().all(|&out| schedule.position(out) > p)
            && op
                .fwd_link()
                .map_or(true, |to| schedule.position(to) == p + 1)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weighted_diamond() -> Graph {
        let mut g = Graph::new();
        let a = g.insert_op(&[], "a").unwrap();
        let b = g.insert_op(&[a], "b").unwrap();
        let c = g.insert_op(&[a], "c").unwrap();
        let d = g.insert_op(&[b, c], "d").unwrap();
        let heavy = g.insert_alloc(AllocWeight::from_value(100.0));
        g.insert_op_alloc(&[a, d], heavy).unwrap();
        let left = g.insert_alloc(AllocWeight::from_value(1.0));
        g.insert_op_alloc(&[b], left).unwrap();
        let right = g.insert_alloc(AllocWeight::from_value(1.0));
        g.insert_op_alloc(&[c], right).unwrap();
        g
    }

    #[test]
    fn test_from_order_validates_permutation() {
        assert!(Schedule::from_order(vec![2, 0, 1]).is_ok());
        assert!(matches!(
            Schedule::from_order(vec![0, 0, 1]),
            Err(StructuralError::InvalidOrder { n_ops: 3, .. })
        ));
        assert_eq!(
            Schedule::from_order(vec![0, 3]),
            Err(StructuralError::OpOutOfRange { op: 3, n_ops: 2 })
        );
    }

    #[test]
    fn test_positions_invert_order() {
        let s = Schedule::from_order(vec![2, 0, 1]).unwrap();
        assert_eq!(s.positions(), &[1, 2, 0]);
        assert_eq!(s.op_at(0), 2);
        assert_eq!(s.position(1), 2);
    }

    #[test]
    fn test_liveness_of_weighted_diamond() {
        let g = weighted_diamond();
        let s = Schedule::from_order(vec![0, 1, 2, 3]).unwrap();
        // The heavy alloc is live over all four slots.
        assert_eq!(s.sum_liveness(&g), AllocWeight::from_value(402.0));
        assert_eq!(s.max_liveness(&g), AllocWeight::from_value(101.0));
        assert_eq!(
            s.liveness_profile(&g),
            vec![
                AllocWeight::from_value(100.0),
                AllocWeight::from_value(101.0),
                AllocWeight::from_value(101.0),
                AllocWeight::from_value(100.0),
            ]
        );
    }

    #[test]
    fn test_alloc_without_ops_costs_nothing() {
        let mut g = Graph::new();
        g.insert_ops(2);
        g.insert_alloc(AllocWeight::from_value(7.0));
        let s = Schedule::from_order(vec![1, 0]).unwrap();
        assert_eq!(s.sum_liveness(&g), AllocWeight::zero());
        assert_eq!(s.max_liveness(&g), AllocWeight::zero());
    }

    #[test]
    fn test_is_valid_schedule() {
        let mut g = weighted_diamond();
        assert!(is_valid_schedule(&g, &[0, 1, 2, 3]));
        assert!(is_valid_schedule(&g, &[0, 2, 1, 3]));
        assert!(!is_valid_schedule(&g, &[1, 0, 2, 3]));
        assert!(!is_valid_schedule(&g, &[0, 1, 2]));
        assert!(!is_valid_schedule(&g, &[0, 1, 1, 3]));

        g.insert_link(0, 2).unwrap();
        assert!(!is_valid_schedule(&g, &[0, 1, 2, 3]));
        assert!(is_valid_schedule(&g, &[0, 2, 1, 3]));
    }
}
