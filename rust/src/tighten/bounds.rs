//! Per-op bounds on the change in live weight caused by scheduling an op.

use crate::closure::{IsFinal, IsFirst, TransitiveClosure};
use crate::graph::{Graph, OpAddress};
use crate::weight::AllocWeight;

/// For every op, the smallest and largest change in total live weight its
/// scheduling can cause, over every valid schedule.
///
/// Scheduling the first user of an alloc makes its weight live and
/// scheduling the final user frees it. An alloc with a single user never
/// changes the live weight at a slot boundary, so it contributes nothing.
#[derive(Clone, Debug, PartialEq)]
pub struct LivenessBounds {
    lower: Vec<AllocWeight>,
    upper: Vec<AllocWeight>,
}

impl LivenessBounds {
    pub fn new(graph: &Graph, closure: &TransitiveClosure) -> Self {
        let mut lower = vec![AllocWeight::zero(); graph.n_ops()];
        let mut upper = vec![AllocWeight::zero(); graph.n_ops()];
        for alloc in graph.allocs() {
            if alloc.n_ops() < 2 {
                continue;
            }
            let statuses = closure.extremum_statuses(alloc.ops());
            for (&op, &status) in alloc.ops().iter().zip(&statuses) {
                let (lo, hi) = contribution(alloc.weight(), status);
                lower[op] += lo;
                upper[op] += hi;
            }
        }
        Self { lower, upper }
    }

    #[inline]
    pub fn lower(&self, op: OpAddress) -> AllocWeight {
        self.lower[op]
    }

    #[inline]
    pub fn upper(&self, op: OpAddress) -> AllocWeight {
        self.upper[op]
    }

    pub fn n_ops(&self) -> usize {
        self.lower.len()
    }
}

/// Range of the change in live weight an alloc of weight `w` contributes
/// when an op with the given extremum status is scheduled.
pub(crate) fn contribution(
    w: AllocWeight,
    status: (IsFirst, IsFinal),
) -> (AllocWeight, AllocWeight) {
    let zero = AllocWeight::zero();
    let (first_lo, first_hi) = match status.0 {
        IsFirst::Yes => (w, w),
        IsFirst::Maybe => (w.min(zero), w.max(zero)),
        IsFirst::No => (zero, zero),
    };
    let (final_lo, final_hi) = match status.1 {
        IsFinal::Yes => (-w, -w),
        IsFinal::Maybe => ((-w).min(zero), (-w).max(zero)),
        IsFinal::No => (zero, zero),
    };
    (first_lo + final_lo, first_hi + final_hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(v: f64) -> AllocWeight {
        AllocWeight::from_value(v)
    }

    #[test]
    fn test_contribution() {
        assert_eq!(contribution(w(3.0), (IsFirst::Yes, IsFinal::No)), (w(3.0), w(3.0)));
        assert_eq!(contribution(w(3.0), (IsFirst::No, IsFinal::Yes)), (w(-3.0), w(-3.0)));
        assert_eq!(contribution(w(3.0), (IsFirst::Maybe, IsFinal::Maybe)), (w(-3.0), w(3.0)));
        assert_eq!(
            contribution(w(3.0), (IsFirst::No, IsFinal::No)),
            (AllocWeight::zero(), AllocWeight::zero())
        );
    }

    #[test]
    fn test_bounds_of_chain_and_fork() {
        // 0 -> 1 -> 2 share an alloc; 3 and 4 are independent and share one.
        let mut g = Graph::new();
        g.insert_ops(5);
        g.insert_constraint(0, 1).unwrap();
        g.insert_constraint(1, 2).unwrap();
        let chain = g.insert_alloc(w(2.0));
        g.insert_op_alloc(&[0, 1, 2], chain).unwrap();
        let pair = g.insert_alloc(w(5.0));
        g.insert_op_alloc(&[3, 4], pair).unwrap();
        let single = g.insert_alloc(w(100.0));
        g.insert_op_alloc(&[1], single).unwrap();

        let closure = TransitiveClosure::from_graph(&g).unwrap();
        let b = LivenessBounds::new(&g, &closure);
        assert_eq!(b.n_ops(), 5);
        assert_eq!((b.lower(0), b.upper(0)), (w(2.0), w(2.0)));
        assert_eq!((b.lower(1), b.upper(1)), (AllocWeight::zero(), AllocWeight::zero()));
        assert_eq!((b.lower(2), b.upper(2)), (w(-2.0), w(-2.0)));
        assert_eq!((b.lower(3), b.upper(3)), (w(-5.0), w(5.0)));
        assert_eq!((b.lower(4), b.upper(4)), (w(-5.0), w(5.0)));
    }
}
