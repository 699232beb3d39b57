//! Transitive closure of the constraint graph.
//!
//! For every op the closure stores, as a bitset, the set of ops which precede
//! it in every valid schedule and the set which follow it. `constrained(a, b)`
//! is then a single bit test. The closure is built once by Kahn propagation
//! and can be extended incrementally with [`TransitiveClosure::insert_edge`];
//! it becomes stale if constraints are removed and must then be rebuilt.

mod bitset;
pub mod components;
pub mod partitioned;

pub use components::ConnectedComponents;
pub use partitioned::PartitionedClosure;

use std::collections::VecDeque;

use bitset::{count_and, ones, BitMatrix, WORD_BITS};

use crate::error::{CycleError, ScheduleError, StructuralError};
use crate::graph::{Graph, OpAddress};

/// Whether an op is the first of a set of ops in every schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IsFirst {
    No,
    Maybe,
    Yes,
}

/// Whether an op is the last of a set of ops in every schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IsFinal {
    No,
    Maybe,
    Yes,
}

/// Bounds on the number of slots spanned by a set of ops: every schedule
/// spans at least `low` and fewer than `high` slots.
///
/// `high` is not tight. It counts every op which could sit between two
/// members of the set in isolation, without checking that all of them could
/// do so at once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DurationBound {
    pub low: usize,
    /// Exclusive.
    pub high: usize,
}

/// Bit-parallel transitive closure over dense op addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitiveClosure {
    n_ops: usize,
    /// Row `to` has bit `from` set when `from` precedes `to`.
    before: BitMatrix,
    /// Row `from` has bit `to` set when `to` follows `from`.
    after: BitMatrix,
}

impl TransitiveClosure {
    /// Build from forward edges: `edges[from]` lists the successors of
    /// `from`. Fails if an edge leaves `0..edges.len()` or the edges contain
    /// a cycle.
    pub fn new(edges: &[Vec<OpAddress>]) -> Result<Self, ScheduleError> {
        let n_ops = edges.len();
        let mut ins: Vec<Vec<OpAddress>> = vec![Vec::new(); n_ops];
        for (from, outs) in edges.iter().enumerate() {
            for &to in outs {
                if to >= n_ops {
                    return Err(StructuralError::OpOutOfRange { op: to, n_ops }.into());
                }
                ins[to].push(from);
            }
        }

        let order = topological_order(edges, &ins)?;

        let mut before = BitMatrix::new(n_ops, n_ops);
        for &b in &order {
            for &a in &ins[b] {
                before.or_row_into(b, a);
                before.set(b, a);
            }
        }

        let mut after = BitMatrix::new(n_ops, n_ops);
        for &a in order.iter().rev() {
            for &b in &edges[a] {
                after.or_row_into(a, b);
                after.set(a, b);
            }
        }

        Ok(Self {
            n_ops,
            before,
            after,
        })
    }

    /// Build from a graph's constraints.
    pub fn from_graph(graph: &Graph) -> Result<Self, ScheduleError> {
        Self::new(&graph.fwd_edges())
    }

    pub fn n_ops(&self) -> usize {
        self.n_ops
    }

    /// True if `from` precedes `to` in every schedule.
    #[inline]
    pub fn constrained(&self, from: OpAddress, to: OpAddress) -> bool {
        self.before.get(to, from)
    }

    /// True if neither op is forced before the other.
    pub fn unconstrained_in_both_directions(&self, a: OpAddress, b: OpAddress) -> bool {
        a != b && !self.constrained(a, b) && !self.constrained(b, a)
    }

    /// Every op with no forced order relative to `a`, ascending.
    pub fn unconstrained(&self, a: OpAddress) -> Vec<OpAddress> {
        (0..self.n_ops)
            .filter(|&x| self.unconstrained_in_both_directions(a, x))
            .collect()
    }

    pub fn n_unconstrained(&self, a: OpAddress) -> usize {
        self.n_ops - 1 - self.n_before(a) - self.n_after(a)
    }

    /// Ops which precede `a` in every schedule, ascending.
    pub fn before(&self, a: OpAddress) -> Vec<OpAddress> {
        ones(self.before.row(a)).collect()
    }

    /// Ops which follow `a` in every schedule, ascending.
    pub fn after(&self, a: OpAddress) -> Vec<OpAddress> {
        ones(self.after.row(a)).collect()
    }

    pub fn n_before(&self, a: OpAddress) -> usize {
        self.before.count(a)
    }

    pub fn n_after(&self, a: OpAddress) -> usize {
        self.after.count(a)
    }

    /// Earliest schedule index `a` can have.
    pub fn earliest(&self, a: OpAddress) -> usize {
        self.n_before(a)
    }

    /// Latest schedule index `a` can have.
    pub fn latest(&self, a: OpAddress) -> usize {
        self.n_ops - self.n_after(a) - 1
    }

    /// Number of ops which follow both `a` and `b`.
    pub fn n_post_post(&self, a: OpAddress, b: OpAddress) -> usize {
        count_and(self.after.row(a), self.after.row(b))
    }

    /// Number of ops which follow `a` and precede `b`.
    pub fn n_between(&self, a: OpAddress, b: OpAddress) -> usize {
        count_and(self.after.row(a), self.before.row(b))
    }

    /// Whether `op` is always, sometimes or never the first (and the last)
    /// of `subset`. `op` is expected to be a member of `subset`.
    pub fn extremum_status(&self, op: OpAddress, subset: &[OpAddress]) -> (IsFirst, IsFinal) {
        let mut first = IsFirst::Yes;
        let mut last = IsFinal::Yes;
        for &x in subset {
            if x == op {
                continue;
            }
            if self.constrained(x, op) {
                first = IsFirst::No;
            } else if !self.constrained(op, x) && first == IsFirst::Yes {
                first = IsFirst::Maybe;
            }
            if self.constrained(op, x) {
                last = IsFinal::No;
            } else if !self.constrained(x, op) && last == IsFinal::Yes {
                last = IsFinal::Maybe;
            }
        }
        (first, last)
    }

    /// [`TransitiveClosure::extremum_status`] of every member of `subset`.
    pub fn extremum_statuses(&self, subset: &[OpAddress]) -> Vec<(IsFirst, IsFinal)> {
        subset
            .iter()
            .map(|&op| self.extremum_status(op, subset))
            .collect()
    }

    /// Edges of `edges` implied by other edges: `(from, to)` is redundant if
    /// another predecessor of `to` already follows `from`.
    pub fn redundants(&self, edges: &[Vec<OpAddress>]) -> Vec<(OpAddress, OpAddress)> {
        let mut ins: Vec<Vec<OpAddress>> = vec![Vec::new(); edges.len()];
        for (from, outs) in edges.iter().enumerate() {
            for &to in outs {
                ins[to].push(from);
            }
        }
        let mut redundant = Vec::new();
        for (to, preds) in ins.iter().enumerate() {
            for &from in preds {
                if preds
                    .iter()
                    .any(|&other| other != from && self.constrained(from, other))
                {
                    redundant.push((from, to));
                }
            }
        }
        redundant.sort_unstable();
        redundant
    }

    /// Lower and upper bounds on the number of slots `subset` spans.
    pub fn duration_bound(&self, subset: &[OpAddress]) -> DurationBound {
        let mut ids = subset.to_vec();
        ids.sort_unstable();
        ids.dedup();
        if ids.is_empty() {
            return DurationBound { low: 0, high: 1 };
        }

        let n_words = self.n_ops.div_ceil(WORD_BITS);
        let mut after_some = vec![0u64; n_words];
        let mut before_some = vec![0u64; n_words];
        for &x in &ids {
            for (w, b) in after_some.iter_mut().zip(self.after.row(x)) {
                *w |= *b;
            }
            for (w, b) in before_some.iter_mut().zip(self.before.row(x)) {
                *w |= *b;
            }
        }

        let mut forced_inside = 0;
        let mut maybe_inside = 0;
        for y in 0..self.n_ops {
            if ids.binary_search(&y).is_ok() {
                continue;
            }
            let bit = |row: &[u64]| row[y / WORD_BITS] & (1u64 << (y % WORD_BITS)) != 0;
            if bit(after_some.as_slice()) && bit(before_some.as_slice()) {
                forced_inside += 1;
            }

            // y can be interior if some member can precede it and a
            // different member can follow it.
            let can_precede: Vec<OpAddress> = ids
                .iter()
                .copied()
                .filter(|&x| !self.constrained(y, x))
                .collect();
            let can_follow: Vec<OpAddress> = ids
                .iter()
                .copied()
                .filter(|&x| !self.constrained(x, y))
                .collect();
            let single_same =
                can_precede.len() == 1 && can_follow.len() == 1 && can_precede == can_follow;
            if !can_precede.is_empty() && !can_follow.is_empty() && !single_same {
                maybe_inside += 1;
            }
        }

        DurationBound {
            low: ids.len() + forced_inside,
            high: ids.len() + maybe_inside + 1,
        }
    }

    /// Add the constraint `from -> to`, updating every affected row.
    ///
    /// Returns `Ok(false)` if the constraint was already implied, and an
    /// error, leaving the closure unchanged, if it would close a cycle.
    pub fn insert_edge(&mut self, from: OpAddress, to: OpAddress) -> Result<bool, CycleError> {
        if from == to || self.constrained(to, from) {
            return Err(CycleError {
                ops: vec![from, to],
            });
        }
        if self.constrained(from, to) {
            return Ok(false);
        }

        // Everything up to and including `from` now precedes everything from
        // `to` onwards.
        let mut new_before = self.before.row(from).to_vec();
        new_before[from / WORD_BITS] |= 1u64 << (from % WORD_BITS);
        let mut new_after = self.after.row(to).to_vec();
        new_after[to / WORD_BITS] |= 1u64 << (to % WORD_BITS);

        let downstream: Vec<OpAddress> = ones(&new_after).collect();
        let upstream: Vec<OpAddress> = ones(&new_before).collect();
        for y in downstream {
            self.before.or_words_into(y, &new_before);
        }
        for x in upstream {
            self.after.or_words_into(x, &new_after);
        }
        Ok(true)
    }

    /// Insert every edge in `edges` (indexed by source).
    pub fn update(&mut self, edges: &[Vec<OpAddress>]) -> Result<(), CycleError> {
        for (from, outs) in edges.iter().enumerate() {
            for &to in outs {
                self.insert_edge(from, to)?;
            }
        }
        Ok(())
    }
}

/// Kahn's algorithm in address order. Reports the ops left unscheduled when
/// the edges contain a cycle.
fn topological_order(
    edges: &[Vec<OpAddress>],
    ins: &[Vec<OpAddress>],
) -> Result<Vec<OpAddress>, CycleError> {
    let n_ops = edges.len();
    let mut n_outstanding: Vec<usize> = ins.iter().map(Vec::len).collect();
    let mut queue: VecDeque<OpAddress> = (0..n_ops).filter(|&i| n_outstanding[i] == 0).collect();
    let mut order = Vec::with_capacity(n_ops);

    while let Some(op) = queue.pop_front() {
        order.push(op);
        for &out in &edges[op] {
            n_outstanding[out] -= 1;
            if n_outstanding[out] == 0 {
                queue.push_back(out);
            }
        }
    }

    if order.len() != n_ops {
        return Err(CycleError {
            ops: (0..n_ops).filter(|&i| n_outstanding[i] > 0).collect(),
        });
    }
    Ok(order)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// A random DAG: each forward pair (i, j), i < j, is an edge with
    /// probability `p`.
    pub(crate) fn random_dag(n: usize, p: f64, seed: u64) -> Vec<Vec<OpAddress>> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut edges = vec![Vec::new(); n];
        for (i, outs) in edges.iter_mut().enumerate() {
            for j in i + 1..n {
                if rng.random_bool(p) {
                    outs.push(j);
                }
            }
        }
        edges
    }

    /// Every topological order of a small graph.
    pub(crate) fn all_topological_orders(edges: &[Vec<OpAddress>]) -> Vec<Vec<OpAddress>> {
        fn recurse(
            edges: &[Vec<OpAddress>],
            n_in: &mut Vec<usize>,
            done: &mut Vec<bool>,
            current: &mut Vec<OpAddress>,
            all: &mut Vec<Vec<OpAddress>>,
        ) {
            if current.len() == edges.len() {
                all.push(current.clone());
                return;
            }
            for op in 0..edges.len() {
                if done[op] || n_in[op] != 0 {
                    continue;
                }
                done[op] = true;
                current.push(op);
                for &out in &edges[op] {
                    n_in[out] -= 1;
                }
                recurse(edges, n_in, done, current, all);
                for &out in &edges[op] {
                    n_in[out] += 1;
                }
                current.pop();
                done[op] = false;
            }
        }
        let mut n_in = vec![0; edges.len()];
        for outs in edges {
            for &to in outs {
                n_in[to] += 1;
            }
        }
        let mut all = Vec::new();
        recurse(
            edges,
            &mut n_in,
            &mut vec![false; edges.len()],
            &mut Vec::new(),
            &mut all,
        );
        all
    }

    fn diamond() -> Vec<Vec<OpAddress>> {
        vec![vec![1, 2], vec![3], vec![3], vec![]]
    }

    #[test]
    fn test_diamond_queries() {
        let tc = TransitiveClosure::new(&diamond()).unwrap();
        assert!(tc.constrained(0, 3));
        assert!(!tc.constrained(3, 0));
        assert!(!tc.constrained(1, 2));
        assert!(!tc.constrained(2, 1));
        assert!(tc.unconstrained_in_both_directions(1, 2));
        assert!(!tc.unconstrained_in_both_directions(1, 1));
        assert_eq!(tc.unconstrained(1), vec![2]);
        assert_eq!(tc.before(3), vec![0, 1, 2]);
        assert_eq!(tc.after(0), vec![1, 2, 3]);
        assert_eq!(tc.earliest(2), 1);
        assert_eq!(tc.latest(2), 2);
        assert_eq!(tc.n_unconstrained(0), 0);
        assert_eq!(tc.n_post_post(1, 2), 1);
        assert_eq!(tc.n_between(0, 3), 2);
    }

    #[test]
    fn test_cycle_is_an_error() {
        let edges = vec![vec![1], vec![2], vec![0], vec![0]];
        let err = TransitiveClosure::new(&edges).unwrap_err();
        assert_eq!(err, ScheduleError::Cycle(CycleError { ops: vec![0, 1, 2] }));
    }

    #[test]
    fn test_out_of_range_edge_is_an_error() {
        let err = TransitiveClosure::new(&[vec![5]]).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::Structural(StructuralError::OpOutOfRange { op: 5, n_ops: 1 })
        );
    }

    #[test]
    fn test_closure_matches_brute_force() {
        // Graphs of two to ten ops.
        for seed in 0..45 {
            let n = 2 + (seed as usize % 9);
            let p = if n > 8 { 0.4 } else { 0.3 };
            let edges = random_dag(n, p, seed);
            let tc = TransitiveClosure::new(&edges).unwrap();
            let positions: Vec<Vec<usize>> = all_topological_orders(&edges)
                .into_iter()
                .map(|order| {
                    let mut pos = vec![0; n];
                    for (i, op) in order.into_iter().enumerate() {
                        pos[op] = i;
                    }
                    pos
                })
                .collect();
            for a in 0..n {
                for b in 0..n {
                    if a == b {
                        continue;
                    }
                    let always = positions.iter().all(|pos| pos[a] < pos[b]);
                    assert_eq!(tc.constrained(a, b), always, "seed {seed}: {a} -> {b}");
                }
            }
        }
    }

    #[test]
    fn test_unconstrained_partitions_ops() {
        let edges = random_dag(10, 0.25, 17);
        let tc = TransitiveClosure::new(&edges).unwrap();
        for a in 0..10 {
            let mut counts = vec![0; 10];
            counts[a] += 1;
            for x in tc.unconstrained(a) {
                counts[x] += 1;
            }
            for x in (0..10).filter(|&x| tc.constrained(a, x)) {
                counts[x] += 1;
            }
            for x in (0..10).filter(|&x| tc.constrained(x, a)) {
                counts[x] += 1;
            }
            assert!(counts.iter().all(|&c| c == 1), "op {a}: {counts:?}");
        }
    }

    #[test]
    fn test_insert_edge_matches_rebuild() {
        for seed in 0..20 {
            let mut edges = random_dag(12, 0.15, 100 + seed);
            let mut tc = TransitiveClosure::new(&edges).unwrap();
            let mut rng = StdRng::seed_from_u64(seed);
            for _ in 0..6 {
                let a = rng.random_range(0..12);
                let b = rng.random_range(0..12);
                match tc.insert_edge(a, b) {
                    Ok(_) => {
                        if !edges[a].contains(&b) {
                            edges[a].push(b);
                        }
                    }
                    Err(_) => assert!(a == b || tc.constrained(b, a)),
                }
            }
            assert_eq!(tc, TransitiveClosure::new(&edges).unwrap());
        }
    }

    #[test]
    fn test_insert_edge_rejects_cycle() {
        let mut tc = TransitiveClosure::new(&diamond()).unwrap();
        assert!(tc.insert_edge(3, 0).is_err());
        assert!(!tc.insert_edge(0, 3).unwrap());
        assert!(tc.insert_edge(1, 2).unwrap());
        assert!(tc.constrained(0, 2));
        assert!(tc.constrained(1, 3));
        assert_eq!(tc.before(2), vec![0, 1]);
    }

    #[test]
    fn test_redundants() {
        // 0 -> 1 -> 2 and the shortcut 0 -> 2.
        let edges = vec![vec![1, 2], vec![2], vec![]];
        let tc = TransitiveClosure::new(&edges).unwrap();
        assert_eq!(tc.redundants(&edges), vec![(0, 2)]);
        assert!(tc.redundants(&diamond()).is_empty());
    }

    #[test]
    fn test_extremum_status() {
        let tc = TransitiveClosure::new(&diamond()).unwrap();
        assert_eq!(
            tc.extremum_status(0, &[0, 1, 2]),
            (IsFirst::Yes, IsFinal::No)
        );
        assert_eq!(tc.extremum_status(1, &[1, 2]), (IsFirst::Maybe, IsFinal::Maybe));
        assert_eq!(tc.extremum_status(3, &[0, 3]), (IsFirst::No, IsFinal::Yes));
        assert_eq!(tc.extremum_status(2, &[2]), (IsFirst::Yes, IsFinal::Yes));
        assert_eq!(tc.extremum_statuses(&[1, 3]).len(), 2);
    }

    #[test]
    fn test_duration_bound_diamond_with_tail() {
        //   0
        //  / \
        // 1   2
        // |   |
        // 3   |
        //  \ /
        //   4
        let edges = vec![vec![1, 2], vec![3], vec![4], vec![4], vec![]];
        let tc = TransitiveClosure::new(&edges).unwrap();
        let bound = |s: &[OpAddress]| {
            let b = tc.duration_bound(s);
            (b.low, b.high)
        };
        assert_eq!(bound(&[2, 4]), (2, 5));
        assert_eq!(bound(&[1, 2, 3]), (3, 4));
        assert_eq!(bound(&[0, 4]), (5, 6));
        assert_eq!(bound(&[3]), (1, 2));
        assert_eq!(bound(&[4]), (1, 2));
        assert_eq!(bound(&[]), (0, 1));
        assert_eq!(bound(&[0, 3]), (3, 5));
        assert_eq!(bound(&[2, 3]), (2, 4));
    }

    #[test]
    fn test_duration_bound_is_loose_with_independent_branch() {
        //    0
        //    |
        // +--+--+---+
        // 1  2  3   |      9
        // |  |  |   7      |
        // 4  5  6   |      10
        // +--+--+---+
        //       |
        //       8
        let edges = vec![
            vec![1, 2, 3, 7],
            vec![4],
            vec![5],
            vec![6],
            vec![8],
            vec![8],
            vec![8],
            vec![8],
            vec![],
            vec![10],
            vec![],
        ];
        let tc = TransitiveClosure::new(&edges).unwrap();
        let bound = |s: &[OpAddress]| {
            let b = tc.duration_bound(s);
            (b.low, b.high)
        };
        assert_eq!(bound(&[0, 8]), (9, 12));
        assert_eq!(bound(&[1, 3, 6, 7]), (4, 10));
        // The true maximum is 10 slots: 8 and 10 cannot both be interior.
        assert_eq!(bound(&[0, 5, 9]), (4, 12));
        assert_eq!(bound(&[10, 9, 8]), (3, 12));
        assert_eq!(bound(&[4, 1, 3, 6]), (4, 10));
        assert_eq!(bound(&[4, 1, 3, 6, 9, 10]), (6, 12));
    }

    #[test]
    fn test_duration_bound_without_edges() {
        let tc = TransitiveClosure::new(&vec![Vec::new(); 1000]).unwrap();
        let b = tc.duration_bound(&[1, 999, 500, 512, 513, 511]);
        assert_eq!((b.low, b.high), (6, 1001));
    }
}
