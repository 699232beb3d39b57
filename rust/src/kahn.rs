//! Initial schedule construction with Kahn's algorithm.
//!
//! Ops become ready once all their ins are scheduled. Among ready ops, those
//! with the highest priority are preferred, and the remaining choice is made
//! by the [`TieBreaker`]. Links are not handled here: callers schedule the
//! link-compressed graph and expand the result.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::cmp::Ordering;

use crate::config::TieBreaker;
use crate::error::CycleError;
use crate::graph::{Graph, OpAddress};
use crate::weight::AllocWeight;

/// The ready ops, in the order they became ready.
struct ReadySet {
    tie_breaker: TieBreaker,
    ready: Vec<OpAddress>,
    rng: StdRng,
    /// Set when ops were added since the last shuffle.
    stale: bool,
}

impl ReadySet {
    fn new(tie_breaker: TieBreaker, seed: u64) -> Self {
        Self {
            tie_breaker,
            ready: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            stale: false,
        }
    }

    fn push(&mut self, op: OpAddress) {
        self.ready.push(op);
        self.stale = true;
    }

    fn pop(&mut self, graph: &Graph, liveness: &LivenessTracker) -> Option<OpAddress> {
        if self.ready.is_empty() {
            return None;
        }
        if self.tie_breaker == TieBreaker::Random && self.stale {
            self.ready.shuffle(&mut self.rng);
            self.stale = false;
        }

        let top = self
            .ready
            .iter()
            .map(|&op| graph.op(op).priority())
            .max_by(f64::total_cmp)?;
        let mut candidates = self
            .ready
            .iter()
            .enumerate()
            .filter(|(_, &op)| graph.op(op).priority().total_cmp(&top) == Ordering::Equal)
            .map(|(i, _)| i);

        let index = match self.tie_breaker {
            TieBreaker::Fifo => candidates.next(),
            TieBreaker::Filo | TieBreaker::Random => candidates.last(),
            TieBreaker::Greedy => {
                let mut best: Option<(usize, AllocWeight)> = None;
                for i in candidates {
                    let delta = liveness.delta(graph, self.ready[i]);
                    if best.map_or(true, |(_, d)| delta < d) {
                        best = Some((i, delta));
                    }
                }
                best.map(|(i, _)| i)
            }
        }?;
        Some(self.ready.remove(index))
    }
}

/// Which allocs are live and how many of their ops are still unscheduled.
struct LivenessTracker {
    live: Vec<bool>,
    n_outstanding: Vec<usize>,
}

impl LivenessTracker {
    fn new(graph: &Graph) -> Self {
        Self {
            live: vec![false; graph.n_allocs()],
            n_outstanding: graph.allocs().iter().map(|a| a.n_ops()).collect(),
        }
    }

    /// Change in live weight if `op` were scheduled next.
    fn delta(&self, graph: &Graph, op: OpAddress) -> AllocWeight {
        let mut delta = AllocWeight::zero();
        for &a in graph.op(op).allocs() {
            let w = graph.alloc(a).weight();
            if !self.live[a] {
                delta += w;
            }
            if self.n_outstanding[a] == 1 {
                delta -= w;
            }
        }
        delta
    }

    fn schedule(&mut self, graph: &Graph, op: OpAddress) {
        for &a in graph.op(op).allocs() {
            self.live[a] = true;
            self.n_outstanding[a] -= 1;
        }
    }
}

/// Schedule every op of `graph` respecting its constraints. Links are
/// ignored. Fails with the unscheduled ops if the constraints contain a
/// cycle.
pub fn kahn_schedule(
    graph: &Graph,
    tie_breaker: TieBreaker,
    seed: u64,
) -> Result<Vec<OpAddress>, CycleError> {
    let n_ops = graph.n_ops();
    let mut n_outstanding: Vec<usize> = graph.ops().iter().map(|op| op.n_ins()).collect();
    let mut ready = ReadySet::new(tie_breaker, seed);
    let mut liveness = LivenessTracker::new(graph);

    for op in 0..n_ops {
        if n_outstanding[op] == 0 {
            ready.push(op);
        }
    }

    let mut order = Vec::with_capacity(n_ops);
    while let Some(op) = ready.pop(graph, &liveness) {
        order.push(op);
        liveness.schedule(graph, op);
        for &out in graph.op(op).outs() {
            n_outstanding[out] -= 1;
            if n_outstanding[out] == 0 {
                ready.push(out);
            }
        }
    }

    if order.len() != n_ops {
        return Err(CycleError {
            ops: (0..n_ops).filter(|&op| n_outstanding[op] > 0).collect(),
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::is_valid_schedule;
    use rustc_hash::FxHashSet;

    const ALL: [TieBreaker; 4] = [
        TieBreaker::Random,
        TieBreaker::Fifo,
        TieBreaker::Filo,
        TieBreaker::Greedy,
    ];

    fn independent(n: usize) -> Graph {
        let mut g = Graph::new();
        g.insert_ops(n);
        g
    }

    #[test]
    fn test_fifo_and_filo() {
        let g = independent(3);
        assert_eq!(kahn_schedule(&g, TieBreaker::Fifo, 0).unwrap(), vec![0, 1, 2]);
        assert_eq!(kahn_schedule(&g, TieBreaker::Filo, 0).unwrap(), vec![2, 1, 0]);
    }

    #[test]
    fn test_filo_follows_newest_ready() {
        // 0 -> 2, with 1 independent: after 0, op 2 is the newest ready op.
        let mut g = independent(3);
        g.insert_constraint(0, 2).unwrap();
        g.set_priority(0, 1.0).unwrap();
        assert_eq!(kahn_schedule(&g, TieBreaker::Filo, 0).unwrap(), vec![0, 2, 1]);
        assert_eq!(kahn_schedule(&g, TieBreaker::Fifo, 0).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_priority_first_for_every_policy() {
        let mut g = independent(4);
        g.set_priority(2, 5.0).unwrap();
        for tb in ALL {
            assert_eq!(kahn_schedule(&g, tb, 3).unwrap()[0], 2, "{tb}");
        }
    }

    #[test]
    fn test_random_is_seeded() {
        let g = independent(6);
        let a = kahn_schedule(&g, TieBreaker::Random, 7).unwrap();
        let b = kahn_schedule(&g, TieBreaker::Random, 7).unwrap();
        assert_eq!(a, b);

        let distinct: FxHashSet<Vec<OpAddress>> = (0..20)
            .map(|seed| kahn_schedule(&g, TieBreaker::Random, seed).unwrap())
            .collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn test_greedy_prefers_freeing_memory() {
        // r -> {0, 1}, 0 -> 2. Scheduling 1 frees the alloc it shares with
        // r, scheduling 0 makes a heavy alloc live.
        let mut g = Graph::new();
        let r = g.insert_op(&[], "r").unwrap();
        let a = g.insert_op(&[r], "a").unwrap();
        let b = g.insert_op(&[r], "b").unwrap();
        let c = g.insert_op(&[a], "c").unwrap();
        let heavy = g.insert_alloc(AllocWeight::from_value(10.0));
        g.insert_op_alloc(&[a, c], heavy).unwrap();
        let shared = g.insert_alloc(AllocWeight::from_value(5.0));
        g.insert_op_alloc(&[r, b], shared).unwrap();

        assert_eq!(kahn_schedule(&g, TieBreaker::Greedy, 0).unwrap(), vec![r, b, a, c]);
        assert_eq!(kahn_schedule(&g, TieBreaker::Fifo, 0).unwrap(), vec![r, a, b, c]);
    }

    #[test]
    fn test_every_policy_is_valid() {
        let edges = crate::closure::tests::random_dag(25, 0.1, 5);
        let mut g = independent(25);
        for (from, outs) in edges.iter().enumerate() {
            for &to in outs {
                g.insert_constraint(from, to).unwrap();
            }
        }
        for tb in ALL {
            let order = kahn_schedule(&g, tb, 11).unwrap();
            assert!(is_valid_schedule(&g, &order), "{tb}");
        }
    }

    #[test]
    fn test_cycle_is_an_error() {
        let mut g = independent(4);
        g.insert_constraint(0, 1).unwrap();
        g.insert_constraint(1, 2).unwrap();
        g.insert_constraint(2, 0).unwrap();
        for tb in ALL {
            assert_eq!(
                kahn_schedule(&g, tb, 0),
                Err(CycleError { ops: vec![0, 1, 2] })
            );
        }
    }
}
