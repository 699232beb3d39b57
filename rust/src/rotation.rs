//! Local search over a valid schedule by moving contiguous windows of ops.
//!
//! A rotation takes the window `[start, start + n)` out of the schedule and
//! reinserts it elsewhere, which is a cyclic permutation of the slots
//! between the old and new position. Only rotations keeping every
//! constraint and link satisfied are considered, and only those strictly
//! lowering the sum liveness are applied, so the schedule never gets worse.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::time::Instant;

use crate::config::Termination;
use crate::error::StructuralError;
use crate::graph::{AllocAddress, Graph, OpAddress, ScheduleIndex};
use crate::schedule::Schedule;
use crate::weight::AllocWeight;
use crate::{log_changes, log_checks, log_debug};

/// Work done by [`RotationOptimizer::run`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RotationStats {
    /// Rotations applied.
    pub rotations: u64,
    /// Sweeps over the schedule.
    pub rounds: u64,
    /// True if the termination budget ran out before convergence.
    pub exhausted: bool,
}

pub struct RotationOptimizer<'a> {
    graph: &'a Graph,
    /// Ops whose windows are never moved.
    fixed: Vec<bool>,
    order: Vec<OpAddress>,
    positions: Vec<ScheduleIndex>,
    rng: StdRng,
    verbosity: u8,
}

impl<'a> RotationOptimizer<'a> {
    /// Start from `order`, which must be a valid schedule of `graph`. Windows
    /// containing an op flagged in `fixed` are never moved.
    pub fn new(
        graph: &'a Graph,
        order: Vec<OpAddress>,
        fixed: Vec<bool>,
        seed: u64,
        verbosity: u8,
    ) -> Result<Self, StructuralError> {
        if order.len() != graph.n_ops() {
            return Err(StructuralError::InvalidOrder {
                n_ops: graph.n_ops(),
                reason: format!("{} ops in the order", order.len()),
            });
        }
        let schedule = Schedule::from_order(order)?;
        let positions = schedule.positions().to_vec();
        let mut fixed = fixed;
        fixed.resize(graph.n_ops(), false);
        Ok(Self {
            graph,
            fixed,
            order: schedule.into_order(),
            positions,
            rng: StdRng::seed_from_u64(seed),
            verbosity,
        })
    }

    pub fn order(&self) -> &[OpAddress] {
        &self.order
    }

    pub fn into_order(self) -> Vec<OpAddress> {
        self.order
    }

    pub fn sum_liveness(&self) -> AllocWeight {
        (0..self.graph.n_allocs())
            .filter_map(|a| self.span(a, |op| self.positions[op]))
            .map(|(a, first, last)| self.graph.alloc(a).weight() * (last - first + 1))
            .sum()
    }

    /// Apply improving rotations until none is left or the budget runs out.
    ///
    /// Windows start at one op and keep their size while sweeps improve the
    /// schedule. The first sweep without an improvement drops the size back
    /// to one. With no improvement since that drop the size grows by one per
    /// sweep, until no window of that size has anywhere else to go. Link
    /// chains are only moved whole, so the size has to climb past the
    /// longest chain before they move at all.
    ///
    /// The budget is checked after each sweep, never inside one.
    pub fn run(&mut self, termination: &Termination) -> RotationStats {
        let mut stats = RotationStats::default();
        let n_ops = self.order.len();
        if termination.is_zero() || n_ops < 2 {
            return stats;
        }

        let started = Instant::now();
        let time_limit = termination.time_limit();
        let mut n = 1;
        let mut improved_since_reset = false;
        loop {
            stats.rounds += 1;
            log_checks!(self.verbosity, "Rotation round {} with window size {}", stats.rounds, n);
            let n_applied = self.sweep(n);
            stats.rotations += n_applied;
            if n_applied > 0 {
                log_changes!(
                    self.verbosity,
                    "  Applied {} rotations, sum liveness now {}",
                    n_applied,
                    self.sum_liveness()
                );
            }

            let out_of_time = time_limit.is_some_and(|limit| started.elapsed() >= limit);
            let out_of_rotations = termination
                .max_rotations
                .is_some_and(|max| stats.rotations >= max);
            if out_of_time || out_of_rotations {
                stats.exhausted = true;
                break;
            }

            if n_applied > 0 {
                improved_since_reset = true;
            } else if improved_since_reset {
                improved_since_reset = false;
                n = 1;
            } else {
                n += 1;
                if n > n_ops || !self.any_window_has_room(n) {
                    break;
                }
            }
        }
        stats
    }

    /// Visit every op once in random order and apply the best improving
    /// rotation of the window starting at it. Returns the number applied.
    fn sweep(&mut self, n: usize) -> u64 {
        let mut n_applied = 0;
        let mut visit: Vec<OpAddress> = (0..self.order.len()).collect();
        visit.shuffle(&mut self.rng);

        for op in visit {
            let start = self.positions[op];
            let Some(destinations) = self.legal_destinations(start, n) else {
                continue;
            };

            let mut best: Option<(ScheduleIndex, AllocWeight)> = None;
            for d in destinations {
                let cost = self.cost(start, n, d);
                let better = match best {
                    None => true,
                    Some((best_d, best_cost)) => {
                        cost < best_cost
                            || (cost == best_cost && d.abs_diff(start) < best_d.abs_diff(start))
                    }
                };
                if better {
                    best = Some((d, cost));
                }
            }
            if let Some((d, cost)) = best {
                if cost < AllocWeight::zero() {
                    log_debug!(
                        self.verbosity,
                        "    Moving {} ops from {} to {} ({})",
                        n,
                        start,
                        d,
                        cost
                    );
                    self.apply(start, n, d);
                    n_applied += 1;
                }
            }
        }
        n_applied
    }

    /// Whether some window of `n` ops could sit anywhere other than where it
    /// is, looking only at constraints.
    fn any_window_has_room(&self, n: usize) -> bool {
        (0..=self.order.len() - n)
            .any(|start| self.constraint_range(start, n).is_some_and(|(lo, hi)| lo < hi))
    }

    /// First and last slot the window `[start, start + n)` may occupy without
    /// breaking a constraint, as indices into the schedule with the window
    /// removed.
    fn constraint_range(
        &self,
        start: ScheduleIndex,
        n: usize,
    ) -> Option<(ScheduleIndex, ScheduleIndex)> {
        let n_ops = self.order.len();
        if n == 0 || start + n > n_ops {
            return None;
        }
        let mut lo = 0;
        let mut hi = n_ops - n;
        for &op in &self.order[start..start + n] {
            for &p in self.graph.op(op).ins() {
                let pos = self.positions[p];
                if pos < start {
                    lo = lo.max(pos + 1);
                }
            }
            for &c in self.graph.op(op).outs() {
                let pos = self.positions[c];
                if pos >= start + n {
                    hi = hi.min(pos - n);
                }
            }
        }
        (lo <= hi).then_some((lo, hi))
    }

    /// Where the window `[start, start + n)` can be reinserted, as indices
    /// into the schedule with the window removed. `None` if the window
    /// cannot move at all.
    fn legal_destinations(&self, start: ScheduleIndex, n: usize) -> Option<Vec<ScheduleIndex>> {
        let (lo, hi) = self.constraint_range(start, n)?;
        let window = &self.order[start..start + n];
        if self.graph.op(window[0]).has_bwd_link() || self.graph.op(window[n - 1]).has_fwd_link() {
            return None;
        }
        if window.iter().any(|&op| self.fixed[op]) {
            return None;
        }

        // The op before slot `d` of the remaining schedule.
        let remaining = |d: ScheduleIndex| {
            if d < start {
                self.order[d]
            } else {
                self.order[d + n]
            }
        };
        let destinations: Vec<ScheduleIndex> = (lo..=hi)
            .filter(|&d| d != start)
            .filter(|&d| d == 0 || !self.graph.op(remaining(d - 1)).has_fwd_link())
            .collect();
        (!destinations.is_empty()).then_some(destinations)
    }

    /// Change in sum liveness if the window `[start, start + n)` moves to
    /// `d`.
    fn cost(&self, start: ScheduleIndex, n: usize, d: ScheduleIndex) -> AllocWeight {
        let (lo, hi) = (start.min(d), start.max(d) + n);
        let mut allocs: Vec<AllocAddress> = self.order[lo..hi]
            .iter()
            .flat_map(|&op| self.graph.op(op).allocs().iter().copied())
            .collect();
        allocs.sort_unstable();
        allocs.dedup();

        let total = |position: &dyn Fn(OpAddress) -> ScheduleIndex| -> AllocWeight {
            allocs
                .iter()
                .filter_map(|&a| self.span(a, position))
                .map(|(a, first, last)| self.graph.alloc(a).weight() * (last - first + 1))
                .sum()
        };
        let before = total(&|op| self.positions[op]);
        let after = total(&|op| moved_position(self.positions[op], start, n, d));
        after - before
    }

    fn apply(&mut self, start: ScheduleIndex, n: usize, d: ScheduleIndex) {
        if d < start {
            self.order[d..start + n].rotate_right(n);
        } else {
            self.order[start..d + n].rotate_left(n);
        }
        let (lo, hi) = (start.min(d), start.max(d) + n);
        for i in lo..hi {
            self.positions[self.order[i]] = i;
        }
    }

    fn span(
        &self,
        alloc: AllocAddress,
        position: impl Fn(OpAddress) -> ScheduleIndex,
    ) -> Option<(AllocAddress, ScheduleIndex, ScheduleIndex)> {
        let ops = self.graph.alloc(alloc).ops();
        let first = ops.iter().map(|&op| position(op)).min()?;
        let last = ops.iter().map(|&op| position(op)).max()?;
        Some((alloc, first, last))
    }
}

/// Position of the op at `p` after moving the window `[start, start + n)`
/// to `d`.
fn moved_position(
    p: ScheduleIndex,
    start: ScheduleIndex,
    n: usize,
    d: ScheduleIndex,
) -> ScheduleIndex {
    if p >= start && p < start + n {
        d + (p - start)
    } else if d < start && p >= d && p < start {
        p + n
    } else if d > start && p >= start + n && p < d + n {
        p - n
    } else {
        p
    }
}
