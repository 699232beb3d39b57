//! Alloc simplification.
//!
//! Each rewrite changes a graph's allocs so that the sum liveness of every
//! schedule moves by the same amount. Schedules therefore rank the same
//! before and after, and the later stages see fewer, larger allocs.
//! Constraints and links are never touched, so the closure built at the
//! start stays valid throughout.
//!
//! Allocs are never removed from the arena. A rewrite that drops an alloc
//! detaches it from its ops, which leaves it costing nothing.

use std::fmt;

use crate::closure::{IsFinal, IsFirst, TransitiveClosure};
use crate::config::Optimizations;
use crate::error::ScheduleError;
use crate::graph::{Alloc, AllocAddress, Graph};
use crate::{log_changes, log_checks};

/// One alloc rewrite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Simplification {
    CombineAllocsWithCommonOps,
    DisconnectAllocsWithOneOp,
    DisconnectAllocsWithZeroWeight,
    DisconnectInbetweenerAllocs,
    DisconnectFixedDurationAllocs,
    ConnectContiguousAllocs,
}

impl Simplification {
    fn needs_closure(self) -> bool {
        matches!(
            self,
            Simplification::DisconnectInbetweenerAllocs
                | Simplification::DisconnectFixedDurationAllocs
                | Simplification::ConnectContiguousAllocs
        )
    }
}

impl fmt::Display for Simplification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Simplification::CombineAllocsWithCommonOps => "combine_allocs_with_common_ops",
            Simplification::DisconnectAllocsWithOneOp => "disconnect_allocs_with_one_op",
            Simplification::DisconnectAllocsWithZeroWeight => "disconnect_allocs_with_zero_weight",
            Simplification::DisconnectInbetweenerAllocs => "disconnect_inbetweener_allocs",
            Simplification::DisconnectFixedDurationAllocs => "disconnect_fixed_duration_allocs",
            Simplification::ConnectContiguousAllocs => "connect_contiguous_allocs",
        };
        write!(f, "{}", s)
    }
}

/// What a call to [`simplify`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimplifySummary {
    pub rounds: usize,
    /// Allocs or alloc memberships removed, summed over every rewrite.
    pub changes: usize,
}

/// Apply the enabled rewrites of `opts` to `graph` until none of them
/// changes anything, or `opts.max_iterations` rounds have run.
///
/// Fails with [`CycleError`](crate::error::CycleError) if a rewrite needs
/// the closure and the graph's constraints contain a cycle.
pub fn simplify(
    graph: &mut Graph,
    opts: &Optimizations,
    verbosity: u8,
) -> Result<SimplifySummary, ScheduleError> {
    let enabled = opts.simplifications();
    let mut summary = SimplifySummary::default();
    if enabled.is_empty() {
        return Ok(summary);
    }

    let closure = if enabled.iter().any(|s| s.needs_closure()) {
        Some(TransitiveClosure::from_graph(graph)?)
    } else {
        None
    };

    for round in 0..opts.max_iterations {
        summary.rounds += 1;
        log_checks!(verbosity, "Simplification round {}", round);
        let mut n_round = 0;
        for &rewrite in &enabled {
            let n = match rewrite {
                Simplification::CombineAllocsWithCommonOps => {
                    combine_allocs_with_common_ops(graph)
                }
                Simplification::DisconnectAllocsWithOneOp => disconnect_allocs_with_one_op(graph),
                Simplification::DisconnectAllocsWithZeroWeight => {
                    disconnect_allocs_with_zero_weight(graph)
                }
                Simplification::DisconnectInbetweenerAllocs => closure
                    .as_ref()
                    .map_or(0, |tc| disconnect_inbetweener_allocs(graph, tc)),
                Simplification::DisconnectFixedDurationAllocs => closure
                    .as_ref()
                    .map_or(0, |tc| disconnect_fixed_duration_allocs(graph, tc)),
                Simplification::ConnectContiguousAllocs => closure
                    .as_ref()
                    .map_or(0, |tc| connect_contiguous_allocs(graph, tc)),
            };
            if n > 0 {
                log_changes!(verbosity, "  {}: {} changes", rewrite, n);
            }
            n_round += n;
        }
        summary.changes += n_round;
        if n_round == 0 {
            break;
        }
    }

    log_changes!(
        verbosity,
        "Simplification finished after {} rounds with {} changes",
        summary.rounds,
        summary.changes
    );
    Ok(summary)
}

/// Merge allocs used by exactly the same ops into the lowest-addressed one,
/// which takes the sum of their weights. Returns the number of allocs
/// merged away.
pub(crate) fn combine_allocs_with_common_ops(graph: &mut Graph) -> usize {
    let mut groups: Vec<Vec<AllocAddress>> = vec![Vec::new(); graph.n_allocs()];
    for alloc in graph.allocs() {
        // Any alloc with the same ops shares the first of them.
        let ops = alloc.ops();
        let representative = ops
            .first()
            .and_then(|&op| {
                graph
                    .op(op)
                    .allocs()
                    .iter()
                    .copied()
                    .find(|&other| other < alloc.address() && graph.alloc(other).ops() == ops)
            })
            .unwrap_or(alloc.address());
        groups[representative].push(alloc.address());
    }

    let mut n_merged = 0;
    for group in groups.into_iter().filter(|g| g.len() > 1) {
        let combined = group.iter().map(|&a| graph.alloc(a).weight()).sum();
        for &alloc in &group[1..] {
            graph.disconnect_alloc(alloc);
            n_merged += 1;
        }
        graph.set_weight(group[0], combined);
    }
    n_merged
}

/// An alloc used by a single op is live for one slot in every schedule.
pub(crate) fn disconnect_allocs_with_one_op(graph: &mut Graph) -> usize {
    disconnect_where(graph, |alloc| alloc.n_ops() == 1)
}

pub(crate) fn disconnect_allocs_with_zero_weight(graph: &mut Graph) -> usize {
    disconnect_where(graph, |alloc| alloc.n_ops() > 0 && alloc.weight().is_zero())
}

/// Detach every op which can never be the first or the last user of its
/// alloc. Returns the number of memberships removed.
///
/// All such ops of one alloc go at once: following constraints backwards
/// from any of them ends at a member which may be first, and that member
/// stays.
pub(crate) fn disconnect_inbetweener_allocs(
    graph: &mut Graph,
    closure: &TransitiveClosure,
) -> usize {
    let mut n_removed = 0;
    for alloc in 0..graph.n_allocs() {
        let ops = graph.alloc(alloc).ops().to_vec();
        let statuses = closure.extremum_statuses(&ops);
        for (op, status) in ops.into_iter().zip(statuses) {
            if status == (IsFirst::No, IsFinal::No) && graph.disconnect_op_alloc(op, alloc) {
                n_removed += 1;
            }
        }
    }
    n_removed
}

/// An alloc whose ops span the same number of slots in every schedule adds
/// the same liveness to all of them.
pub(crate) fn disconnect_fixed_duration_allocs(
    graph: &mut Graph,
    closure: &TransitiveClosure,
) -> usize {
    disconnect_where(graph, |alloc| {
        if alloc.n_ops() == 0 {
            return false;
        }
        let bound = closure.duration_bound(alloc.ops());
        bound.high == bound.low + 1
    })
}

/// Where an op is surely the last user of one alloc and surely the first
/// user of another of the same weight, the two are live back to back, and
/// one alloc over the union of their ops costs the same plus a constant.
/// Returns the number of allocs merged away.
pub(crate) fn connect_contiguous_allocs(graph: &mut Graph, closure: &TransitiveClosure) -> usize {
    let mut n_merged = 0;
    for op in 0..graph.n_ops() {
        let mut starting = Vec::new();
        let mut ending = Vec::new();
        for &alloc in graph.op(op).allocs() {
            let (first, last) = closure.extremum_status(op, graph.alloc(alloc).ops());
            if first == IsFirst::Yes {
                starting.push(alloc);
            }
            if last == IsFinal::Yes {
                ending.push(alloc);
            }
        }

        let mut pairs: Vec<(AllocAddress, AllocAddress)> = Vec::new();
        for &a in &starting {
            for &b in &ending {
                let paired = |x: AllocAddress| pairs.iter().any(|&(p, q)| p == x || q == x);
                let same_weight = (graph.alloc(a).weight() - graph.alloc(b).weight()).is_zero();
                if same_weight && !paired(a) && !paired(b) {
                    pairs.push((a, b));
                }
            }
        }

        for (kept, absorbed) in pairs {
            if kept != absorbed {
                for other in graph.alloc(absorbed).ops().to_vec() {
                    graph.connect_op_alloc(other, kept);
                }
            }
            graph.disconnect_alloc(absorbed);
            n_merged += 1;
        }
    }
    n_merged
}

fn disconnect_where(graph: &mut Graph, pred: impl Fn(&Alloc) -> bool) -> usize {
    let doomed: Vec<AllocAddress> = graph
        .allocs()
        .iter()
        .filter(|alloc| pred(alloc))
        .map(Alloc::address)
        .collect();
    for &alloc in &doomed {
        graph.disconnect_alloc(alloc);
    }
    doomed.len()
}
