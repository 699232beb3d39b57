//! The individual tightening passes.
//!
//! Each pass reads the graph, its closure and the liveness bounds and
//! proposes links or constraints. Proposals are applied by the optimizer,
//! which drops any that contradict the closure.

use crate::closure::TransitiveClosure;
use crate::error::StructuralError;
use crate::graph::{Graph, OpAddress};
use crate::weight::AllocWeight;

use super::bounds::{contribution, LivenessBounds};

/// Link tight pairs `(a, b)` where scheduling `b` changes the live weight
/// by no more than scheduling `a` does at least.
pub(crate) fn link_tight_drops(
    graph: &Graph,
    bounds: &LivenessBounds,
) -> Vec<(OpAddress, OpAddress)> {
    graph
        .tight_pairs()
        .into_iter()
        .filter(|&(a, b)| {
            bounds.upper(b) <= bounds.lower(a)
                && !graph.op(a).has_fwd_link()
                && !graph.op(b).has_bwd_link()
        })
        .collect()
}

/// Link tight pairs `(a, b)` when no op unconstrained with `a` has a bound
/// range overlapping the pair's combined range.
pub(crate) fn link_close_tight_pairs(
    graph: &Graph,
    closure: &TransitiveClosure,
    bounds: &LivenessBounds,
) -> Vec<(OpAddress, OpAddress)> {
    let mut links = Vec::new();
    for (a, b) in graph.tight_pairs() {
        if graph.op(a).has_fwd_link() || graph.op(b).has_bwd_link() {
            continue;
        }
        let lo = bounds.lower(a).min(bounds.lower(b));
        let hi = bounds.upper(a).max(bounds.upper(b));
        let can_tie = closure
            .unconstrained(a)
            .into_iter()
            .any(|c| lo < bounds.upper(c) && bounds.lower(c) < hi);
        if !can_tie {
            links.push((a, b));
        }
    }
    links
}

/// For ops `a`, `b` with identical ins, where everything `a` and its
/// cheap successors can add is no more than anything `b` and its
/// successors not already after `a` can, schedule those successors of `a`
/// before `b`.
pub(crate) fn constrain_weight_separated_groups(
    graph: &Graph,
    closure: &TransitiveClosure,
    bounds: &LivenessBounds,
) -> Vec<(OpAddress, OpAddress)> {
    let mut constraints = Vec::new();
    let mut processed = vec![false; graph.n_ops()];
    for start in 0..graph.n_ops() {
        if processed[start] {
            continue;
        }
        let group = graph.identical_ins(start);
        for &op in &group {
            processed[op] = true;
        }
        if group.len() < 2 {
            continue;
        }

        for &a in &group {
            for &b in &group {
                if a == b || bounds.upper(a) > bounds.lower(b) {
                    continue;
                }

                let lb = reachable(graph, b, |x| !closure.constrained(a, x))
                    .into_iter()
                    .map(|x| bounds.lower(x))
                    .min()
                    .unwrap_or_else(|| bounds.lower(b));
                if bounds.upper(a) > lb {
                    continue;
                }

                let n_post_both = closure.n_post_post(a, b);
                let candidates = reachable(graph, a, |x| {
                    bounds.upper(x) <= lb && closure.n_post_post(b, x) == n_post_both
                });
                if a < b || candidates.iter().any(|&x| bounds.upper(x) < lb) {
                    constraints.extend(candidates.into_iter().map(|x| (x, b)));
                }
            }
        }
    }
    constraints
}

/// Order two parallel tight chains with identical ins and outs, rung by
/// rung, when the first is never worse than the second at any prefix.
pub(crate) fn constrain_parallel_chains(
    graph: &Graph,
    closure: &TransitiveClosure,
    bounds: &LivenessBounds,
) -> Vec<(OpAddress, OpAddress)> {
    let mut constraints = Vec::new();
    for a in 0..graph.n_ops() {
        let group = graph.identical_ins(a);
        if group.len() < 2 {
            continue;
        }
        let a_chain = graph.tight_chain_from(a);
        let a_end = graph.op(a_chain[a_chain.len() - 1]);
        for &b in &group {
            if b == a {
                continue;
            }
            let b_chain = graph.tight_chain_from(b);
            let b_end = graph.op(b_chain[b_chain.len() - 1]);
            if a_end.outs() != b_end.outs() || a_chain.len() < b_chain.len() {
                continue;
            }

            let mut running_upper = AllocWeight::zero();
            let mut running_lower = AllocWeight::zero();
            let mut ordered = true;
            for (&x, &y) in a_chain.iter().zip(&b_chain) {
                let mut upper_x = bounds.upper(x);
                let mut lower_y = bounds.lower(y);

                // An alloc both rungs use contributes to both sides equally.
                for &alloc in graph.op(y).allocs() {
                    if !graph.op(x).has_alloc(alloc) {
                        continue;
                    }
                    let alloc = graph.alloc(alloc);
                    if alloc.n_ops() < 2 {
                        continue;
                    }
                    let w = alloc.weight();
                    upper_x -= contribution(w, closure.extremum_status(x, alloc.ops())).1;
                    lower_y -= contribution(w, closure.extremum_status(y, alloc.ops())).0;
                }

                running_upper += upper_x;
                running_lower += lower_y;
                if !(running_upper < running_lower || (running_upper == running_lower && x < y)) {
                    ordered = false;
                    break;
                }
            }

            if ordered {
                constraints.extend(
                    a_chain
                        .iter()
                        .zip(&b_chain)
                        .filter(|&(&x, &y)| !graph.op(x).has_out(y))
                        .map(|(&x, &y)| (x, y)),
                );
            }
        }
    }
    constraints
}

/// Re-root constraints on link chains at the chain ends: constraints out of
/// a member other than the last leave from the last, constraints into a
/// member other than the first enter the first. Returns the number of
/// constraints moved.
pub(crate) fn slide_links(graph: &mut Graph) -> Result<usize, StructuralError> {
    let mut n_moved = 0;
    for chain in graph.link_chains() {
        let head = chain[0];
        let tail = chain[chain.len() - 1];
        for (i, &op) in chain.iter().enumerate() {
            if i + 1 != chain.len() {
                let outs: Vec<OpAddress> = graph
                    .op(op)
                    .outs()
                    .iter()
                    .copied()
                    .filter(|&out| graph.op(op).fwd_link() != Some(out) && !chain.contains(&out))
                    .collect();
                for out in outs {
                    graph.remove_constraint(op, out);
                    graph.insert_constraint(tail, out)?;
                    n_moved += 1;
                }
            }
            if i != 0 {
                let ins: Vec<OpAddress> = graph
                    .op(op)
                    .ins()
                    .iter()
                    .copied()
                    .filter(|&src| graph.op(op).bwd_link() != Some(src) && !chain.contains(&src))
                    .collect();
                for src in ins {
                    graph.remove_constraint(src, op);
                    graph.insert_constraint(src, head)?;
                    n_moved += 1;
                }
            }
        }
    }
    Ok(n_moved)
}

/// Depth-first search along constraints from `start`, visiting and
/// expanding only ops accepted by `keep`. Returns the accepted ops in visit
/// order.
fn reachable(graph: &Graph, start: OpAddress, keep: impl Fn(OpAddress) -> bool) -> Vec<OpAddress> {
    let mut found = Vec::new();
    let mut seen = vec![false; graph.n_ops()];
    let mut stack = vec![start];
    seen[start] = true;
    while let Some(x) = stack.pop() {
        if !keep(x) {
            continue;
        }
        found.push(x);
        for &out in graph.op(x).outs() {
            if !seen[out] {
                seen[out] = true;
                stack.push(out);
            }
        }
    }
    found
}
