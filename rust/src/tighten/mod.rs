//! Graph tightening.
//!
//! Passes insert links and constraints which keep at least one schedule of
//! minimal liveness reachable while cutting down the schedules the
//! initial scheduler and the rotation optimizer can wander into. The
//! optimizer runs the enabled passes in rounds until none of them changes
//! the graph.

mod bounds;
mod passes;

pub use bounds::LivenessBounds;

use std::fmt;

use crate::closure::TransitiveClosure;
use crate::config::Optimizations;
use crate::error::ScheduleError;
use crate::graph::{Graph, OpAddress};
use crate::{log_changes, log_checks, log_debug};

/// One tightening pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TighteningPass {
    SlideLinks,
    LinkTightDrops,
    LinkCloseTightPairs,
    ConstrainWeightSeparatedGroups,
    ConstrainParallelChains,
}

impl fmt::Display for TighteningPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TighteningPass::SlideLinks => "slide_links",
            TighteningPass::LinkTightDrops => "link_tight_drops",
            TighteningPass::LinkCloseTightPairs => "link_close_tight_pairs",
            TighteningPass::ConstrainWeightSeparatedGroups => "constrain_weight_separated_groups",
            TighteningPass::ConstrainParallelChains => "constrain_parallel_chains",
        };
        write!(f, "{}", s)
    }
}

/// What a call to [`tighten`] did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TighteningSummary {
    pub rounds: usize,
    pub constraints_inserted: usize,
    pub links_inserted: usize,
    pub constraints_moved: usize,
    pub redundants_removed: usize,
}

/// Apply the enabled passes of `opts` to `graph` until none of them changes
/// anything, or `opts.max_iterations` rounds have run.
///
/// Fails with [`CycleError`](crate::error::CycleError) if the graph's
/// constraints contain a cycle.
pub fn tighten(
    graph: &mut Graph,
    opts: &Optimizations,
    verbosity: u8,
) -> Result<TighteningSummary, ScheduleError> {
    let all = opts.enabled();
    let mut summary = TighteningSummary::default();
    if all.is_empty() {
        return Ok(summary);
    }

    let mut to_run = all.clone();
    let mut closure: Option<TransitiveClosure> = None;
    let mut snapshot: Vec<Vec<OpAddress>> = Vec::new();

    for round in 0..opts.max_iterations {
        summary.rounds += 1;
        log_checks!(
            verbosity,
            "Tightening round {}: {}",
            round,
            to_run
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut changed = Vec::new();
        if to_run.contains(&TighteningPass::SlideLinks) {
            let n = passes::slide_links(graph)?;
            if n > 0 {
                log_changes!(verbosity, "  slide_links: moved {} constraints", n);
                summary.constraints_moved += n;
                changed.push(TighteningPass::SlideLinks);
            }
        }

        let mut tc = match closure.take() {
            None => {
                log_changes!(verbosity, "  Building closure of {} ops", graph.n_ops());
                TransitiveClosure::from_graph(graph)?
            }
            Some(mut tc) => {
                let diff = graph.constraint_diff(&snapshot);
                let n_new: usize = diff.iter().map(Vec::len).sum();
                if n_new < graph.n_ops() / 10 {
                    log_debug!(verbosity, "  Updating closure with {} constraints", n_new);
                    tc.update(&diff)?;
                    tc
                } else {
                    log_changes!(
                        verbosity,
                        "  Rebuilding closure after {} new constraints",
                        n_new
                    );
                    TransitiveClosure::from_graph(graph)?
                }
            }
        };

        for (from, to) in tc.redundants(&graph.fwd_edges()) {
            if graph.remove_constraint(from, to) {
                summary.redundants_removed += 1;
            }
        }
        snapshot = graph.fwd_edges();
        let bounds = LivenessBounds::new(graph, &tc);

        for &pass in &to_run {
            let (n_constraints, n_links) = match pass {
                TighteningPass::SlideLinks => continue,
                TighteningPass::LinkTightDrops => {
                    let proposed = passes::link_tight_drops(graph, &bounds);
                    (0, insert_links(graph, &mut tc, &proposed, verbosity)?)
                }
                TighteningPass::LinkCloseTightPairs => {
                    let proposed = passes::link_close_tight_pairs(graph, &tc, &bounds);
                    (0, insert_links(graph, &mut tc, &proposed, verbosity)?)
                }
                TighteningPass::ConstrainWeightSeparatedGroups => {
                    let proposed = passes::constrain_weight_separated_groups(graph, &tc, &bounds);
                    (insert_constraints(graph, &mut tc, &proposed, verbosity)?, 0)
                }
                TighteningPass::ConstrainParallelChains => {
                    let proposed = passes::constrain_parallel_chains(graph, &tc, &bounds);
                    (insert_constraints(graph, &mut tc, &proposed, verbosity)?, 0)
                }
            };
            if n_constraints + n_links > 0 {
                log_changes!(
                    verbosity,
                    "  {}: inserted {} constraints and {} links",
                    pass,
                    n_constraints,
                    n_links
                );
                summary.constraints_inserted += n_constraints;
                summary.links_inserted += n_links;
                changed.push(pass);
            }
        }
        closure = Some(tc);

        let ran_all = to_run.len() == all.len();
        to_run = match changed.len() {
            0 if ran_all => break,
            0 | 1 => all.clone(),
            _ => changed,
        };
    }

    log_changes!(
        verbosity,
        "Tightening finished after {} rounds: {} constraints, {} links inserted",
        summary.rounds,
        summary.constraints_inserted,
        summary.links_inserted
    );
    Ok(summary)
}

/// Insert proposed constraints which add ordering information. Proposals
/// already implied or contradicting the closure are skipped.
///
/// A constraint touching a link chain is attached to the chain's ends, so
/// that no op is ever forced between two linked ops.
fn insert_constraints(
    graph: &mut Graph,
    closure: &mut TransitiveClosure,
    proposed: &[(OpAddress, OpAddress)],
    verbosity: u8,
) -> Result<usize, ScheduleError> {
    let mut n_inserted = 0;
    for &(from, to) in proposed {
        if graph.link_chain_head(from) == graph.link_chain_head(to) {
            continue;
        }
        let from = graph.link_chain_tail(from);
        let to = graph.link_chain_head(to);
        match closure.insert_edge(from, to) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => {
                log_debug!(verbosity, "    Skipping {} -> {}: would close a cycle", from, to);
                continue;
            }
        }
        graph.insert_constraint(from, to)?;
        log_debug!(verbosity, "    Constraint {} -> {}", from, to);
        n_inserted += 1;
    }
    Ok(n_inserted)
}

/// Insert proposed links whose ends are still free and which nothing is
/// forced to sit between.
fn insert_links(
    graph: &mut Graph,
    closure: &mut TransitiveClosure,
    proposed: &[(OpAddress, OpAddress)],
    verbosity: u8,
) -> Result<usize, ScheduleError> {
    let mut n_inserted = 0;
    for &(from, to) in proposed {
        if graph.op(from).has_fwd_link() || graph.op(to).has_bwd_link() {
            continue;
        }
        if closure.constrained(to, from) || closure.n_between(from, to) > 0 {
            log_debug!(verbosity, "    Skipping link {} => {}", from, to);
            continue;
        }
        if graph.insert_link(from, to)? {
            closure.insert_edge(from, to)?;
            log_debug!(verbosity, "    Link {} => {}", from, to);
            n_inserted += 1;
        }
    }
    Ok(n_inserted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::closure::tests::{all_topological_orders, random_dag};
    use crate::compress::LinkCompressor;
    use crate::config::TieBreaker;
    use crate::error::CycleError;
    use crate::kahn::kahn_schedule;
    use crate::schedule::{is_valid_schedule, Schedule};
    use crate::simplify::simplify;
    use crate::weight::AllocWeight;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn only(pass: TighteningPass) -> Optimizations {
        let mut opts = Optimizations::all_off();
        match pass {
            TighteningPass::SlideLinks => {}
            TighteningPass::LinkTightDrops => opts.link_tight_drops = true,
            TighteningPass::LinkCloseTightPairs => opts.link_close_tight_pairs = true,
            TighteningPass::ConstrainWeightSeparatedGroups => {
                opts.constrain_weight_separated_groups = true
            }
            TighteningPass::ConstrainParallelChains => opts.constrain_parallel_chains = true,
        }
        opts
    }

    /// A random DAG of `n` ops with random allocs of small integer weight.
    fn random_graph(n: usize, seed: u64) -> Graph {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut g = Graph::new();
        g.insert_ops(n);
        for (from, outs) in random_dag(n, 0.25, seed).into_iter().enumerate() {
            for to in outs {
                g.insert_constraint(from, to).unwrap();
            }
        }
        for _ in 0..n {
            let alloc = g.insert_alloc(AllocWeight::from_value(rng.random_range(1..=10) as f64));
            let mut ops: Vec<OpAddress> = (0..n).filter(|_| rng.random_bool(0.25)).collect();
            if ops.is_empty() {
                ops.push(rng.random_range(0..n));
            }
            g.insert_op_alloc(&ops, alloc).unwrap();
        }
        g
    }

    /// Smallest sum liveness, measured on `measured`, over every valid
    /// schedule of `g`.
    fn best_sum(g: &Graph, measured: &Graph) -> AllocWeight {
        all_topological_orders(&g.fwd_edges())
            .into_iter()
            .filter(|order| is_valid_schedule(g, order))
            .map(|order| Schedule::from_order(order).unwrap().sum_liveness(measured))
            .min()
            .unwrap()
    }

    /// Fork into two tight chains B0 -> C0 and B1 -> C1 which join again.
    fn fork_join(w0: f64, w1: f64, w2: f64) -> Graph {
        let mut g = Graph::new();
        let a = g.insert_op(&[], "A").unwrap();
        let b0 = g.insert_op(&[a], "B0").unwrap();
        let b1 = g.insert_op(&[a], "B1").unwrap();
        let c0 = g.insert_op(&[b0], "C0").unwrap();
        let c1 = g.insert_op(&[b1], "C1").unwrap();
        let d = g.insert_op(&[c0, c1], "D").unwrap();
        let alloc = g.insert_alloc(AllocWeight::from_value(w0));
        g.insert_op_alloc(&[a, b0, b1], alloc).unwrap();
        let alloc = g.insert_alloc(AllocWeight::from_value(w1));
        g.insert_op_alloc(&[b0, c0], alloc).unwrap();
        let alloc = g.insert_alloc(AllocWeight::from_value(w1));
        g.insert_op_alloc(&[b1, c1], alloc).unwrap();
        let alloc = g.insert_alloc(AllocWeight::from_value(w2));
        g.insert_op_alloc(&[c0, c1, d], alloc).unwrap();
        g
    }

    #[test]
    fn test_link_tight_drops_on_fork_join() {
        let mut cases = vec![
            (1.0, 0.99, 1.0),
            (0.99, 0.99, 1.0),
            (100.0, 10.0, 1000.0),
            (1.0, 0.99, 0.99),
            (1.2, 1.0, 0.8),
            (1.0, 1.0, 1.0),
            (0.8, 1.0, 0.12),
            (10.0, 900.0, 1000.0),
            (0.8, 1.0, 1.2),
            (0.12, 1.0, 0.8),
            (1.0, 1.01, 1.0),
            (1000.0, 900.0, 10.0),
        ];
        let mut rng = StdRng::seed_from_u64(1015);
        for _ in 0..50 {
            cases.push((
                rng.random_range(1..=10) as f64,
                rng.random_range(1..=10) as f64,
                rng.random_range(1..=10) as f64,
            ));
        }

        for (w0, w1, w2) in cases {
            let mut g = fork_join(w0, w1, w2);
            tighten(&mut g, &only(TighteningPass::LinkTightDrops), 0).unwrap();
            let expected = if 2.0 * w1 >= w0 + w2 { 2 } else { 0 };
            assert_eq!(g.link_chains().len(), expected, "weights {w0}, {w1}, {w2}");
        }
    }

    /// Two subtrees under 0. Ops 1, 3, 4 and 7 free large allocs made live
    /// by 0, and 10 frees a huge one.
    fn two_subtrees(with_4_7: bool, big_drop_6: bool) -> Graph {
        let mut g = Graph::new();
        g.insert_ops(11);
        for (from, to) in [
            (0, 1),
            (0, 2),
            (1, 3),
            (1, 4),
            (2, 5),
            (2, 6),
            (3, 7),
            (4, 8),
            (5, 8),
            (6, 9),
            (7, 10),
            (9, 10),
        ] {
            g.insert_constraint(from, to).unwrap();
        }
        if with_4_7 {
            g.insert_constraint(4, 7).unwrap();
        }
        for op in 0..11 {
            let alloc = g.insert_alloc(AllocWeight::from_value(0.1));
            let mut ops = g.op(op).outs().to_vec();
            ops.push(op);
            g.insert_op_alloc(&ops, alloc).unwrap();
        }
        for op in [1, 3, 4, 7] {
            let alloc = g.insert_alloc(AllocWeight::from_value(1000.0));
            g.insert_op_alloc(&[0, op], alloc).unwrap();
        }
        let alloc = g.insert_alloc(AllocWeight::from_value(100000.0));
        g.insert_op_alloc(&[0, 10], alloc).unwrap();
        if big_drop_6 {
            let alloc = g.insert_alloc(AllocWeight::from_value(100000.0));
            g.insert_op_alloc(&[0, 6], alloc).unwrap();
        }
        g
    }

    #[test]
    fn test_weight_separated_groups_on_subtrees() {
        let mut opts = only(TighteningPass::ConstrainWeightSeparatedGroups);
        opts.max_iterations = 1;

        for with_4_7 in [false, true] {
            let original = two_subtrees(with_4_7, false);
            let mut g = original.clone();
            tighten(&mut g, &opts, 0).unwrap();
            for op in (0..11).filter(|&op| op != 2) {
                assert_eq!(g.op(op).ins(), original.op(op).ins());
            }
            let expected: &[OpAddress] = if with_4_7 { &[0, 1, 4] } else { &[0, 1] };
            assert_eq!(g.op(2).ins(), expected);
        }

        let original = two_subtrees(true, true);
        let mut g = original.clone();
        tighten(&mut g, &opts, 0).unwrap();
        assert_eq!(g.op(2).ins(), original.op(2).ins());
    }

    #[test]
    fn test_exact_optimizations_keep_an_optimal_schedule() {
        let opts = Optimizations::exact();
        for seed in 0..150 {
            let n = 5 + (seed % 4) as usize;
            let g = random_graph(n, seed);
            let mut tightened = g.clone();
            tighten(&mut tightened, &opts, 0).unwrap();
            assert_eq!(best_sum(&tightened, &g), best_sum(&g, &g), "seed {seed}");

            // Simplified allocs rank schedules the same, so tightening on
            // them is just as safe.
            let mut both = g.clone();
            simplify(&mut both, &opts, 0).unwrap();
            tighten(&mut both, &opts, 0).unwrap();
            assert_eq!(best_sum(&both, &g), best_sum(&g, &g), "seed {seed}");
        }
    }

    #[test]
    fn test_disabled_passes_do_nothing() {
        let original = random_graph(12, 3);
        let mut g = original.clone();
        let summary = tighten(&mut g, &Optimizations::all_off(), 0).unwrap();
        assert_eq!(summary, TighteningSummary::default());
        assert_eq!(g, original);
    }

    #[test]
    fn test_tightening_is_idempotent() {
        for seed in 0..10 {
            let mut opts = Optimizations::all_on();
            opts.max_iterations = 1000;
            let mut g = random_graph(12, seed);
            tighten(&mut g, &opts, 0).unwrap();
            let once = g.clone();

            let summary = tighten(&mut g, &opts, 0).unwrap();
            assert_eq!(summary.constraints_inserted, 0, "seed {seed}");
            assert_eq!(summary.links_inserted, 0, "seed {seed}");
            assert_eq!(summary.constraints_moved, 0, "seed {seed}");
            assert_eq!(g, once, "seed {seed}");
        }
    }

    #[test]
    fn test_tightened_schedules_are_valid_for_the_original() {
        for seed in 0..10 {
            let original = random_graph(15, seed);
            let mut g = original.clone();
            tighten(&mut g, &Optimizations::all_on(), 0).unwrap();

            let lc = LinkCompressor::new(&g);
            for tb in [TieBreaker::Fifo, TieBreaker::Greedy, TieBreaker::Random] {
                let order = lc.expand(&kahn_schedule(lc.compressed(), tb, seed).unwrap());
                assert!(is_valid_schedule(&g, &order), "seed {seed}");
                assert!(is_valid_schedule(&original, &order), "seed {seed}");
            }
        }
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut g = Graph::new();
        g.insert_ops(3);
        g.insert_constraint(0, 1).unwrap();
        g.insert_constraint(1, 2).unwrap();
        g.insert_constraint(2, 0).unwrap();
        assert_eq!(
            tighten(&mut g, &Optimizations::all_on(), 0),
            Err(ScheduleError::Cycle(CycleError { ops: vec![0, 1, 2] }))
        );
    }

    #[test]
    fn test_redundant_constraints_are_removed() {
        let mut g = Graph::new();
        g.insert_ops(3);
        g.insert_constraint(0, 1).unwrap();
        g.insert_constraint(1, 2).unwrap();
        g.insert_constraint(0, 2).unwrap();
        let summary = tighten(&mut g, &only(TighteningPass::LinkTightDrops), 0).unwrap();
        assert_eq!(summary.redundants_removed, 1);
        assert!(!g.op(0).has_out(2));
    }
}
