//! End-to-end scheduling: simplify, tighten, compress, Kahn, rotate.

use pyo3::prelude::*;
use std::collections::HashMap;

use crate::cache::{CacheKey, ScheduleCache};
use crate::closure::PartitionedClosure;
use crate::compress::LinkCompressor;
use crate::config::{Optimizations, Settings, Termination, TieBreaker};
use crate::error::{CycleError, ScheduleError};
use crate::graph::{Graph, OpAddress, ScheduleIndex};
use crate::kahn::kahn_schedule;
use crate::rotation::RotationOptimizer;
use crate::schedule::Schedule;
use crate::simplify::simplify;
use crate::tighten::tighten;
use crate::weight::AllocWeight;
use crate::{log_changes, log_checks};

/// A finished schedule.
#[pyclass]
#[derive(Clone, Debug)]
pub struct ScheduleResult {
    /// Schedule index of every op
    #[pyo3(get)]
    pub order: Vec<ScheduleIndex>,
    /// Op at every schedule index
    #[pyo3(get)]
    pub schedule: Vec<OpAddress>,
    #[pyo3(get)]
    pub sum_liveness: AllocWeight,
    #[pyo3(get)]
    pub max_liveness: AllocWeight,
    /// How the schedule was obtained
    #[pyo3(get)]
    pub metadata: HashMap<String, String>,
}

impl ScheduleResult {
    fn new(
        graph: &Graph,
        order: Vec<OpAddress>,
        metadata: HashMap<String, String>,
    ) -> Result<Self, ScheduleError> {
        let schedule = Schedule::from_order(order)?;
        Ok(Self {
            sum_liveness: schedule.sum_liveness(graph),
            max_liveness: schedule.max_liveness(graph),
            order: schedule.positions().to_vec(),
            schedule: schedule.into_order(),
            metadata,
        })
    }

    pub fn position(&self, op: OpAddress) -> ScheduleIndex {
        self.order[op]
    }
}

#[pymethods]
impl ScheduleResult {
    fn __len__(&self) -> usize {
        self.schedule.len()
    }

    fn __repr__(&self) -> String {
        format!(
            "ScheduleResult(n_ops={}, sum_liveness={}, max_liveness={})",
            self.schedule.len(),
            self.sum_liveness,
            self.max_liveness
        )
    }
}

/// Schedule `graph` under `settings`. The graph itself is left untouched.
pub fn schedule(graph: &Graph, settings: &Settings) -> Result<ScheduleResult, ScheduleError> {
    schedule_with_cache(graph, settings, None, None)
}

pub fn schedule_with(
    graph: &Graph,
    tie_breaker: TieBreaker,
    seed: u64,
    optimizations: Optimizations,
    termination: Termination,
) -> Result<ScheduleResult, ScheduleError> {
    let settings = Settings {
        tie_breaker,
        seed,
        optimizations,
        termination,
        ..Settings::default()
    };
    schedule(graph, &settings)
}

/// Like [`schedule`], but first looks the graph up in `read_cache` and, on
/// a miss, stores the new schedule in `write_cache`.
///
/// A hit replays the cached order and skips tightening and rotation.
pub fn schedule_with_cache(
    graph: &Graph,
    settings: &Settings,
    read_cache: Option<&ScheduleCache>,
    write_cache: Option<&ScheduleCache>,
) -> Result<ScheduleResult, ScheduleError> {
    let verbosity = settings.verbosity;
    let key = (read_cache.is_some() || write_cache.is_some())
        .then(|| CacheKey::new(graph, settings));
    let mut metadata = HashMap::new();

    if let (Some(cache), Some(key)) = (read_cache, key.as_ref()) {
        if let Some(cached) = cache.get(key) {
            log_changes!(
                verbosity,
                "Schedule cache hit for a graph of {} ops",
                graph.n_ops()
            );
            let order = replay(graph, &cached, settings)?;
            metadata.insert("cache".to_string(), "hit".to_string());
            return ScheduleResult::new(graph, order, metadata);
        }
        log_checks!(verbosity, "Schedule cache miss for a graph of {} ops", graph.n_ops());
        metadata.insert("cache".to_string(), "miss".to_string());
    } else {
        metadata.insert("cache".to_string(), "none".to_string());
    }

    let order = optimize(graph, settings, &mut metadata)?;

    if let (Some(cache), Some(key)) = (write_cache, key) {
        cache.insert(key, order.clone());
        log_changes!(verbosity, "Wrote schedule of {} ops to the cache", order.len());
    }
    ScheduleResult::new(graph, order, metadata)
}

/// The full pipeline, without the cache.
///
/// Simplification shifts the liveness of every schedule by the same
/// amount, so liveness reported in the metadata is always measured on the
/// caller's graph.
fn optimize(
    graph: &Graph,
    settings: &Settings,
    metadata: &mut HashMap<String, String>,
) -> Result<Vec<OpAddress>, ScheduleError> {
    let verbosity = settings.verbosity;
    let mut tightened = graph.clone();
    let simplified = simplify(&mut tightened, &settings.optimizations, verbosity)?;
    metadata.insert(
        "simplification_rounds".to_string(),
        simplified.rounds.to_string(),
    );
    metadata.insert("simplifications".to_string(), simplified.changes.to_string());

    let summary = tighten(&mut tightened, &settings.optimizations, verbosity)?;
    metadata.insert("tightening_rounds".to_string(), summary.rounds.to_string());
    metadata.insert(
        "constraints_inserted".to_string(),
        summary.constraints_inserted.to_string(),
    );
    metadata.insert("links_inserted".to_string(), summary.links_inserted.to_string());

    let initial = initial_schedule(&tightened, settings.tie_breaker, settings.seed)?;

    let fixed = if settings.termination.is_zero() {
        Vec::new()
    } else {
        fixed_ops(&tightened)?
    };
    let initial_sum = Schedule::from_order(initial.clone())?.sum_liveness(graph);
    let mut rotation =
        RotationOptimizer::new(&tightened, initial, fixed, settings.seed, verbosity)?;
    let stats = rotation.run(&settings.termination);
    let order = rotation.into_order();
    log_changes!(
        verbosity,
        "Rotation: {} rotations in {} rounds, sum liveness {} -> {}{}",
        stats.rotations,
        stats.rounds,
        initial_sum,
        Schedule::from_order(order.clone())?.sum_liveness(graph),
        if stats.exhausted { " (budget exhausted)" } else { "" }
    );
    metadata.insert("initial_sum_liveness".to_string(), initial_sum.to_string());
    metadata.insert("rotations".to_string(), stats.rotations.to_string());
    metadata.insert("rotation_rounds".to_string(), stats.rounds.to_string());

    Ok(order)
}

/// Kahn's algorithm on the link-compressed graph, expanded back.
fn initial_schedule(
    graph: &Graph,
    tie_breaker: TieBreaker,
    seed: u64,
) -> Result<Vec<OpAddress>, CycleError> {
    let compressor = LinkCompressor::new(graph);
    let compressed =
        kahn_schedule(compressor.compressed(), tie_breaker, seed).map_err(|e| CycleError {
            ops: compressor.to_parent_ops(&e.ops),
        })?;
    Ok(compressor.expand(&compressed))
}

/// Ops with the same position in every valid schedule.
fn fixed_ops(graph: &Graph) -> Result<Vec<bool>, ScheduleError> {
    let closure = PartitionedClosure::new(&graph.fwd_edges())?;
    Ok((0..graph.n_ops())
        .map(|op| closure.n_unconstrained(op) == 0)
        .collect())
}

/// Rebuild a cached order by pinning it with a chain of constraints and
/// rescheduling.
fn replay(
    graph: &Graph,
    cached: &[OpAddress],
    settings: &Settings,
) -> Result<Vec<OpAddress>, ScheduleError> {
    let mut pinned = graph.clone();
    for pair in cached.windows(2) {
        pinned.insert_constraint(pair[0], pair[1])?;
    }
    Ok(initial_schedule(&pinned, settings.tie_breaker, settings.seed)?)
}
