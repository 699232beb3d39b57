//! Cache of finished schedules, shared between scheduling runs.
//!
//! Entries are keyed on the graph as the caller built it, before any
//! tightening, together with every setting that can change the resulting
//! order. Graph equality is structural, so renaming ops still hits.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{Optimizations, Settings, TieBreaker};
use crate::graph::{Graph, OpAddress};
use crate::schedule::is_valid_schedule;

/// Identity of a scheduling run.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    graph: Graph,
    tie_breaker: TieBreaker,
    seed: u64,
    optimizations: Optimizations,
    /// Bit patterns of the termination budget.
    termination: (Option<u64>, Option<u64>),
}

impl CacheKey {
    pub fn new(graph: &Graph, settings: &Settings) -> Self {
        Self {
            graph: graph.clone(),
            tie_breaker: settings.tie_breaker,
            seed: settings.seed,
            optimizations: settings.optimizations.clone(),
            termination: settings.termination.key(),
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }
}

/// Thread-safe map from [`CacheKey`] to schedule order.
///
/// Reads take a shared lock and writes an exclusive one, so a concurrent
/// reader never sees a half-written entry.
#[derive(Debug, Default)]
pub struct ScheduleCache {
    entries: RwLock<FxHashMap<CacheKey, Vec<OpAddress>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ScheduleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached order for `key`. An entry that is not a valid schedule of
    /// the key's graph counts as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<OpAddress>> {
        let found = self
            .entries
            .read()
            .get(key)
            .filter(|order| is_valid_schedule(&key.graph, order))
            .cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Store `order` under `key`, replacing any previous entry.
    pub fn insert(&self, key: CacheKey, order: Vec<OpAddress>) {
        self.entries.write().insert(key, order);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drop every entry. The hit and miss counters are kept.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
