//! Liveness-minimizing scheduler for DAGs of ops sharing allocations.
//!
//! A [`Graph`] of ops, constraints, links and weighted allocations has its
//! allocs simplified, is tightened with extra constraints and links, is scheduled
//! with Kahn's algorithm on its link-compressed form, and then improved by
//! rotating windows of the schedule until the sum liveness stops dropping.

// Allow clippy warning triggered by PyO3 macro expansion
#![allow(clippy::useless_conversion)]

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::sync::Arc;

pub mod cache;
pub mod closure;
pub mod compress;
mod config;
pub mod error;
pub mod graph;
pub mod kahn;
pub mod logging;
pub mod pipeline;
pub mod rotation;
pub mod schedule;
pub mod simplify;
pub mod tighten;
pub mod weight;

pub use cache::{CacheKey, ScheduleCache};
pub use closure::{DurationBound, IsFinal, IsFirst, PartitionedClosure, TransitiveClosure};
pub use compress::LinkCompressor;
pub use config::{Optimizations, Settings, Termination, TieBreaker};
pub use error::{CycleError, ScheduleError, StructuralError};
pub use graph::{AllocAddress, FwdEdgeMap, Graph, OpAddress, ScheduleIndex};
pub use kahn::kahn_schedule;
pub use pipeline::{schedule, schedule_with, schedule_with_cache, ScheduleResult};
pub use rotation::{RotationOptimizer, RotationStats};
pub use schedule::{is_valid_schedule, Schedule};
pub use simplify::{simplify, Simplification, SimplifySummary};
pub use tighten::{tighten, LivenessBounds, TighteningPass, TighteningSummary};
pub use weight::AllocWeight;

fn value_error(e: impl std::fmt::Display) -> PyErr {
    PyValueError::new_err(e.to_string())
}

/// Graph under construction (PyO3 wrapper).
#[pyclass(name = "Graph")]
#[derive(Clone, Debug, Default)]
pub struct PyGraph {
    inner: Graph,
}

#[pymethods]
impl PyGraph {
    #[new]
    fn new() -> Self {
        Self::default()
    }

    /// Insert an op scheduled after every op in `ins`.
    #[pyo3(signature = (ins=Vec::new(), name=String::new()))]
    fn insert_op(&mut self, ins: Vec<OpAddress>, name: String) -> PyResult<OpAddress> {
        self.inner.insert_op(&ins, name).map_err(value_error)
    }

    fn insert_ops(&mut self, n: usize) -> Vec<OpAddress> {
        self.inner.insert_ops(n)
    }

    fn insert_alloc(&mut self, weight: AllocWeight) -> AllocAddress {
        self.inner.insert_alloc(weight)
    }

    fn insert_op_alloc(&mut self, ops: Vec<OpAddress>, alloc: AllocAddress) -> PyResult<()> {
        self.inner.insert_op_alloc(&ops, alloc).map_err(value_error)
    }

    fn insert_constraint(&mut self, from: OpAddress, to: OpAddress) -> PyResult<bool> {
        self.inner.insert_constraint(from, to).map_err(value_error)
    }

    fn insert_link(&mut self, from: OpAddress, to: OpAddress) -> PyResult<bool> {
        self.inner.insert_link(from, to).map_err(value_error)
    }

    fn set_priority(&mut self, op: OpAddress, priority: f64) -> PyResult<()> {
        self.inner.set_priority(op, priority).map_err(value_error)
    }

    fn n_ops(&self) -> usize {
        self.inner.n_ops()
    }

    fn n_allocs(&self) -> usize {
        self.inner.n_allocs()
    }

    fn __repr__(&self) -> String {
        format!(
            "Graph(n_ops={}, n_allocs={}, n_constraints={})",
            self.inner.n_ops(),
            self.inner.n_allocs(),
            self.inner.n_constraints()
        )
    }
}

/// Schedule cache shared between calls and threads (PyO3 wrapper).
#[pyclass(name = "ScheduleCache")]
#[derive(Clone, Debug, Default)]
pub struct PyScheduleCache {
    inner: Arc<ScheduleCache>,
}

#[pymethods]
impl PyScheduleCache {
    #[new]
    fn new() -> Self {
        Self::default()
    }

    fn __len__(&self) -> usize {
        self.inner.len()
    }

    #[getter]
    fn hits(&self) -> u64 {
        self.inner.hits()
    }

    #[getter]
    fn misses(&self) -> u64 {
        self.inner.misses()
    }

    fn clear(&self) {
        self.inner.clear()
    }

    fn __repr__(&self) -> String {
        format!(
            "ScheduleCache(entries={}, hits={}, misses={})",
            self.inner.len(),
            self.inner.hits(),
            self.inner.misses()
        )
    }
}

/// Schedule a graph, minimizing the sum liveness of its allocations.
///
/// # Raises
/// * ValueError if the graph's constraints contain a cycle
#[pyfunction]
#[pyo3(name = "schedule", signature = (graph, settings=None))]
fn py_schedule(
    py: Python<'_>,
    graph: PyRef<'_, PyGraph>,
    settings: Option<Settings>,
) -> PyResult<ScheduleResult> {
    let settings = settings.unwrap_or_default();
    let graph = &graph.inner;
    py.allow_threads(|| schedule(graph, &settings))
        .map_err(value_error)
}

/// Schedule a graph, reusing and recording results in the given caches.
///
/// # Raises
/// * ValueError if the graph's constraints contain a cycle
#[pyfunction]
#[pyo3(
    name = "schedule_with_cache",
    signature = (graph, settings=None, read_cache=None, write_cache=None)
)]
fn py_schedule_with_cache(
    py: Python<'_>,
    graph: PyRef<'_, PyGraph>,
    settings: Option<Settings>,
    read_cache: Option<PyRef<'_, PyScheduleCache>>,
    write_cache: Option<PyRef<'_, PyScheduleCache>>,
) -> PyResult<ScheduleResult> {
    let settings = settings.unwrap_or_default();
    let graph = &graph.inner;
    let read_cache = read_cache.map(|c| Arc::clone(&c.inner));
    let write_cache = write_cache.map(|c| Arc::clone(&c.inner));
    py.allow_threads(|| {
        schedule_with_cache(graph, &settings, read_cache.as_deref(), write_cache.as_deref())
    })
    .map_err(value_error)
}

/// True if `order` lists every op once, respecting constraints and links.
#[pyfunction]
#[pyo3(name = "is_valid_schedule")]
fn py_is_valid_schedule(graph: PyRef<'_, PyGraph>, order: Vec<OpAddress>) -> bool {
    is_valid_schedule(&graph.inner, &order)
}

/// The shift_schedule Python module.
#[pymodule]
fn shift_schedule(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Core data types
    m.add_class::<PyGraph>()?;
    m.add_class::<AllocWeight>()?;
    m.add_class::<ScheduleResult>()?;
    m.add_class::<PyScheduleCache>()?;

    // Config types
    m.add_class::<Settings>()?;
    m.add_class::<Optimizations>()?;
    m.add_class::<Termination>()?;
    m.add_class::<TieBreaker>()?;

    // Algorithms
    m.add_function(wrap_pyfunction!(py_schedule, m)?)?;
    m.add_function(wrap_pyfunction!(py_schedule_with_cache, m)?)?;
    m.add_function(wrap_pyfunction!(py_is_valid_schedule, m)?)?;

    Ok(())
}
