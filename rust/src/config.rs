//! Configuration types for the scheduling system.

use pyo3::prelude::*;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::simplify::Simplification;
use crate::tighten::TighteningPass;

/// How Kahn's algorithm chooses among several ready ops.
#[pyclass(eq, eq_int)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TieBreaker {
    /// Seeded shuffle of the ready set.
    Random,
    /// Oldest ready op first.
    Fifo,
    /// Newest ready op first.
    Filo,
    /// Op whose scheduling increases liveness least.
    Greedy,
}

impl FromStr for TieBreaker {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(TieBreaker::Random),
            "fifo" => Ok(TieBreaker::Fifo),
            "filo" => Ok(TieBreaker::Filo),
            "greedy" => Ok(TieBreaker::Greedy),
            _ => Err(format!("Unknown tie breaker: {}", s)),
        }
    }
}

impl fmt::Display for TieBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TieBreaker::Random => "random",
            TieBreaker::Fifo => "fifo",
            TieBreaker::Filo => "filo",
            TieBreaker::Greedy => "greedy",
        };
        write!(f, "{}", s)
    }
}

/// Which alloc simplifications and graph-tightening passes run before
/// scheduling.
///
/// The simplifications and the two linking passes keep at least one
/// optimal schedule reachable, and [`Optimizations::exact`] enables exactly
/// those.
/// The two constraining passes are heuristics which can rule out the
/// optimum on some graphs.
#[pyclass]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Optimizations {
    /// Merge allocs used by exactly the same ops
    #[pyo3(get, set)]
    pub combine_allocs_with_common_ops: bool,
    /// Drop allocs used by a single op
    #[pyo3(get, set)]
    pub disconnect_allocs_with_one_op: bool,
    /// Drop allocs of zero weight
    #[pyo3(get, set)]
    pub disconnect_allocs_with_zero_weight: bool,
    /// Detach ops which are never the first or last user of an alloc
    #[pyo3(get, set)]
    pub disconnect_inbetweener_allocs: bool,
    /// Drop allocs which span the same number of slots in every schedule
    #[pyo3(get, set)]
    pub disconnect_fixed_duration_allocs: bool,
    /// Merge equal-weight allocs where one ends at the op the other starts at
    #[pyo3(get, set)]
    pub connect_contiguous_allocs: bool,
    /// Link tight pairs whose second op can only lower liveness more than the first
    #[pyo3(get, set)]
    pub link_tight_drops: bool,
    /// Link tight pairs no third op could be scheduled between profitably
    #[pyo3(get, set)]
    pub link_close_tight_pairs: bool,
    /// Order ops with identical inputs whose liveness bounds do not overlap.
    /// Heuristic
    #[pyo3(get, set)]
    pub constrain_weight_separated_groups: bool,
    /// Ladder-constrain parallel tight chains with identical inputs and outputs.
    /// Heuristic
    #[pyo3(get, set)]
    pub constrain_parallel_chains: bool,
    /// Maximum number of simplification rounds, and of tightening rounds
    #[pyo3(get, set)]
    pub max_iterations: u32,
}

impl Optimizations {
    pub fn all_off() -> Self {
        Self {
            combine_allocs_with_common_ops: false,
            disconnect_allocs_with_one_op: false,
            disconnect_allocs_with_zero_weight: false,
            disconnect_inbetweener_allocs: false,
            disconnect_fixed_duration_allocs: false,
            connect_contiguous_allocs: false,
            link_tight_drops: false,
            link_close_tight_pairs: false,
            constrain_weight_separated_groups: false,
            constrain_parallel_chains: false,
            max_iterations: 100,
        }
    }

    pub fn all_on() -> Self {
        Self {
            combine_allocs_with_common_ops: true,
            disconnect_allocs_with_one_op: true,
            disconnect_allocs_with_zero_weight: true,
            disconnect_inbetweener_allocs: true,
            disconnect_fixed_duration_allocs: true,
            connect_contiguous_allocs: true,
            link_tight_drops: true,
            link_close_tight_pairs: true,
            constrain_weight_separated_groups: true,
            constrain_parallel_chains: true,
            max_iterations: 100,
        }
    }

    /// Everything except the two heuristic constraining passes.
    pub fn exact() -> Self {
        Self {
            constrain_weight_separated_groups: false,
            constrain_parallel_chains: false,
            ..Self::all_on()
        }
    }

    /// Enabled passes, in the order they run within a round. Sliding links
    /// comes first whenever anything else is enabled.
    pub fn enabled(&self) -> Vec<TighteningPass> {
        let mut passes = Vec::new();
        if self.link_tight_drops {
            passes.push(TighteningPass::LinkTightDrops);
        }
        if self.link_close_tight_pairs {
            passes.push(TighteningPass::LinkCloseTightPairs);
        }
        if self.constrain_weight_separated_groups {
            passes.push(TighteningPass::ConstrainWeightSeparatedGroups);
        }
        if self.constrain_parallel_chains {
            passes.push(TighteningPass::ConstrainParallelChains);
        }
        if !passes.is_empty() {
            passes.insert(0, TighteningPass::SlideLinks);
        }
        passes
    }

    /// Enabled alloc simplifications, in the order they run within a round.
    pub fn simplifications(&self) -> Vec<Simplification> {
        [
            (
                self.combine_allocs_with_common_ops,
                Simplification::CombineAllocsWithCommonOps,
            ),
            (
                self.disconnect_allocs_with_one_op,
                Simplification::DisconnectAllocsWithOneOp,
            ),
            (
                self.disconnect_allocs_with_zero_weight,
                Simplification::DisconnectAllocsWithZeroWeight,
            ),
            (
                self.disconnect_inbetweener_allocs,
                Simplification::DisconnectInbetweenerAllocs,
            ),
            (
                self.disconnect_fixed_duration_allocs,
                Simplification::DisconnectFixedDurationAllocs,
            ),
            (
                self.connect_contiguous_allocs,
                Simplification::ConnectContiguousAllocs,
            ),
        ]
        .into_iter()
        .filter_map(|(on, s)| on.then_some(s))
        .collect()
    }

    pub fn any_enabled(&self) -> bool {
        !self.enabled().is_empty() || !self.simplifications().is_empty()
    }
}

impl Default for Optimizations {
    fn default() -> Self {
        Self::all_off()
    }
}

#[pymethods]
impl Optimizations {
    #[new]
    #[pyo3(signature = (
        combine_allocs_with_common_ops=None,
        disconnect_allocs_with_one_op=None,
        disconnect_allocs_with_zero_weight=None,
        disconnect_inbetweener_allocs=None,
        disconnect_fixed_duration_allocs=None,
        connect_contiguous_allocs=None,
        link_tight_drops=None,
        link_close_tight_pairs=None,
        constrain_weight_separated_groups=None,
        constrain_parallel_chains=None,
        max_iterations=None
    ))]
    #[allow(clippy::too_many_arguments)]
    fn py_new(
        combine_allocs_with_common_ops: Option<bool>,
        disconnect_allocs_with_one_op: Option<bool>,
        disconnect_allocs_with_zero_weight: Option<bool>,
        disconnect_inbetweener_allocs: Option<bool>,
        disconnect_fixed_duration_allocs: Option<bool>,
        connect_contiguous_allocs: Option<bool>,
        link_tight_drops: Option<bool>,
        link_close_tight_pairs: Option<bool>,
        constrain_weight_separated_groups: Option<bool>,
        constrain_parallel_chains: Option<bool>,
        max_iterations: Option<u32>,
    ) -> Self {
        let defaults = Self::default();
        Self {
            combine_allocs_with_common_ops: combine_allocs_with_common_ops
                .unwrap_or(defaults.combine_allocs_with_common_ops),
            disconnect_allocs_with_one_op: disconnect_allocs_with_one_op
                .unwrap_or(defaults.disconnect_allocs_with_one_op),
            disconnect_allocs_with_zero_weight: disconnect_allocs_with_zero_weight
                .unwrap_or(defaults.disconnect_allocs_with_zero_weight),
            disconnect_inbetweener_allocs: disconnect_inbetweener_allocs
                .unwrap_or(defaults.disconnect_inbetweener_allocs),
            disconnect_fixed_duration_allocs: disconnect_fixed_duration_allocs
                .unwrap_or(defaults.disconnect_fixed_duration_allocs),
            connect_contiguous_allocs: connect_contiguous_allocs
                .unwrap_or(defaults.connect_contiguous_allocs),
            link_tight_drops: link_tight_drops.unwrap_or(defaults.link_tight_drops),
            link_close_tight_pairs: link_close_tight_pairs
                .unwrap_or(defaults.link_close_tight_pairs),
            constrain_weight_separated_groups: constrain_weight_separated_groups
                .unwrap_or(defaults.constrain_weight_separated_groups),
            constrain_parallel_chains: constrain_parallel_chains
                .unwrap_or(defaults.constrain_parallel_chains),
            max_iterations: max_iterations.unwrap_or(defaults.max_iterations),
        }
    }

    #[staticmethod]
    #[pyo3(name = "all_on")]
    fn py_all_on() -> Self {
        Self::all_on()
    }

    #[staticmethod]
    #[pyo3(name = "exact")]
    fn py_exact() -> Self {
        Self::exact()
    }

    fn __repr__(&self) -> String {
        let enabled: Vec<String> = self
            .simplifications()
            .iter()
            .map(ToString::to_string)
            .chain(self.enabled().iter().map(ToString::to_string))
            .collect();
        format!(
            "Optimizations(enabled=[{}], max_iterations={})",
            enabled.join(", "),
            self.max_iterations
        )
    }
}

/// Budget for the rotation optimizer. `None` means unbounded.
///
/// The budget is checked after every sweep of the schedule, so a run may
/// overshoot either limit by what one sweep does.
#[pyclass]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Termination {
    /// Wall-clock limit in seconds
    #[pyo3(get, set)]
    pub max_seconds: Option<f64>,
    /// Number of applied rotations after which no further sweep starts
    #[pyo3(get, set)]
    pub max_rotations: Option<u64>,
}

impl Termination {
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// No rotation at all.
    pub fn none() -> Self {
        Self {
            max_seconds: Some(0.0),
            max_rotations: Some(0),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.max_seconds.is_some_and(|s| s <= 0.0) || self.max_rotations == Some(0)
    }

    /// `None` if unbounded, including NaN and limits too large for a
    /// `Duration`.
    pub fn time_limit(&self) -> Option<Duration> {
        self.max_seconds
            .filter(|s| !s.is_nan())
            .and_then(|s| Duration::try_from_secs_f64(s.max(0.0)).ok())
    }

    /// Bit-exact identity for cache keys.
    pub(crate) fn key(&self) -> (Option<u64>, Option<u64>) {
        (self.max_seconds.map(f64::to_bits), self.max_rotations)
    }
}

#[pymethods]
impl Termination {
    #[new]
    #[pyo3(signature = (max_seconds=None, max_rotations=None))]
    fn py_new(max_seconds: Option<f64>, max_rotations: Option<u64>) -> Self {
        Self {
            max_seconds,
            max_rotations,
        }
    }

    fn __repr__(&self) -> String {
        format!(
            "Termination(max_seconds={:?}, max_rotations={:?})",
            self.max_seconds, self.max_rotations
        )
    }
}

/// Everything that controls a scheduling run.
#[pyclass]
#[derive(Clone, Debug)]
pub struct Settings {
    /// Kahn tie-break policy
    #[pyo3(get, set)]
    pub tie_breaker: TieBreaker,
    /// Seed for the random tie breaker and the rotation visiting order
    #[pyo3(get, set)]
    pub seed: u64,
    /// Graph-tightening passes
    #[pyo3(get, set)]
    pub optimizations: Optimizations,
    /// Rotation budget
    #[pyo3(get, set)]
    pub termination: Termination,
    /// Logging verbosity (0-3)
    #[pyo3(get, set)]
    pub verbosity: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tie_breaker: TieBreaker::Greedy,
            seed: 1011,
            optimizations: Optimizations::all_off(),
            termination: Termination::unlimited(),
            verbosity: 0,
        }
    }
}

#[pymethods]
impl Settings {
    #[new]
    #[pyo3(signature = (
        tie_breaker=None,
        seed=None,
        optimizations=None,
        termination=None,
        verbosity=None
    ))]
    fn py_new(
        tie_breaker: Option<String>,
        seed: Option<u64>,
        optimizations: Option<Optimizations>,
        termination: Option<Termination>,
        verbosity: Option<u8>,
    ) -> PyResult<Self> {
        let defaults = Self::default();
        let tie_breaker = match tie_breaker {
            Some(s) => s
                .parse::<TieBreaker>()
                .map_err(pyo3::exceptions::PyValueError::new_err)?,
            None => defaults.tie_breaker,
        };
        Ok(Self {
            tie_breaker,
            seed: seed.unwrap_or(defaults.seed),
            optimizations: optimizations.unwrap_or(defaults.optimizations),
            termination: termination.unwrap_or(defaults.termination),
            verbosity: verbosity.unwrap_or(defaults.verbosity),
        })
    }

    fn __repr__(&self) -> String {
        format!(
            "Settings(tie_breaker={}, seed={}, verbosity={})",
            self.tie_breaker, self.seed, self.verbosity
        )
    }
}
