//! Error types shared by the graph, closure and scheduling passes.

use thiserror::Error;

use crate::graph::{AllocAddress, OpAddress};

/// Malformed input rejected at construction time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("Op address {op} out of range: the graph has {n_ops} ops")]
    OpOutOfRange { op: OpAddress, n_ops: usize },
    #[error("Alloc address {alloc} out of range: the graph has {n_allocs} allocs")]
    AllocOutOfRange { alloc: AllocAddress, n_allocs: usize },
    #[error("Op {op} cannot be constrained to itself")]
    SelfConstraint { op: OpAddress },
    #[error("Op {op} cannot be linked to itself")]
    SelfLink { op: OpAddress },
    #[error("Op {op} already uses alloc {alloc}")]
    DuplicateOpAlloc { op: OpAddress, alloc: AllocAddress },
    #[error("Cannot link {from} -> {to}: op {from} is already linked forward to {existing}")]
    LinkBranch {
        from: OpAddress,
        existing: OpAddress,
        to: OpAddress,
    },
    #[error("Cannot link {from} -> {to}: op {to} is already linked from {existing}")]
    LinkMerge {
        to: OpAddress,
        existing: OpAddress,
        from: OpAddress,
    },
    #[error("Unknown id: {0}")]
    UnknownId(String),
    #[error("Not a schedule of {n_ops} ops: {reason}")]
    InvalidOrder { n_ops: usize, reason: String },
}

/// The non-link constraints contain a cycle.
///
/// `ops` lists every op that could not be scheduled: the ops on a cycle and
/// everything downstream of one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Cycle detected: {} ops could not be scheduled: {:?}", .ops.len(), .ops)]
pub struct CycleError {
    pub ops: Vec<OpAddress>,
}

/// Errors that can occur during scheduling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error(transparent)]
    Structural(#[from] StructuralError),
    #[error(transparent)]
    Cycle(#[from] CycleError),
}
