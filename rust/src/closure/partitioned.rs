//! One transitive closure per connected component.
//!
//! Ops in different components are never ordered relative to each other, so
//! a graph made of many small independent pieces needs only the sum of the
//! squares of their sizes in bits rather than the square of the total.

use super::{ConnectedComponents, TransitiveClosure};
use crate::error::{ScheduleError, StructuralError};
use crate::graph::OpAddress;

/// Drop-in for [`TransitiveClosure`] on the queries it supports, built per
/// component.
#[derive(Clone, Debug)]
pub struct PartitionedClosure {
    n_ops: usize,
    components: ConnectedComponents,
    closures: Vec<TransitiveClosure>,
}

impl PartitionedClosure {
    pub fn new(edges: &[Vec<OpAddress>]) -> Result<Self, ScheduleError> {
        let n_ops = edges.len();
        if let Some(&op) = edges.iter().flatten().find(|&&to| to >= n_ops) {
            return Err(StructuralError::OpOutOfRange { op, n_ops }.into());
        }
        let components = ConnectedComponents::new(edges);
        let mut closures = Vec::with_capacity(components.n_components());
        for c in 0..components.n_components() {
            let closure = TransitiveClosure::new(components.component(c)).map_err(|e| match e {
                ScheduleError::Cycle(mut cycle) => {
                    for op in &mut cycle.ops {
                        *op = components.global_id(c, *op);
                    }
                    ScheduleError::Cycle(cycle)
                }
                other => other,
            })?;
            closures.push(closure);
        }
        Ok(Self {
            n_ops,
            components,
            closures,
        })
    }

    pub fn n_ops(&self) -> usize {
        self.n_ops
    }

    pub fn n_components(&self) -> usize {
        self.closures.len()
    }

    fn locate(&self, op: OpAddress) -> (&TransitiveClosure, usize) {
        let c = self.components.component_id(op);
        (&self.closures[c], self.components.local_id(op))
    }

    pub fn constrained(&self, from: OpAddress, to: OpAddress) -> bool {
        let c = self.components.component_id(from);
        if c != self.components.component_id(to) {
            return false;
        }
        self.closures[c].constrained(
            self.components.local_id(from),
            self.components.local_id(to),
        )
    }

    pub fn unconstrained_in_both_directions(&self, a: OpAddress, b: OpAddress) -> bool {
        a != b && !self.constrained(a, b) && !self.constrained(b, a)
    }

    /// Every op with no forced order relative to `a`, ascending.
    pub fn unconstrained(&self, a: OpAddress) -> Vec<OpAddress> {
        let c = self.components.component_id(a);
        let (closure, local) = self.locate(a);
        let mut out: Vec<OpAddress> = closure
            .unconstrained(local)
            .into_iter()
            .map(|l| self.components.global_id(c, l))
            .collect();
        for other in 0..self.components.n_components() {
            if other != c {
                out.extend_from_slice(self.components.nodes(other));
            }
        }
        out.sort_unstable();
        out
    }

    pub fn n_before(&self, a: OpAddress) -> usize {
        let (closure, local) = self.locate(a);
        closure.n_before(local)
    }

    pub fn n_after(&self, a: OpAddress) -> usize {
        let (closure, local) = self.locate(a);
        closure.n_after(local)
    }

    pub fn n_unconstrained(&self, a: OpAddress) -> usize {
        self.n_ops - 1 - self.n_before(a) - self.n_after(a)
    }
}
