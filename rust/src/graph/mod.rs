//! Graph of ops, constraints, links and allocations.
//!
//! Addresses are dense and append-only: the n-th inserted op has address n,
//! and likewise for allocations. Constraints may be added and removed, ops
//! and allocations never are.
//!
//! Two graphs compare (and hash) equal when they have identical structure,
//! weights and priorities, whatever their debug names.

mod alloc;
mod chains;
pub mod edge_map;
mod op;

pub use alloc::Alloc;
pub use chains::Merged;
pub use edge_map::FwdEdgeMap;
pub use op::Op;

use crate::error::StructuralError;
use crate::weight::AllocWeight;

/// Dense index of an op.
pub type OpAddress = usize;
/// Dense index of an allocation.
pub type AllocAddress = usize;
/// Position in a schedule.
pub type ScheduleIndex = usize;

/// A graph to be scheduled.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Graph {
    ops: Vec<Op>,
    allocs: Vec<Alloc>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn n_allocs(&self) -> usize {
        self.allocs.len()
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn allocs(&self) -> &[Alloc] {
        &self.allocs
    }

    /// The op at `address`. Panics if out of range; use [`Graph::try_op`]
    /// for unchecked input.
    #[inline]
    pub fn op(&self, address: OpAddress) -> &Op {
        &self.ops[address]
    }

    pub fn try_op(&self, address: OpAddress) -> Result<&Op, StructuralError> {
        self.ops.get(address).ok_or(StructuralError::OpOutOfRange {
            op: address,
            n_ops: self.ops.len(),
        })
    }

    #[inline]
    pub fn alloc(&self, address: AllocAddress) -> &Alloc {
        &self.allocs[address]
    }

    /// Insert an op which must be scheduled after every op in `ins`.
    pub fn insert_op(
        &mut self,
        ins: &[OpAddress],
        name: impl Into<String>,
    ) -> Result<OpAddress, StructuralError> {
        for &i in ins {
            self.check_op(i)?;
        }
        let address = self.ops.len();
        self.ops.push(Op::new(address, name.into()));
        for &i in ins {
            self.insert_constraint(i, address)?;
        }
        Ok(address)
    }

    /// Insert `n` unconstrained ops, named by their addresses.
    pub fn insert_ops(&mut self, n: usize) -> Vec<OpAddress> {
        (0..n)
            .map(|_| {
                let address = self.ops.len();
                self.ops.push(Op::new(address, address.to_string()));
                address
            })
            .collect()
    }

    pub fn insert_alloc(&mut self, weight: AllocWeight) -> AllocAddress {
        let address = self.allocs.len();
        self.allocs.push(Alloc::new(address, weight));
        address
    }

    /// Register every op in `ops` as a user of `alloc`.
    pub fn insert_op_alloc(
        &mut self,
        ops: &[OpAddress],
        alloc: AllocAddress,
    ) -> Result<(), StructuralError> {
        self.check_alloc(alloc)?;
        for &op in ops {
            self.check_op(op)?;
            if self.ops[op].has_alloc(alloc) {
                return Err(StructuralError::DuplicateOpAlloc { op, alloc });
            }
        }
        for &op in ops {
            // Repeats within `ops` itself are harmless.
            self.ops[op].insert_alloc(alloc);
            self.allocs[alloc].insert_op(op);
        }
        Ok(())
    }

    /// Require `from` to be scheduled before `to`. Returns false if the
    /// constraint was already present.
    pub fn insert_constraint(
        &mut self,
        from: OpAddress,
        to: OpAddress,
    ) -> Result<bool, StructuralError> {
        self.check_op(from)?;
        self.check_op(to)?;
        if from == to {
            return Err(StructuralError::SelfConstraint { op: from });
        }
        let inserted = self.ops[from].insert_out(to);
        self.ops[to].insert_in(from);
        Ok(inserted)
    }

    /// Require `to` to be scheduled immediately after `from`.
    ///
    /// Each op has at most one forward and one backward link, so links form
    /// simple chains. Returns false if the link was already present.
    pub fn insert_link(&mut self, from: OpAddress, to: OpAddress) -> Result<bool, StructuralError> {
        self.check_op(from)?;
        self.check_op(to)?;
        if from == to {
            return Err(StructuralError::SelfLink { op: from });
        }
        match self.ops[from].fwd_link() {
            Some(existing) if existing == to => return Ok(false),
            Some(existing) => {
                return Err(StructuralError::LinkBranch { from, existing, to });
            }
            None => {}
        }
        if let Some(existing) = self.ops[to].bwd_link() {
            return Err(StructuralError::LinkMerge { to, existing, from });
        }
        self.insert_constraint(from, to)?;
        self.ops[from].set_fwd_link(to);
        self.ops[to].set_bwd_link(from);
        Ok(true)
    }

    /// Remove a constraint. Link constraints are never removed.
    pub(crate) fn remove_constraint(&mut self, from: OpAddress, to: OpAddress) -> bool {
        if self.ops[from].fwd_link() == Some(to) {
            return false;
        }
        let removed = self.ops[from].remove_out(to);
        self.ops[to].remove_in(from);
        removed
    }

    /// Make `op` a user of `alloc`. Returns false if it already was.
    pub(crate) fn connect_op_alloc(&mut self, op: OpAddress, alloc: AllocAddress) -> bool {
        self.allocs[alloc].insert_op(op);
        self.ops[op].insert_alloc(alloc)
    }

    /// Stop `op` using `alloc`. Returns false if it did not.
    pub(crate) fn disconnect_op_alloc(&mut self, op: OpAddress, alloc: AllocAddress) -> bool {
        self.allocs[alloc].remove_op(op);
        self.ops[op].remove_alloc(alloc)
    }

    /// Detach `alloc` from all of its ops. The alloc keeps its address and
    /// weight, and no longer counts towards liveness.
    pub(crate) fn disconnect_alloc(&mut self, alloc: AllocAddress) {
        for op in self.allocs[alloc].take_ops() {
            self.ops[op].remove_alloc(alloc);
        }
    }

    pub(crate) fn set_weight(&mut self, alloc: AllocAddress, weight: AllocWeight) {
        self.allocs[alloc].set_weight(weight);
    }

    pub fn set_priority(&mut self, op: OpAddress, priority: f64) -> Result<(), StructuralError> {
        self.check_op(op)?;
        self.ops[op].set_priority(priority);
        Ok(())
    }

    /// `edges[from]` lists the ops constrained to follow `from`.
    pub fn fwd_edges(&self) -> Vec<Vec<OpAddress>> {
        self.ops.iter().map(|op| op.outs().to_vec()).collect()
    }

    pub fn n_constraints(&self) -> usize {
        self.ops.iter().map(Op::n_ins).sum()
    }

    /// Ops with no constraints in.
    pub fn input_ops(&self) -> Vec<OpAddress> {
        self.ops
            .iter()
            .filter(|op| op.n_ins() == 0)
            .map(Op::address)
            .collect()
    }

    pub fn links(&self) -> Vec<(OpAddress, OpAddress)> {
        self.ops
            .iter()
            .filter_map(|op| op.fwd_link().map(|to| (op.address(), to)))
            .collect()
    }

    /// Constraints present now but absent from `previous`, a snapshot taken
    /// with [`Graph::fwd_edges`].
    pub fn constraint_diff(&self, previous: &[Vec<OpAddress>]) -> Vec<Vec<OpAddress>> {
        self.ops
            .iter()
            .map(|op| {
                let before = previous.get(op.address()).map(Vec::as_slice).unwrap_or(&[]);
                op.outs()
                    .iter()
                    .copied()
                    .filter(|to| before.binary_search(to).is_err())
                    .collect()
            })
            .collect()
    }

    fn check_op(&self, op: OpAddress) -> Result<(), StructuralError> {
        if op >= self.ops.len() {
            return Err(StructuralError::OpOutOfRange {
                op,
                n_ops: self.ops.len(),
            });
        }
        Ok(())
    }

    fn check_alloc(&self, alloc: AllocAddress) -> Result<(), StructuralError> {
        if alloc >= self.allocs.len() {
            return Err(StructuralError::AllocOutOfRange {
                alloc,
                n_allocs: self.allocs.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHasher;
    use std::hash::{Hash, Hasher};

    fn hash_of(g: &Graph) -> u64 {
        let mut h = FxHasher::default();
        g.hash(&mut h);
        h.finish()
    }

    fn diamond() -> Graph {
        let mut g = Graph::new();
        let a = g.insert_op(&[], "a").unwrap();
        let b = g.insert_op(&[a], "b").unwrap();
        let c = g.insert_op(&[a], "c").unwrap();
        g.insert_op(&[b, c], "d").unwrap();
        g
    }

    #[test]
    fn test_dense_addresses() {
        let g = diamond();
        assert_eq!(g.n_ops(), 4);
        assert_eq!(g.op(3).ins(), &[1, 2]);
        assert_eq!(g.op(0).outs(), &[1, 2]);
        assert_eq!(g.n_constraints(), 4);
        assert_eq!(g.input_ops(), vec![0]);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut g = diamond();
        assert_eq!(
            g.insert_constraint(0, 9),
            Err(StructuralError::OpOutOfRange { op: 9, n_ops: 4 })
        );
        assert_eq!(
            g.insert_op_alloc(&[0], 0),
            Err(StructuralError::AllocOutOfRange {
                alloc: 0,
                n_allocs: 0
            })
        );
        assert_eq!(
            g.insert_constraint(2, 2),
            Err(StructuralError::SelfConstraint { op: 2 })
        );
    }

    #[test]
    fn test_duplicate_constraint_is_noop() {
        let mut g = diamond();
        assert!(!g.insert_constraint(0, 1).unwrap());
        assert!(g.insert_constraint(1, 2).unwrap());
        assert_eq!(g.n_constraints(), 5);
    }

    #[test]
    fn test_duplicate_op_alloc_rejected() {
        let mut g = diamond();
        let alloc = g.insert_alloc(AllocWeight::from_value(1.0));
        g.insert_op_alloc(&[0, 3], alloc).unwrap();
        assert_eq!(g.alloc(alloc).ops(), &[0, 3]);
        assert_eq!(
            g.insert_op_alloc(&[3], alloc),
            Err(StructuralError::DuplicateOpAlloc { op: 3, alloc })
        );
    }

    #[test]
    fn test_links_form_chains() {
        let mut g = Graph::new();
        g.insert_ops(4);
        assert!(g.insert_link(0, 1).unwrap());
        assert!(!g.insert_link(0, 1).unwrap());
        assert!(g.op(0).has_out(1));
        assert_eq!(
            g.insert_link(0, 2),
            Err(StructuralError::LinkBranch {
                from: 0,
                existing: 1,
                to: 2
            })
        );
        assert_eq!(
            g.insert_link(3, 1),
            Err(StructuralError::LinkMerge {
                to: 1,
                existing: 0,
                from: 3
            })
        );
        assert_eq!(g.links(), vec![(0, 1)]);
    }

    #[test]
    fn test_link_constraint_survives_removal() {
        let mut g = Graph::new();
        g.insert_ops(3);
        g.insert_link(0, 1).unwrap();
        g.insert_constraint(0, 2).unwrap();
        assert!(!g.remove_constraint(0, 1));
        assert!(g.remove_constraint(0, 2));
        assert_eq!(g.op(0).outs(), &[1]);
        assert!(g.op(2).ins().is_empty());
    }

    #[test]
    fn test_constraint_diff() {
        let mut g = diamond();
        let before = g.fwd_edges();
        g.insert_constraint(1, 2).unwrap();
        let diff = g.constraint_diff(&before);
        assert_eq!(diff[1], vec![2]);
        assert!(diff[0].is_empty());
    }

    #[test]
    fn test_structural_equality_ignores_names() {
        let mut renamed = Graph::new();
        let a = renamed.insert_op(&[], "w").unwrap();
        let b = renamed.insert_op(&[a], "x").unwrap();
        let c = renamed.insert_op(&[a], "y").unwrap();
        renamed.insert_op(&[c, b], "z").unwrap();

        let g = diamond();
        assert_eq!(g, renamed);
        assert_eq!(hash_of(&g), hash_of(&renamed));

        renamed.insert_constraint(1, 2).unwrap();
        assert_ne!(g, renamed);
    }

    #[test]
    fn test_structural_equality_includes_weights() {
        let mut g0 = diamond();
        let mut g1 = diamond();
        let a0 = g0.insert_alloc(AllocWeight::from_value(1.0));
        let a1 = g1.insert_alloc(AllocWeight::from_value(1.0 + 1e-12));
        g0.insert_op_alloc(&[0, 1], a0).unwrap();
        g1.insert_op_alloc(&[0, 1], a1).unwrap();
        assert_ne!(g0, g1);
    }
}
