//! A weighted allocation shared by a set of ops.

use super::{AllocAddress, OpAddress};
use crate::weight::AllocWeight;

/// An allocation is live from the first to the last of its ops.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Alloc {
    address: AllocAddress,
    weight: AllocWeight,
    /// Sorted, unique.
    ops: Vec<OpAddress>,
}

impl Alloc {
    pub(crate) fn new(address: AllocAddress, weight: AllocWeight) -> Self {
        Self {
            address,
            weight,
            ops: Vec::new(),
        }
    }

    pub fn address(&self) -> AllocAddress {
        self.address
    }

    pub fn weight(&self) -> AllocWeight {
        self.weight
    }

    pub fn ops(&self) -> &[OpAddress] {
        &self.ops
    }

    pub fn n_ops(&self) -> usize {
        self.ops.len()
    }

    pub(crate) fn insert_op(&mut self, op: OpAddress) -> bool {
        super::op::insert_sorted(&mut self.ops, op)
    }

    pub(crate) fn remove_op(&mut self, op: OpAddress) -> bool {
        super::op::remove_sorted(&mut self.ops, op)
    }

    pub(crate) fn take_ops(&mut self) -> Vec<OpAddress> {
        std::mem::take(&mut self.ops)
    }

    pub(crate) fn set_weight(&mut self, weight: AllocWeight) {
        self.weight = weight;
    }
}
