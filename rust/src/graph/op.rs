//! A single schedulable operation.

use std::hash::{Hash, Hasher};

use super::{AllocAddress, OpAddress};

/// An operation: its constraints, link neighbours and allocations.
///
/// `ins`, `outs` and `allocs` are kept sorted and free of duplicates so that
/// two ops with the same constraints compare equal regardless of insertion
/// order.
#[derive(Clone, Debug)]
pub struct Op {
    address: OpAddress,
    /// Ops which must be scheduled before this one.
    ins: Vec<OpAddress>,
    /// Ops which must be scheduled after this one.
    outs: Vec<OpAddress>,
    allocs: Vec<AllocAddress>,
    /// The op which must immediately follow this one.
    fwd_link: Option<OpAddress>,
    /// The op which must immediately precede this one.
    bwd_link: Option<OpAddress>,
    /// Tie-break priority, higher is scheduled earlier.
    priority: f64,
    /// Debug name, ignored by equality and hashing.
    name: String,
}

impl Op {
    pub(crate) fn new(address: OpAddress, name: String) -> Self {
        Self {
            address,
            ins: Vec::new(),
            outs: Vec::new(),
            allocs: Vec::new(),
            fwd_link: None,
            bwd_link: None,
            priority: 0.0,
            name,
        }
    }

    #[inline]
    pub fn address(&self) -> OpAddress {
        self.address
    }

    #[inline]
    pub fn ins(&self) -> &[OpAddress] {
        &self.ins
    }

    #[inline]
    pub fn outs(&self) -> &[OpAddress] {
        &self.outs
    }

    #[inline]
    pub fn allocs(&self) -> &[AllocAddress] {
        &self.allocs
    }

    pub fn n_ins(&self) -> usize {
        self.ins.len()
    }

    pub fn n_outs(&self) -> usize {
        self.outs.len()
    }

    pub fn has_in(&self, op: OpAddress) -> bool {
        self.ins.binary_search(&op).is_ok()
    }

    pub fn has_out(&self, op: OpAddress) -> bool {
        self.outs.binary_search(&op).is_ok()
    }

    pub fn has_alloc(&self, alloc: AllocAddress) -> bool {
        self.allocs.binary_search(&alloc).is_ok()
    }

    pub fn fwd_link(&self) -> Option<OpAddress> {
        self.fwd_link
    }

    pub fn bwd_link(&self) -> Option<OpAddress> {
        self.bwd_link
    }

    pub fn has_fwd_link(&self) -> bool {
        self.fwd_link.is_some()
    }

    pub fn has_bwd_link(&self) -> bool {
        self.bwd_link.is_some()
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn insert_in(&mut self, op: OpAddress) -> bool {
        insert_sorted(&mut self.ins, op)
    }

    pub(crate) fn insert_out(&mut self, op: OpAddress) -> bool {
        insert_sorted(&mut self.outs, op)
    }

    pub(crate) fn remove_in(&mut self, op: OpAddress) -> bool {
        remove_sorted(&mut self.ins, op)
    }

    pub(crate) fn remove_out(&mut self, op: OpAddress) -> bool {
        remove_sorted(&mut self.outs, op)
    }

    pub(crate) fn insert_alloc(&mut self, alloc: AllocAddress) -> bool {
        insert_sorted(&mut self.allocs, alloc)
    }

    pub(crate) fn remove_alloc(&mut self, alloc: AllocAddress) -> bool {
        remove_sorted(&mut self.allocs, alloc)
    }

    pub(crate) fn set_fwd_link(&mut self, op: OpAddress) {
        self.fwd_link = Some(op);
    }

    pub(crate) fn set_bwd_link(&mut self, op: OpAddress) {
        self.bwd_link = Some(op);
    }

    pub(crate) fn set_priority(&mut self, priority: f64) {
        self.priority = priority;
    }
}

/// Insert into a sorted vector, returning false if already present.
pub(crate) fn insert_sorted<T: Ord>(v: &mut Vec<T>, x: T) -> bool {
    match v.binary_search(&x) {
        Ok(_) => false,
        Err(pos) => {
            v.insert(pos, x);
            true
        }
    }
}

pub(crate) fn remove_sorted<T: Ord>(v: &mut Vec<T>, x: T) -> bool {
    match v.binary_search(&x) {
        Ok(pos) => {
            v.remove(pos);
            true
        }
        Err(_) => false,
    }
}

impl PartialEq for Op {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
            && self.ins == other.ins
            && self.outs == other.outs
            && self.allocs == other.allocs
            && self.fwd_link == other.fwd_link
            && self.bwd_link == other.bwd_link
            && self.priority.to_bits() == other.priority.to_bits()
    }
}

impl Eq for Op {}

impl Hash for Op {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.ins.hash(state);
        self.outs.hash(state);
        self.allocs.hash(state);
        self.fwd_link.hash(state);
        self.bwd_link.hash(state);
        self.priority.to_bits().hash(state);
    }
}
