//! Dense addresses for graphs keyed by sparse external ids.
//!
//! Callers often identify nodes by arbitrary integers. The scheduling core
//! works on contiguous `0..n` addresses, so this map keeps the bijection
//! between the two and translates edges and schedules across it.

use rustc_hash::FxHashMap;

use super::{Graph, OpAddress};
use crate::error::StructuralError;

/// Bijection between sparse ids and dense op addresses, plus the forward
/// edges expressed in dense addresses.
#[derive(Debug, Clone)]
pub struct FwdEdgeMap {
    to_compact: FxHashMap<u64, OpAddress>,
    to_sparse: Vec<u64>,
    fwd_edges_compact: Vec<Vec<OpAddress>>,
}

impl FwdEdgeMap {
    /// Create an empty map with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            to_compact: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            to_sparse: Vec::with_capacity(capacity),
            fwd_edges_compact: Vec::with_capacity(capacity),
        }
    }

    /// Build from `(id, successor ids)` entries. Every successor must itself
    /// appear as an entry. Repeated entries for one id are merged.
    pub fn new(fwd_edges: &[(u64, Vec<u64>)]) -> Result<Self, StructuralError> {
        let mut map = Self::with_capacity(fwd_edges.len());
        for (id, _) in fwd_edges {
            map.insert(*id);
        }
        for (id, outs) in fwd_edges {
            let from = map.to_compact[id];
            for out in outs {
                let to = map
                    .compact(*out)
                    .ok_or_else(|| StructuralError::UnknownId(out.to_string()))?;
                if !map.fwd_edges_compact[from].contains(&to) {
                    map.fwd_edges_compact[from].push(to);
                }
            }
        }
        Ok(map)
    }

    /// Register an id, returning its dense address.
    /// If already registered, returns the existing address.
    pub fn insert(&mut self, id: u64) -> OpAddress {
        if let Some(&address) = self.to_compact.get(&id) {
            return address;
        }
        let address = self.to_sparse.len();
        self.to_sparse.push(id);
        self.to_compact.insert(id, address);
        self.fwd_edges_compact.push(Vec::new());
        address
    }

    #[inline]
    pub fn compact(&self, id: u64) -> Option<OpAddress> {
        self.to_compact.get(&id).copied()
    }

    #[inline]
    pub fn sparse(&self, address: OpAddress) -> Option<u64> {
        self.to_sparse.get(address).copied()
    }

    pub fn fwd_edges_compact(&self) -> &[Vec<OpAddress>] {
        &self.fwd_edges_compact
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.to_sparse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_sparse.is_empty()
    }

    /// Translate a schedule of dense addresses back to sparse ids.
    pub fn remap_order(&self, order: &[OpAddress]) -> Result<Vec<u64>, StructuralError> {
        order
            .iter()
            .map(|&a| {
                self.sparse(a).ok_or(StructuralError::OpOutOfRange {
                    op: a,
                    n_ops: self.len(),
                })
            })
            .collect()
    }

    /// A graph with one op per id, named by the id.
    pub fn to_graph(&self) -> Result<Graph, StructuralError> {
        let mut graph = Graph::new();
        for id in &self.to_sparse {
            graph.insert_op(&[], id.to_string())?;
        }
        for (from, outs) in self.fwd_edges_compact.iter().enumerate() {
            for &to in outs {
                graph.insert_constraint(from, to)?;
            }
        }
        Ok(graph)
    }
}

impl Default for FwdEdgeMap {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_ids_become_dense() {
        let map = FwdEdgeMap::new(&[(100, vec![7, 42]), (7, vec![42]), (42, vec![])]).unwrap();

        assert_eq!(map.len(), 3);
        assert_eq!(map.compact(100), Some(0));
        assert_eq!(map.compact(7), Some(1));
        assert_eq!(map.compact(42), Some(2));
        assert_eq!(map.compact(5), None);
        assert_eq!(map.sparse(2), Some(42));
        assert_eq!(map.fwd_edges_compact(), &[vec![1, 2], vec![2], vec![]]);
        assert_eq!(map.remap_order(&[0, 1, 2]).unwrap(), vec![100, 7, 42]);
    }

    #[test]
    fn test_unknown_successor_rejected() {
        let err = FwdEdgeMap::new(&[(1, vec![2])]).unwrap_err();
        assert_eq!(err, StructuralError::UnknownId("2".to_string()));
    }

    #[test]
    fn test_to_graph() {
        let map = FwdEdgeMap::new(&[(10, vec![20]), (20, vec![])]).unwrap();
        let graph = map.to_graph().unwrap();
        assert_eq!(graph.n_ops(), 2);
        assert_eq!(graph.op(0).outs(), &[1]);
        assert_eq!(graph.op(1).name(), "20");
    }
}
