//! Partitioning of a graph into weakly connected components.

use crate::graph::OpAddress;

/// The disjoint subgraphs of a graph. Each node has a global id in the full
/// graph and a local id within its component.
#[derive(Clone, Debug)]
pub struct ConnectedComponents {
    /// Global id -> (component, local id).
    to_local: Vec<(usize, usize)>,
    /// Component -> local id -> global id.
    to_global: Vec<Vec<OpAddress>>,
    /// Component -> local forward edges.
    components: Vec<Vec<Vec<usize>>>,
}

impl ConnectedComponents {
    /// Partition by connectivity, ignoring edge direction. `edges[a]` lists
    /// the successors of `a`; all must be below `edges.len()`. Components are
    /// numbered by their lowest global id, and local ids follow global order.
    pub fn new(edges: &[Vec<OpAddress>]) -> Self {
        let n = edges.len();
        let mut undirected: Vec<Vec<OpAddress>> = vec![Vec::new(); n];
        for (from, outs) in edges.iter().enumerate() {
            for &to in outs {
                undirected[from].push(to);
                undirected[to].push(from);
            }
        }

        const UNSET: usize = usize::MAX;
        let mut component_of = vec![UNSET; n];
        let mut n_components = 0;
        for start in 0..n {
            if component_of[start] != UNSET {
                continue;
            }
            component_of[start] = n_components;
            let mut stack = vec![start];
            while let Some(x) = stack.pop() {
                for &y in &undirected[x] {
                    if component_of[y] == UNSET {
                        component_of[y] = n_components;
                        stack.push(y);
                    }
                }
            }
            n_components += 1;
        }

        let mut to_global: Vec<Vec<OpAddress>> = vec![Vec::new(); n_components];
        let mut to_local = Vec::with_capacity(n);
        for (global, &c) in component_of.iter().enumerate() {
            to_local.push((c, to_global[c].len()));
            to_global[c].push(global);
        }

        let mut components: Vec<Vec<Vec<usize>>> = to_global
            .iter()
            .map(|nodes| vec![Vec::new(); nodes.len()])
            .collect();
        for (from, outs) in edges.iter().enumerate() {
            let (c, local_from) = to_local[from];
            for &to in outs {
                components[c][local_from].push(to_local[to].1);
            }
        }

        Self {
            to_local,
            to_global,
            components,
        }
    }

    pub fn n_components(&self) -> usize {
        self.to_global.len()
    }

    pub fn n_nodes(&self, component: usize) -> usize {
        self.to_global[component].len()
    }

    /// Forward edges of a component, in local ids.
    pub fn component(&self, component: usize) -> &[Vec<usize>] {
        &self.components[component]
    }

    pub fn component_id(&self, global: OpAddress) -> usize {
        self.to_local[global].0
    }

    pub fn local_id(&self, global: OpAddress) -> usize {
        self.to_local[global].1
    }

    pub fn global_id(&self, component: usize, local: usize) -> OpAddress {
        self.to_global[component][local]
    }

    /// Global ids of a component's nodes, ascending.
    pub fn nodes(&self, component: usize) -> &[OpAddress] {
        &self.to_global[component]
    }
}
