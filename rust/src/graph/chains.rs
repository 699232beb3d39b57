//! Tight pairs, chains and chain merging.

use super::{Graph, OpAddress};

/// A graph built by merging chains of a parent graph.
#[derive(Clone, Debug)]
pub struct Merged {
    pub child: Graph,
    /// For every child op, the parent ops it stands for, in chain order.
    pub child_to_parents: Vec<Vec<OpAddress>>,
}

impl Graph {
    /// Pairs `(a, b)` where `b` is the only op after `a` and `a` the only op
    /// before `b`.
    pub fn tight_pairs(&self) -> Vec<(OpAddress, OpAddress)> {
        self.ops()
            .iter()
            .filter(|op| op.n_outs() == 1 && self.op(op.outs()[0]).n_ins() == 1)
            .map(|op| (op.address(), op.outs()[0]))
            .collect()
    }

    /// The longest chain of tight pairs starting at `a`.
    pub fn tight_chain_from(&self, a: OpAddress) -> Vec<OpAddress> {
        let mut chain = vec![a];
        let mut current = a;
        loop {
            let op = self.op(current);
            if op.n_outs() != 1 {
                break;
            }
            let next = op.outs()[0];
            if self.op(next).n_ins() != 1 || next == a {
                break;
            }
            chain.push(next);
            current = next;
        }
        chain
    }

    /// Every maximal link chain with at least two ops, from its head.
    pub fn link_chains(&self) -> Vec<Vec<OpAddress>> {
        let mut chains = Vec::new();
        for op in self.ops() {
            if !op.has_fwd_link() || op.has_bwd_link() {
                continue;
            }
            let mut chain = vec![op.address()];
            let mut current = op.address();
            while let Some(next) = self.op(current).fwd_link() {
                chain.push(next);
                current = next;
            }
            chains.push(chain);
        }
        chains
    }

    /// First op of the link chain through `a`.
    pub fn link_chain_head(&self, a: OpAddress) -> OpAddress {
        let mut current = a;
        while let Some(prev) = self.op(current).bwd_link() {
            current = prev;
        }
        current
    }

    /// Last op of the link chain through `a`.
    pub fn link_chain_tail(&self, a: OpAddress) -> OpAddress {
        let mut current = a;
        while let Some(next) = self.op(current).fwd_link() {
            current = next;
        }
        current
    }

    /// All ops with exactly the same ins as `a` (including `a`). For an op
    /// without ins this is every input op.
    pub fn identical_ins(&self, a: OpAddress) -> Vec<OpAddress> {
        let ins = self.op(a).ins();
        let Some(&in0) = ins.first() else {
            return self.input_ops();
        };
        self.op(in0)
            .outs()
            .iter()
            .copied()
            .filter(|&out| self.op(out).ins() == ins)
            .collect()
    }

    /// Merge each chain into a single op.
    ///
    /// Chained ops take the lowest child addresses, in the order given; the
    /// remaining ops follow in address order. A child op inherits the union
    /// of its parents' allocs and constraints, minus those internal to the
    /// chain. Its priority is the mean of its parents' non-zero priorities.
    /// Links are not carried over, so `chains` should cover every link.
    pub fn merged(&self, chains: &[Vec<OpAddress>]) -> Merged {
        const NONE: OpAddress = OpAddress::MAX;

        let mut child = Graph::new();
        for alloc in self.allocs() {
            child.insert_alloc(alloc.weight());
        }

        let mut parent_to_child = vec![NONE; self.n_ops()];
        let mut child_to_parents: Vec<Vec<OpAddress>> = Vec::with_capacity(self.n_ops());
        for chain in chains {
            for &p in chain {
                parent_to_child[p] = child_to_parents.len();
            }
            child_to_parents.push(chain.clone());
        }
        for p in 0..self.n_ops() {
            if parent_to_child[p] == NONE {
                parent_to_child[p] = child_to_parents.len();
                child_to_parents.push(vec![p]);
            }
        }

        for parents in &child_to_parents {
            let name = parents
                .iter()
                .map(|&p| self.op(p).name())
                .collect::<Vec<_>>()
                .join("+");
            let address = child.ops.len();
            child.ops.push(super::Op::new(address, name));

            let priorities: Vec<f64> = parents
                .iter()
                .map(|&p| self.op(p).priority())
                .filter(|&x| x != 0.0)
                .collect();
            if !priorities.is_empty() {
                let mean = priorities.iter().sum::<f64>() / priorities.len() as f64;
                child.ops[address].set_priority(mean);
            }
        }

        for (c, parents) in child_to_parents.iter().enumerate() {
            for &p in parents {
                for &out in self.op(p).outs() {
                    let to = parent_to_child[out];
                    if to != c {
                        child.ops[c].insert_out(to);
                        child.ops[to].insert_in(c);
                    }
                }
                for &alloc in self.op(p).allocs() {
                    if child.ops[c].insert_alloc(alloc) {
                        child.allocs[alloc].insert_op(c);
                    }
                }
            }
        }

        Merged {
            child,
            child_to_parents,
        }
    }
}
