pub mod coder;
pub mod poa;
pub mod prune;
pub mod subgraph;
pub mod tools;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt::Debug;
use std::hash::Hash;

use petgraph::graph::{IndexType, NodeIndex};

pub trait NodeIndexType: Copy + Hash + PartialOrd + Ord + PartialEq + Eq + Debug + Default {
    fn index(&self) -> usize;
}

impl<Ix: IndexType> NodeIndexType for NodeIndex<Ix> {
    #[inline(always)]
    fn index(&self) -> usize {
        NodeIndex::index(*self)
    }
}

/// A graph view that sequence-to-graph aligners can consume.
pub trait AlignableGraph {
    type NodeIndex: NodeIndexType;
    type PredecessorIterator<'a>: Iterator<Item=Self::NodeIndex> + 'a
        where Self: 'a;

    fn node_count(&self) -> usize;

    /// Nodes in a valid topological order
    fn rank_order(&self) -> Vec<Self::NodeIndex>;

    fn predecessors(&self, node: Self::NodeIndex) -> Self::PredecessorIterator<'_>;

    /// True if the node has no outgoing edges
    fn is_end(&self, node: Self::NodeIndex) -> bool;

    fn get_symbol(&self, node: Self::NodeIndex) -> u8;
}
