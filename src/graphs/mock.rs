//! A module containing a mock graph struct useful for creating
//! test graphs in unit tests

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, Neighbors, NodeIndex};
use petgraph::Incoming;

use crate::graphs::AlignableGraph;

pub(crate) type NIx = u32;

/// Nodes carry their residue
pub(crate) type MockGraph = DiGraph<u8, (), NIx>;

impl AlignableGraph for MockGraph {
    type NodeIndex = NodeIndex<NIx>;

    type PredecessorIterator<'a> = Neighbors<'a, (), NIx>
        where Self: 'a;

    fn node_count(&self) -> usize {
        self.node_count()
    }

    fn rank_order(&self) -> Vec<Self::NodeIndex> {
        toposort(self, None).unwrap()
    }

    fn predecessors(&self, node: Self::NodeIndex) -> Self::PredecessorIterator<'_> {
        self.neighbors_directed(node, Incoming)
    }

    fn is_end(&self, node: Self::NodeIndex) -> bool {
        self.neighbors(node).next().is_none()
    }

    fn get_symbol(&self, node: Self::NodeIndex) -> u8 {
        self[node]
    }
}

pub(crate) fn create_linear_graph(seq: &[u8]) -> MockGraph {
    let mut g = MockGraph::default();

    let mut prev = None;
    for c in seq {
        let nix = g.add_node(*c);
        if let Some(p) = prev {
            g.add_edge(p, nix, ());
        }

        prev = Some(nix);
    }

    g
}

/// A graph with a single bubble, spelling ACGTCG and ACGACG
pub(crate) fn create_bubble_graph() -> MockGraph {
    let mut g = MockGraph::default();

    let nodes: Vec<_> = b"ACGTACG".iter()
        .map(|c| g.add_node(*c))
        .collect();

    let edges = [
        (0, 1),
        (1, 2),
        (2, 3),
        (2, 4),
        (3, 5),
        (4, 5),
        (5, 6),
    ];

    for (s, t) in edges.iter() {
        g.add_edge(nodes[*s], nodes[*t], ());
    }

    g
}
