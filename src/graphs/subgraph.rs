use itertools::Itertools;
use petgraph::visit::{EdgeRef, NodeIndexable};
use petgraph::Incoming;

use crate::aligner::alignment::Alignment;
use crate::errors::PoaError;
use crate::graphs::poa::{POAGraph, POANodeIndex};

impl POAGraph {
    /// Extract the part of the graph between node `begin` and node `end`: all nodes with an index
    /// of at least `begin` from which `end` can be reached, following edges backwards and
    /// alignment columns.
    ///
    /// Returns the subgraph along with a mapping from subgraph node to original node.
    pub fn subgraph(&self, begin: usize, end: usize) -> Result<(POAGraph, Vec<POANodeIndex>), PoaError> {
        let bound = self.graph.node_bound();
        if begin >= bound {
            return Err(PoaError::InvalidNode(begin));
        }

        let end_node = POANodeIndex::new(end);
        if !self.graph.contains_node(end_node) {
            return Err(PoaError::InvalidNode(end));
        }

        let mut in_subgraph = vec![false; bound];
        let mut stack = vec![end_node];
        while let Some(node) = stack.pop() {
            if in_subgraph[node.index()] || node.index() < begin {
                continue;
            }

            in_subgraph[node.index()] = true;
            stack.extend(self.graph.neighbors_directed(node, Incoming));
            stack.extend(self.aligned_nodes(node));
        }

        let mut subgraph = self.with_coder_of();
        let mut to_subgraph = vec![None; bound];
        let mut mapping = Vec::new();

        for node in self.graph.node_indices().filter(|n| in_subgraph[n.index()]) {
            let new_node = subgraph.add_node(self.graph[node].code);
            to_subgraph[node.index()] = Some(new_node);
            mapping.push(node);

            let partner = self.aligned_nodes(node).find_map(|other| to_subgraph[other.index()]);
            if let Some(p) = partner {
                subgraph.join_column(new_node, p);
            }
        }

        for &node in &mapping {
            let inedges = self.graph.edges_directed(node, Incoming)
                .sorted_unstable_by_key(|e| e.id());

            for e in inedges {
                if let (Some(tail), Some(head)) = (to_subgraph[e.source().index()], to_subgraph[node.index()]) {
                    subgraph.graph.add_edge(tail, head, e.weight().clone());
                }
            }
        }

        subgraph.topological_sort();

        Ok((subgraph, mapping))
    }
}

/// Translate the node indices of an alignment against a subgraph to node indices of the graph it
/// was extracted from.
pub fn update_alignment(mapping: &[POANodeIndex], alignment: &mut Alignment<POANodeIndex>) {
    for pair in alignment.iter_mut() {
        if let Some(node) = pair.node {
            pair.node = Some(mapping[node.index()]);
        }
    }
}
