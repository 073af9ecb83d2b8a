//! Confidence based edge pruning and connected component extraction.

use itertools::Itertools;
use petgraph::visit::{EdgeRef, NodeIndexable};
use petgraph::Incoming;
use tracing::debug;

use crate::graphs::poa::{POAEdgeData, POAEdgeIndex, POAGraph};
use crate::graphs::tools::connected_components;

impl POAGraph {
    fn keep_edge(
        &self,
        edge: POAEdgeIndex,
        min_weight: i64,
        min_confidence: f64,
        min_support: f64,
        average_weight: Option<f64>,
    ) -> bool {
        let Some((tail, head)) = self.graph.edge_endpoints(edge) else {
            return false;
        };
        let weight = self.graph[edge].weight;

        if weight < min_weight {
            return false;
        }

        let out_total: i64 = self.graph.edges(tail).map(|e| e.weight().weight).sum();
        let in_total: i64 = self.graph.edges_directed(head, Incoming).map(|e| e.weight().weight).sum();

        let ratio = |total: i64| if total > 0 { weight as f64 / total as f64 } else { 0.0 };
        let confidence_out = ratio(out_total);
        let confidence_in = ratio(in_total);

        // Each edge weight combines the weights of its two adjacent bases
        let support = match average_weight {
            Some(avg) if avg > 0.0 => weight as f64 / (2.0 * avg),
            _ => 1.0,
        };

        confidence_out >= min_confidence && confidence_in >= min_confidence && support >= min_support
    }

    /// Remove all edges that are too light, or that carry too little of the weight leaving their
    /// tail or entering their head. Nodes are kept. Returns the number of removed edges.
    pub fn prune_graph(
        &mut self,
        min_weight: i64,
        min_confidence: f64,
        min_support: f64,
        average_weight: Option<f64>,
    ) -> usize {
        let to_remove: Vec<POAEdgeIndex> = self.graph.edge_indices()
            .filter(|e| !self.keep_edge(*e, min_weight, min_confidence, min_support, average_weight))
            .collect();

        for e in &to_remove {
            self.graph.remove_edge(*e);
        }

        if !to_remove.is_empty() {
            self.clear_consensus();
        }

        debug!(
            removed = to_remove.len(),
            remaining = self.graph.edge_count(),
            min_weight, min_confidence, min_support,
            "Pruned POA graph"
        );

        to_remove.len()
    }

    /// Copy the largest weakly connected component into a new graph.
    ///
    /// Nodes keep their relative order. Edges are copied with zero weight and without labels, so
    /// their weights can be re-accumulated with [`POAGraph::add_weights`]. Alignment columns are
    /// restricted to the copied nodes. The new graph has no recorded sequences.
    pub fn largest_subgraph(&self) -> POAGraph {
        let mut subgraph = self.with_coder_of();

        // On ties, the later component wins
        let Some(largest) = connected_components(&self.graph).into_iter()
            .max_by_key(|c| c.len())
        else {
            return subgraph;
        };

        let mut mapping = vec![None; self.graph.node_bound()];
        for node in &largest {
            let new_node = subgraph.add_node(self.graph[*node].code);
            mapping[node.index()] = Some(new_node);

            let partner = self.aligned_nodes(*node).find_map(|other| mapping[other.index()]);
            if let Some(p) = partner {
                subgraph.join_column(new_node, p);
            }
        }

        for node in &largest {
            let edges = self.graph.edges(*node)
                .sorted_unstable_by_key(|e| e.id());

            for e in edges {
                if let (Some(tail), Some(head)) = (mapping[node.index()], mapping[e.target().index()]) {
                    subgraph.graph.add_edge(tail, head, POAEdgeData::unlabelled(0));
                }
            }
        }

        subgraph.topological_sort();

        debug!(
            nodes = subgraph.node_count(),
            edges = subgraph.edge_count(),
            original_nodes = self.node_count(),
            "Extracted largest connected component"
        );

        subgraph
    }
}
