use petgraph::visit::{IntoNeighborsDirected, IntoNodeIdentifiers, NodeIndexable};
use petgraph::{Incoming, Outgoing};

/// Find the weakly connected components of a directed graph.
///
/// Uses an explicit stack instead of recursion, so long linear chains do not overflow the call
/// stack. Components are returned in order of their smallest node, and each component is sorted
/// by node index.
pub fn connected_components<G>(graph: G) -> Vec<Vec<G::NodeId>>
where
    G: IntoNeighborsDirected + IntoNodeIdentifiers + NodeIndexable,
{
    let mut visited = vec![false; graph.node_bound()];
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for start in graph.node_identifiers() {
        if visited[graph.to_index(start)] {
            continue;
        }

        let mut component = Vec::new();
        visited[graph.to_index(start)] = true;
        stack.push(start);

        while let Some(node) = stack.pop() {
            component.push(node);

            let neighbors = graph.neighbors_directed(node, Incoming)
                .chain(graph.neighbors_directed(node, Outgoing));

            for other in neighbors {
                if !visited[graph.to_index(other)] {
                    visited[graph.to_index(other)] = true;
                    stack.push(other);
                }
            }
        }

        component.sort_unstable_by_key(|n| graph.to_index(*n));
        components.push(component);
    }

    components
}

#[cfg(test)]
mod tests {
    use petgraph::graph::{DiGraph, NodeIndex};

    use super::connected_components;

    #[test]
    fn test_connected_components() {
        let graph = DiGraph::<u8, (), u32>::from_edges([
            (0, 1), (2, 1), (3, 4), (5, 4), (5, 6),
        ]);

        let components = connected_components(&graph);
        let as_ix: Vec<Vec<usize>> = components.iter()
            .map(|c| c.iter().map(|n: &NodeIndex<u32>| n.index()).collect())
            .collect();

        assert_eq!(as_ix, vec![vec![0, 1, 2], vec![3, 4, 5, 6]]);
    }

    #[test]
    fn test_long_chain() {
        let edges: Vec<(u32, u32)> = (0..100_000).map(|i| (i, i + 1)).collect();
        let graph = DiGraph::<u8, (), u32>::from_edges(edges);

        let components = connected_components(&graph);
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].len(), 100_001);
    }
}
