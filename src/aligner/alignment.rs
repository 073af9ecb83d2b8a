use crate::graphs::{AlignableGraph, NodeIndexType};

/// A single column of a sequence-to-graph alignment.
///
/// In case of an insertion or deletion, one of the two elements is `None`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AlignedPair<N>
where
    N: NodeIndexType
{
    /// Graph node
    pub node: Option<N>,

    /// Query sequence position
    pub qpos: Option<usize>
}

impl<N> AlignedPair<N>
where
    N: NodeIndexType
{
    pub fn new(node: Option<N>, qpos: Option<usize>) -> Self {
        Self { node, qpos }
    }

    pub fn is_aligned(&self) -> bool {
        matches!((self.node, self.qpos), (Some(_), Some(_)))
    }

    pub fn is_indel(&self) -> bool {
        !self.is_aligned()
    }
}

pub type Alignment<N> = Vec<AlignedPair<N>>;

/// Render an alignment as three lines of text: graph residues, match markers and query residues.
pub fn print_alignment<G>(graph: &G, seq: &[u8], aln: &[AlignedPair<G::NodeIndex>]) -> String
where
    G: AlignableGraph,
{
    let mut graph_chars = Vec::with_capacity(aln.len());
    let mut aln_chars = Vec::with_capacity(aln.len());
    let mut query_chars = Vec::with_capacity(aln.len());

    for pair in aln {
        match (pair.node, pair.qpos) {
            (Some(node), Some(qpos)) => {
                let symbol = graph.get_symbol(node);
                graph_chars.push(symbol);
                aln_chars.push(if symbol == seq[qpos] { b'|' } else { b'*' });
                query_chars.push(seq[qpos]);
            },
            (Some(node), None) => {
                graph_chars.push(graph.get_symbol(node));
                aln_chars.push(b' ');
                query_chars.push(b'-');
            },
            (None, Some(qpos)) => {
                graph_chars.push(b'-');
                aln_chars.push(b' ');
                query_chars.push(seq[qpos]);
            },
            (None, None) => (),
        }
    }

    format!(
        "{}\n{}\n{}",
        String::from_utf8_lossy(&graph_chars),
        String::from_utf8_lossy(&aln_chars),
        String::from_utf8_lossy(&query_chars),
    )
}

#[cfg(test)]
mod tests {
    use petgraph::graph::NodeIndex;

    use crate::graphs::mock::create_linear_graph;
    use super::{print_alignment, AlignedPair};

    #[test]
    fn test_print_alignment() {
        let graph = create_linear_graph(b"ACGT");
        let n = |i: usize| Some(NodeIndex::<u32>::new(i));

        let aln = vec![
            AlignedPair::new(n(0), Some(0)),
            AlignedPair::new(n(1), Some(1)),
            AlignedPair::new(None, Some(2)),
            AlignedPair::new(n(2), Some(3)),
            AlignedPair::new(n(3), None),
        ];

        assert!(aln[2].is_indel());
        assert!(aln[3].is_aligned());
        assert_eq!(print_alignment(&graph, b"ACTC", &aln), "AC-GT\n|| * \nACTC-");
    }
}
