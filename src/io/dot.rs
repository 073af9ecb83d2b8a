use std::fmt;

use petgraph::dot::Dot;
use rustc_hash::FxHashSet;

use crate::graphs::poa::{POAGraph, POANodeIndex};

/// Render the graph in Graphviz DOT format. Nodes on the most recently computed consensus path
/// are highlighted.
pub fn format_as_dot(writer: &mut impl fmt::Write, graph: &POAGraph) -> fmt::Result {
    let consensus: FxHashSet<_> = graph.consensus_path().iter().copied().collect();

    let transformed = graph.graph.map(
        |ix, data| format!("{} - {}", ix.index(), char::from(graph.decode(data.code))),
        |_, data| format!("{}, {:?}", data.weight, data.labels.as_slice()),
    );

    let edge_attrs = |_, _| String::new();
    let node_attrs = |_, (ix, _): (POANodeIndex, &String)| {
        if consensus.contains(&ix) {
            "style=filled, fillcolor=\"#cfe2f3\"".to_string()
        } else {
            String::new()
        }
    };

    let dot = Dot::with_attr_getters(&transformed, &[], &edge_attrs, &node_attrs);

    writeln!(writer, "{}", dot)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::aligner::alignment::Alignment;
    use crate::graphs::poa::POAGraph;

    #[test]
    fn test_format_as_dot() {
        let mut graph = POAGraph::new();
        graph.add_alignment_with_weight(&Alignment::new(), b"ACG", 1).unwrap();
        graph.generate_consensus();

        let dot = graph.to_string();
        assert!(dot.starts_with("digraph {"));
        assert!(dot.contains("label = \"0 - A\""));
        assert!(dot.contains("label = \"2, [0]\""));
        assert!(dot.contains("fillcolor"));
    }
}
