pub mod alignment;
pub mod linear;

use serde::{Deserialize, Serialize};

use crate::errors::PoaError;
use crate::graphs::AlignableGraph;

pub use alignment::{AlignedPair, Alignment};
pub use linear::LinearGapAligner;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlignmentType {
    /// Both the query and a full source-to-sink path of the graph are aligned end to end
    #[default]
    Global,

    /// Smith-Waterman style: the best scoring pair of a query substring and a graph path
    Local,

    /// The whole query is aligned, but it may start and end anywhere in the graph
    SemiGlobal,
}

/// Aligns a sequence to a graph.
///
/// An empty graph yields an empty alignment. Otherwise, the alignment lists every query position
/// and every node on the aligned graph path in order, using `None` for gaps.
pub trait GraphAligner {
    fn align<G, S>(&self, graph: &G, seq: S) -> Result<Alignment<G::NodeIndex>, PoaError>
    where
        G: AlignableGraph,
        S: AsRef<[u8]>;
}
