use std::fmt::{Display, Formatter};

use itertools::Itertools;
use petgraph::prelude::{EdgeIndex, NodeIndex, StableDiGraph};
use petgraph::stable_graph::Neighbors;
use petgraph::visit::{EdgeRef, NodeIndexable};
use petgraph::Incoming;
use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};
use tracing::{debug, warn};

use crate::aligner::alignment::{AlignedPair, Alignment};
use crate::errors::PoaError;
use crate::graphs::coder::Coder;
use crate::graphs::AlignableGraph;
use crate::io::dot::format_as_dot;

pub type POANodeIndex = NodeIndex<u32>;
pub type POAEdgeIndex = EdgeIndex<u32>;

#[derive(Debug, Clone)]
pub struct POANodeData {
    pub code: u8,

    /// Nodes sharing a column id are aligned to each other
    pub column: usize,
}

#[derive(Debug, Clone)]
pub struct POAEdgeData {
    pub weight: i64,

    /// Labels of the sequences traversing this edge
    pub labels: SmallVec<[usize; 4]>,
}

impl POAEdgeData {
    fn new(label: usize, weight: i64) -> Self {
        POAEdgeData {
            weight,
            labels: smallvec![label],
        }
    }

    pub(crate) fn unlabelled(weight: i64) -> Self {
        POAEdgeData {
            weight,
            labels: SmallVec::new(),
        }
    }
}

pub type POAGraphType = StableDiGraph<POANodeData, POAEdgeData, u32>;

/// Convert a Phred+33 quality string to per-base weights.
pub fn phred_weights(quality: &[u8]) -> Vec<u32> {
    quality.iter()
        .map(|q| u32::from(q.saturating_sub(33)))
        .collect()
}

/// A partial order alignment graph.
///
/// Nodes are never removed, so node indices are dense and stable for the lifetime of the graph.
/// Edges are only removed by pruning.
#[derive(Debug, Clone, Default)]
pub struct POAGraph {
    pub(crate) graph: POAGraphType,
    pub(crate) coder: Coder,
    pub(crate) columns: Vec<Vec<POANodeIndex>>,
    sequences: Vec<POANodeIndex>,
    rank_to_node: Vec<POANodeIndex>,
    consensus: Vec<POANodeIndex>,
}

impl POAGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph sharing the residue coder of `self`
    pub(crate) fn with_coder_of(&self) -> Self {
        POAGraph {
            coder: self.coder.clone(),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn num_codes(&self) -> usize {
        self.coder.num_codes()
    }

    pub fn decode(&self, code: u8) -> u8 {
        self.coder.decode(code)
    }

    pub fn residue(&self, node: POANodeIndex) -> u8 {
        self.coder.decode(self.graph[node].code)
    }

    /// Entry node of each inserted sequence, indexed by sequence label
    pub fn sequences(&self) -> &[POANodeIndex] {
        &self.sequences
    }

    pub fn rank_to_node(&self) -> &[POANodeIndex] {
        &self.rank_to_node
    }

    /// Nodes of the most recently computed consensus path
    pub fn consensus_path(&self) -> &[POANodeIndex] {
        &self.consensus
    }

    pub(crate) fn clear_consensus(&mut self) {
        self.consensus.clear();
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn add_node(&mut self, code: u8) -> POANodeIndex {
        let column = self.columns.len();
        let node = self.graph.add_node(POANodeData { code, column });
        self.columns.push(vec![node]);

        node
    }

    /// Add a node that joins the alignment column of `partner`
    fn add_aligned_node(&mut self, code: u8, partner: POANodeIndex) -> POANodeIndex {
        let column = self.graph[partner].column;
        let node = self.graph.add_node(POANodeData { code, column });
        self.columns[column].push(node);

        node
    }

    pub(crate) fn join_column(&mut self, node: POANodeIndex, partner: POANodeIndex) {
        let from = self.graph[node].column;
        let to = self.graph[partner].column;
        if from == to {
            return;
        }

        let moved = std::mem::take(&mut self.columns[from]);
        for n in &moved {
            self.graph[*n].column = to;
        }
        self.columns[to].extend(moved);
    }

    /// Other nodes in the same alignment column as `node`
    pub fn aligned_nodes(&self, node: POANodeIndex) -> impl Iterator<Item=POANodeIndex> + '_ {
        self.columns[self.graph[node].column].iter()
            .copied()
            .filter(move |n| *n != node)
    }

    /// Add an edge, or accumulate weight and label if it exists already. The label is the id of
    /// the sequence currently being inserted.
    pub fn add_edge(&mut self, tail: POANodeIndex, head: POANodeIndex, weight: i64) {
        let label = self.sequences.len();

        if let Some(e) = self.graph.find_edge(tail, head) {
            let edge_data = &mut self.graph[e];
            edge_data.weight += weight;
            edge_data.labels.push(label);
        } else {
            self.graph.add_edge(tail, head, POAEdgeData::new(label, weight));
        }
    }

    /// Add weight to an edge, creating it without labels if needed. Used for weights of sequences
    /// that are not part of the graph.
    fn add_edge_weight(&mut self, tail: POANodeIndex, head: POANodeIndex, weight: i64) {
        if let Some(e) = self.graph.find_edge(tail, head) {
            self.graph[e].weight += weight;
        } else {
            self.graph.add_edge(tail, head, POAEdgeData::unlabelled(weight));
        }
    }

    /// Add a linear chain of nodes for `sequence[begin..end]`. Returns the first and last node of
    /// the chain, or `None` if the range is empty.
    pub fn add_sequence(
        &mut self,
        sequence: &[u8],
        weights: &[u32],
        begin: usize,
        end: usize,
    ) -> Option<(POANodeIndex, POANodeIndex)> {
        if begin >= end {
            return None;
        }

        let mut first = None;
        let mut prev: Option<POANodeIndex> = None;
        for pos in begin..end {
            let code = self.coder.learn(sequence[pos]);
            let curr = self.add_node(code);

            if let Some(p) = prev {
                // both nodes contribute to the weight
                self.add_edge(p, curr, i64::from(weights[pos - 1]) + i64::from(weights[pos]));
            } else {
                first = Some(curr);
            }

            prev = Some(curr);
        }

        first.zip(prev)
    }

    /// Check that all sequence positions in the alignment are in bounds and strictly increasing,
    /// and that all referenced nodes exist. Returns the sequence positions in alignment order.
    fn validate_alignment(
        &self,
        alignment: &Alignment<POANodeIndex>,
        seq_len: usize,
    ) -> Result<Vec<usize>, PoaError> {
        let mut positions = Vec::with_capacity(alignment.len());

        for AlignedPair { node, qpos } in alignment {
            if let Some(n) = node {
                if !self.graph.contains_node(*n) {
                    return Err(PoaError::InvalidNode(n.index()));
                }
            }

            if let Some(q) = qpos {
                if *q >= seq_len {
                    return Err(PoaError::AlignmentOutOfBounds { pos: *q, len: seq_len });
                }

                if positions.last().is_some_and(|prev| *prev >= *q) {
                    return Err(PoaError::InvalidAlignment);
                }

                positions.push(*q);
            }
        }

        Ok(positions)
    }

    pub fn add_alignment_with_weight<T: AsRef<[u8]>>(
        &mut self,
        alignment: &Alignment<POANodeIndex>,
        sequence: T,
        weight: u32,
    ) -> Result<(), PoaError> {
        let seq = sequence.as_ref();
        let weights = vec![weight; seq.len()];

        self.add_alignment(alignment, seq, &weights)
    }

    pub fn add_alignment_with_quality<T: AsRef<[u8]>>(
        &mut self,
        alignment: &Alignment<POANodeIndex>,
        sequence: T,
        quality: &[u8],
    ) -> Result<(), PoaError> {
        self.add_alignment(alignment, sequence, &phred_weights(quality))
    }

    /// Merge an aligned sequence into the graph.
    ///
    /// An empty alignment adds the whole sequence as a new unaligned path. Otherwise, aligned
    /// positions matching the residue of their node reuse that node, mismatches reuse or create a
    /// node in the same alignment column, and insertions and unaligned flanks get new nodes.
    pub fn add_alignment<T: AsRef<[u8]>>(
        &mut self,
        alignment: &Alignment<POANodeIndex>,
        sequence: T,
        weights: &[u32],
    ) -> Result<(), PoaError> {
        let seq = sequence.as_ref();

        if seq.is_empty() {
            return Ok(());
        }

        if seq.len() != weights.len() {
            return Err(PoaError::WeightsUnequalSize(seq.len(), weights.len()));
        }

        if alignment.is_empty() {
            if let Some((first, _)) = self.add_sequence(seq, weights, 0, seq.len()) {
                self.sequences.push(first);
            }
            self.topological_sort();

            return Ok(());
        }

        let valid = self.validate_alignment(alignment, seq.len())?;
        let (Some(&first_pos), Some(&last_pos)) = (valid.first(), valid.last()) else {
            return Err(PoaError::InvalidAlignment);
        };

        for &c in seq {
            self.coder.learn(c);
        }

        // Add unaligned bases
        let prefix = self.add_sequence(seq, weights, 0, first_pos);
        let mut begin = prefix.map(|(first, _)| first);
        let mut prev = prefix.map(|(_, last)| last);
        let suffix = self.add_sequence(seq, weights, last_pos + 1, seq.len());

        // Add aligned bases
        for AlignedPair { node, qpos } in alignment {
            let Some(q) = *qpos else {
                continue;
            };

            let code = self.coder.learn(seq[q]);
            let curr = match *node {
                None => self.add_node(code),
                Some(n) if self.graph[n].code == code => n,
                Some(n) => {
                    let existing = self.aligned_nodes(n)
                        .find(|other| self.graph[*other].code == code);

                    match existing {
                        Some(other) => other,
                        None => self.add_aligned_node(code, n),
                    }
                }
            };

            if begin.is_none() {
                begin = Some(curr);
            }

            if let Some(p) = prev {
                // both nodes contribute to the weight
                self.add_edge(p, curr, i64::from(weights[q - 1]) + i64::from(weights[q]));
            }

            prev = Some(curr);
        }

        if let (Some((suffix_first, _)), Some(p)) = (suffix, prev) {
            self.add_edge(p, suffix_first, i64::from(weights[last_pos]) + i64::from(weights[last_pos + 1]));
        }

        if let Some(entry) = begin {
            self.sequences.push(entry);
        }

        self.topological_sort();

        Ok(())
    }

    /// Order the nodes such that all predecessors of a node come before it, and aligned nodes
    /// occupy consecutive ranks.
    ///
    /// Panics if the graph contains a cycle.
    pub fn topological_sort(&mut self) {
        let bound = self.graph.node_bound();
        let mut order = Vec::with_capacity(self.graph.node_count());

        // 0: unvisited, 1: in progress, 2: finished
        let mut marks = vec![0u8; bound];
        let mut ignored = vec![false; bound];
        let mut stack = Vec::new();

        for start in self.graph.node_indices() {
            if marks[start.index()] != 0 {
                continue;
            }

            stack.push(start);
            while let Some(&curr) = stack.last() {
                let mut is_valid = true;

                if marks[curr.index()] != 2 {
                    for tail in self.graph.neighbors_directed(curr, Incoming) {
                        if marks[tail.index()] != 2 {
                            stack.push(tail);
                            is_valid = false;
                        }
                    }

                    if !ignored[curr.index()] {
                        for other in self.aligned_nodes(curr) {
                            if marks[other.index()] != 2 {
                                stack.push(other);
                                ignored[other.index()] = true;
                                is_valid = false;
                            }
                        }
                    }

                    assert!(is_valid || marks[curr.index()] != 1, "POA graph is not a DAG!");

                    if is_valid {
                        marks[curr.index()] = 2;
                        if !ignored[curr.index()] {
                            order.push(curr);
                            order.extend(self.aligned_nodes(curr));
                        }
                    } else {
                        marks[curr.index()] = 1;
                    }
                }

                if is_valid {
                    stack.pop();
                }
            }
        }

        self.rank_to_node = order;

        assert!(self.is_topologically_sorted(), "POA graph is not topologically sorted!");
    }

    pub fn is_topologically_sorted(&self) -> bool {
        if self.rank_to_node.len() != self.graph.node_count() {
            return false;
        }

        let mut visited = vec![false; self.graph.node_bound()];
        for node in &self.rank_to_node {
            if self.graph.neighbors_directed(*node, Incoming).any(|tail| !visited[tail.index()]) {
                return false;
            }

            visited[node.index()] = true;
        }

        true
    }

    /// Incoming edges in insertion order
    fn sorted_inedges(&self, node: POANodeIndex) -> Vec<(POANodeIndex, i64)> {
        self.graph.edges_directed(node, Incoming)
            .map(|e| (e.id(), e.source(), e.weight().weight))
            .sorted_unstable_by_key(|(id, _, _)| *id)
            .map(|(_, tail, weight)| (tail, weight))
            .collect()
    }

    /// Pick the heaviest incoming edge of `node`. Ties are broken by the score of the tail, and
    /// complete ties keep the earliest inserted edge.
    fn select_heaviest_inedge(
        &self,
        node: POANodeIndex,
        scores: &mut [i64],
        predecessors: &mut [Option<POANodeIndex>],
        skip_unscored: bool,
    ) {
        let ix = node.index();
        scores[ix] = -1;
        predecessors[ix] = None;

        for (tail, weight) in self.sorted_inedges(node) {
            if skip_unscored && scores[tail.index()] == -1 {
                continue;
            }

            let is_better = match predecessors[ix] {
                None => weight > scores[ix],
                Some(pred) => weight > scores[ix]
                    || (weight == scores[ix] && scores[tail.index()] > scores[pred.index()]),
            };

            if is_better {
                scores[ix] = weight;
                predecessors[ix] = Some(tail);
            }
        }

        if let Some(pred) = predecessors[ix] {
            scores[ix] += scores[pred.index()];
        }
    }

    fn traverse_heaviest_bundle(&mut self) {
        self.consensus.clear();

        let bound = self.graph.node_bound();
        let mut predecessors = vec![None; bound];
        let mut scores = vec![-1i64; bound];
        let mut max: Option<POANodeIndex> = None;

        for &node in &self.rank_to_node {
            self.select_heaviest_inedge(node, &mut scores, &mut predecessors, false);

            if max.map_or(true, |m| scores[m.index()] < scores[node.index()]) {
                max = Some(node);
            }
        }

        let Some(mut max) = max else {
            return;
        };

        if self.graph.neighbors(max).next().is_some() {
            let mut node_to_rank = vec![0; bound];
            for (rank, node) in self.rank_to_node.iter().enumerate() {
                node_to_rank[node.index()] = rank;
            }

            while self.graph.neighbors(max).next().is_some() {
                match self.branch_completion(node_to_rank[max.index()], &mut scores, &mut predecessors) {
                    Some(next) => max = next,
                    None => break,
                }
            }
        }

        let mut path = vec![max];
        while let Some(pred) = predecessors[max.index()] {
            path.push(pred);
            max = pred;
        }
        path.reverse();

        self.consensus = path;
    }

    /// Continue the heaviest path past a node that is not a sink. Competing tails of the
    /// successors of the node at `rank` are invalidated, and scores are recomputed for all later
    /// ranks. Returns the new maximum scoring node.
    fn branch_completion(
        &self,
        rank: usize,
        scores: &mut [i64],
        predecessors: &mut [Option<POANodeIndex>],
    ) -> Option<POANodeIndex> {
        let start = self.rank_to_node[rank];
        for head in self.graph.neighbors(start) {
            for tail in self.graph.neighbors_directed(head, Incoming) {
                if tail != start {
                    scores[tail.index()] = -1;
                }
            }
        }

        let mut max: Option<POANodeIndex> = None;
        for &node in &self.rank_to_node[rank + 1..] {
            self.select_heaviest_inedge(node, scores, predecessors, true);

            if max.map_or(true, |m| scores[m.index()] < scores[node.index()]) {
                max = Some(node);
            }
        }

        max
    }

    pub fn generate_consensus(&mut self) -> Vec<u8> {
        self.traverse_heaviest_bundle();

        self.consensus.iter()
            .map(|n| self.residue(*n))
            .collect()
    }

    /// Generate the consensus, along with the number of sequences supporting each consensus
    /// position (including those passing through aligned nodes).
    pub fn generate_consensus_with_summary(&mut self) -> (Vec<u8>, Vec<u32>) {
        let consensus = self.generate_consensus();

        let summary = self.consensus.iter()
            .map(|node| {
                self.node_coverage(*node)
                    + self.aligned_nodes(*node).map(|other| self.node_coverage(other)).sum::<u32>()
            })
            .collect();

        (consensus, summary)
    }

    /// Number of distinct sequences passing through a node
    pub fn node_coverage(&self, node: POANodeIndex) -> u32 {
        let labels: FxHashSet<usize> = self.graph.edges_directed(node, Incoming)
            .chain(self.graph.edges(node))
            .flat_map(|e| e.weight().labels.iter().copied())
            .collect();

        labels.len() as u32
    }

    /// The next node on the path of the sequence with the given label
    pub fn successor(&self, node: POANodeIndex, label: usize) -> Option<POANodeIndex> {
        self.graph.edges(node)
            .find(|e| e.weight().labels.contains(&label))
            .map(|e| e.target())
    }

    /// Add the weights of an aligned sequence to the existing edges, without adding nodes. The
    /// sequence is not recorded, so edge labels are left untouched.
    ///
    /// Only consecutive aligned positions contribute; a gap in the alignment restarts the path.
    pub fn add_weights<T: AsRef<[u8]>>(
        &mut self,
        alignment: &Alignment<POANodeIndex>,
        sequence: T,
        weights: &[u32],
    ) -> Result<(), PoaError> {
        let seq = sequence.as_ref();

        if seq.is_empty() {
            return Ok(());
        }

        if seq.len() != weights.len() {
            return Err(PoaError::WeightsUnequalSize(seq.len(), weights.len()));
        }

        if alignment.is_empty() {
            warn!("Sequence could not be aligned to the graph, skipping it...");
            return Ok(());
        }

        self.validate_alignment(alignment, seq.len())?;

        let num_edges = self.graph.edge_count();
        let mut prev: Option<POANodeIndex> = None;
        for pair in alignment {
            let (Some(node), Some(q)) = (pair.node, pair.qpos) else {
                prev = None;
                continue;
            };

            if let Some(p) = prev {
                self.add_edge_weight(p, node, i64::from(weights[q - 1]) + i64::from(weights[q]));
            }

            prev = Some(node);
        }

        if self.graph.edge_count() != num_edges {
            debug!(new_edges = self.graph.edge_count() - num_edges, "add_weights created new edges");
            self.topological_sort();
        }

        Ok(())
    }

    /// Residues of all nodes referenced by the alignment, in alignment order
    pub fn generate_corrected_sequence(&self, alignment: &Alignment<POANodeIndex>) -> Result<Vec<u8>, PoaError> {
        alignment.iter()
            .filter_map(|pair| pair.node)
            .map(|node| {
                self.graph.node_weight(node)
                    .map(|data| self.coder.decode(data.code))
                    .ok_or(PoaError::InvalidNode(node.index()))
            })
            .collect()
    }

    /// Build a row-column multiple sequence alignment of all inserted sequences, using `-` for
    /// gaps. Aligned nodes share a column.
    pub fn generate_msa(&mut self, include_consensus: bool) -> Vec<Vec<u8>> {
        let mut node_to_column = vec![0; self.graph.node_bound()];
        let mut num_columns = 0;
        let mut rank = 0;
        while rank < self.rank_to_node.len() {
            let node = self.rank_to_node[rank];
            node_to_column[node.index()] = num_columns;
            for other in self.aligned_nodes(node) {
                node_to_column[other.index()] = num_columns;
                rank += 1;
            }

            rank += 1;
            num_columns += 1;
        }

        let mut rows = Vec::with_capacity(self.sequences.len() + usize::from(include_consensus));
        for (label, entry) in self.sequences.iter().enumerate() {
            let mut row = vec![b'-'; num_columns];
            let mut curr = Some(*entry);
            while let Some(node) = curr {
                row[node_to_column[node.index()]] = self.residue(node);
                curr = self.successor(node, label);
            }

            rows.push(row);
        }

        if include_consensus {
            self.traverse_heaviest_bundle();

            let mut row = vec![b'-'; num_columns];
            for node in &self.consensus {
                row[node_to_column[node.index()]] = self.residue(*node);
            }

            rows.push(row);
        }

        rows
    }
}

impl AlignableGraph for POAGraph {
    type NodeIndex = POANodeIndex;
    type PredecessorIterator<'a> = Neighbors<'a, POAEdgeData, u32>;

    fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    fn rank_order(&self) -> Vec<Self::NodeIndex> {
        self.rank_to_node.clone()
    }

    fn predecessors(&self, node: Self::NodeIndex) -> Self::PredecessorIterator<'_> {
        self.graph.neighbors_directed(node, Incoming)
    }

    fn is_end(&self, node: Self::NodeIndex) -> bool {
        self.graph.neighbors(node).next().is_none()
    }

    fn get_symbol(&self, node: Self::NodeIndex) -> u8 {
        self.residue(node)
    }
}

impl Display for POAGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        format_as_dot(f, self)
    }
}
