//! Per-window consensus generation.
//!
//! A window holds a backbone sequence and the reads (layers) overlapping it. All sequences are
//! merged into a POA graph, from which either the heaviest consensus path or, in haplotype-aware
//! mode, a corrected version of the backbone is derived.

use tracing::{debug, debug_span, trace, warn, Level};

use crate::aligner::alignment::{print_alignment, Alignment};
use crate::aligner::GraphAligner;
use crate::config::PruneConfig;
use crate::errors::PoaError;
use crate::graphs::poa::{phred_weights, POAGraph, POANodeIndex};
use crate::graphs::subgraph::update_alignment;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowType {
    /// Long, noisy reads. Consensus trimming applies only to this type.
    LongRead,
    ShortRead,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WindowState {
    Collecting,
    Done,
}

#[derive(Clone, Debug)]
struct Layer {
    sequence: Vec<u8>,
    quality: Option<Vec<u8>>,
    begin: usize,
    end: usize,
}

impl Layer {
    fn weights(&self) -> Vec<u32> {
        match self.quality {
            Some(ref q) => phred_weights(q),
            None => vec![1; self.sequence.len()],
        }
    }
}

#[derive(Clone, Debug)]
pub struct Window {
    id: u64,
    rank: u32,
    window_type: WindowType,

    /// The backbone is always the first layer
    layers: Vec<Layer>,
    consensus: Vec<u8>,
    graph: Option<POAGraph>,
    state: WindowState,
}

impl Window {
    pub fn new(
        id: u64,
        rank: u32,
        window_type: WindowType,
        backbone: &[u8],
        quality: Option<&[u8]>,
    ) -> Result<Self, PoaError> {
        if backbone.is_empty() {
            return Err(PoaError::EmptyBackbone);
        }

        if let Some(q) = quality {
            if q.len() != backbone.len() {
                return Err(PoaError::QualityLengthMismatch { seq_len: backbone.len(), qual_len: q.len() });
            }
        }

        Ok(Window {
            id,
            rank,
            window_type,
            layers: vec![Layer {
                sequence: backbone.to_vec(),
                quality: quality.map(|q| q.to_vec()),
                begin: 0,
                end: 0,
            }],
            consensus: Vec::new(),
            graph: None,
            state: WindowState::Collecting,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    pub fn backbone(&self) -> &[u8] {
        &self.layers[0].sequence
    }

    /// Number of sequences in this window, including the backbone
    pub fn num_sequences(&self) -> usize {
        self.layers.len()
    }

    pub fn consensus(&self) -> &[u8] {
        &self.consensus
    }

    /// The graph the consensus was derived from, once it has been generated
    pub fn graph(&self) -> Option<&POAGraph> {
        self.graph.as_ref()
    }

    fn ensure_collecting(&self) -> Result<(), PoaError> {
        match self.state {
            WindowState::Collecting => Ok(()),
            WindowState::Done => Err(PoaError::WindowConsumed),
        }
    }

    /// Add a read overlapping backbone positions `begin` up to and including `end`.
    ///
    /// Empty reads and reads with an empty span are ignored.
    pub fn add_layer(
        &mut self,
        sequence: &[u8],
        quality: Option<&[u8]>,
        begin: usize,
        end: usize,
    ) -> Result<(), PoaError> {
        self.ensure_collecting()?;

        if sequence.is_empty() || begin == end {
            return Ok(());
        }

        if let Some(q) = quality {
            if q.len() != sequence.len() {
                return Err(PoaError::InvalidLayer(format!(
                    "quality length ({}) does not match the sequence length ({})", q.len(), sequence.len()
                )));
            }
        }

        let backbone_len = self.backbone().len();
        if begin > end || end > backbone_len {
            return Err(PoaError::InvalidLayer(format!(
                "span {begin}-{end} is not within the backbone (length {backbone_len})"
            )));
        }

        self.layers.push(Layer {
            sequence: sequence.to_vec(),
            quality: quality.map(|q| q.to_vec()),
            begin,
            end,
        });

        Ok(())
    }

    /// Layer indices (without the backbone), in stable order of their begin position
    fn layer_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (1..self.layers.len()).collect();
        order.sort_by_key(|i| self.layers[*i].begin);

        order
    }

    /// Sequence indices in the order they are inserted into the graph. Index 0 is the backbone,
    /// the others count stored layers in the order they were added. This is also the row order
    /// of the MSA of the graph built by [`Window::generate_consensus`].
    pub fn insertion_order(&self) -> Vec<usize> {
        let mut order = vec![0];
        order.extend(self.layer_order());

        order
    }

    /// Layers within this distance of both backbone ends are aligned to the whole graph
    fn offset(&self) -> usize {
        self.backbone().len() / 100
    }

    fn spans_window(&self, layer: &Layer) -> bool {
        let offset = self.offset();
        layer.begin < offset && layer.end > self.backbone().len() - offset
    }

    fn align_layer<A: GraphAligner>(
        &self,
        graph: &POAGraph,
        aligner: &A,
        layer: &Layer,
    ) -> Result<Alignment<POANodeIndex>, PoaError> {
        if self.spans_window(layer) {
            return aligner.align(graph, &layer.sequence);
        }

        // Backbone nodes were inserted first, so node indices equal backbone positions
        let last = self.backbone().len() - 1;
        let (subgraph, mapping) = graph.subgraph(layer.begin, layer.end.min(last))?;
        let mut alignment = aligner.align(&subgraph, &layer.sequence)?;
        update_alignment(&mapping, &mut alignment);

        Ok(alignment)
    }

    /// Build the POA graph of all sequences. Returns the graph and the total weight of all
    /// inserted bases.
    fn build_graph<A: GraphAligner>(&self, aligner: &A) -> Result<(POAGraph, u64), PoaError> {
        let backbone = &self.layers[0];
        let backbone_weights = backbone.weights();

        let mut graph = POAGraph::new();
        graph.add_alignment(&Alignment::new(), &backbone.sequence, &backbone_weights)?;
        let mut total_weight: u64 = backbone_weights.iter().map(|w| u64::from(*w)).sum();

        for i in self.layer_order() {
            let layer = &self.layers[i];
            let weights = layer.weights();
            let alignment = self.align_layer(&graph, aligner, layer)?;

            if tracing::enabled!(Level::TRACE) {
                trace!("Layer {i} alignment:\n{}", print_alignment(&graph, &layer.sequence, &alignment));
            }

            graph.add_alignment(&alignment, &layer.sequence, &weights)?;
            total_weight += weights.iter().map(|w| u64::from(*w)).sum::<u64>();
        }

        debug!(nodes = graph.node_count(), edges = graph.edge_count(), "Built POA graph");

        Ok((graph, total_weight))
    }

    fn finish_with_backbone(&mut self) -> bool {
        self.consensus = self.backbone().to_vec();
        self.state = WindowState::Done;

        false
    }

    fn finish_with_pruned_out(&mut self, min_weight: i64) -> bool {
        warn!(
            "Pruning with minimum weight {min_weight} left no edges in window {} (contig {}), keeping the backbone",
            self.rank, self.id
        );

        self.finish_with_backbone()
    }

    /// Generate the consensus of this window. Returns `false` if the window has too few
    /// sequences, in which case the consensus is the backbone itself.
    ///
    /// With `trim`, the consensus of a long read window is trimmed to the region covered by at
    /// least half of the reads.
    pub fn generate_consensus<A: GraphAligner>(&mut self, aligner: &A, trim: bool) -> Result<bool, PoaError> {
        self.ensure_collecting()?;

        let _span = debug_span!("window", id = self.id, rank = self.rank).entered();

        if self.layers.len() < 3 {
            return Ok(self.finish_with_backbone());
        }

        let (mut graph, _) = self.build_graph(aligner)?;
        let (consensus, coverages) = graph.generate_consensus_with_summary();
        self.consensus = consensus;

        if self.window_type == WindowType::LongRead && trim {
            self.trim_consensus(&coverages);
        }

        self.graph = Some(graph);
        self.state = WindowState::Done;

        Ok(true)
    }

    fn trim_consensus(&mut self, coverages: &[u32]) {
        let min_coverage = ((self.layers.len() - 1) / 2) as u32;

        let begin = coverages.iter().position(|c| *c >= min_coverage);
        let end = coverages.iter().rposition(|c| *c >= min_coverage);

        match (begin, end) {
            (Some(b), Some(e)) if b < e => {
                self.consensus.truncate(e + 1);
                self.consensus.drain(..b);
            },
            _ => warn!("Contig {} might be chimeric in window {}!", self.id, self.rank),
        }
    }

    /// Generate a haplotype-aware corrected backbone.
    ///
    /// After building the graph, weakly supported edges are pruned and only the largest connected
    /// component is kept. Then, for `num_prune - 1` rounds, all sequences are re-aligned to the
    /// pruned graph to re-accumulate edge weights, followed by another pruning step. Finally the
    /// backbone is aligned locally to the pruned graph, and the residues it aligns to form the
    /// corrected sequence.
    ///
    /// `aligner` is used for the backbone and for reads spanning the window, `local_aligner` for
    /// all other reads during refinement and for the final backbone alignment.
    ///
    /// Returns `false` and keeps the backbone if pruning leaves no edges, or if the backbone
    /// aligns to less than half its length of the pruned graph.
    pub fn generate_haplotype_consensus<A, L>(
        &mut self,
        aligner: &A,
        local_aligner: &L,
        config: &PruneConfig,
    ) -> Result<bool, PoaError>
    where
        A: GraphAligner,
        L: GraphAligner,
    {
        self.ensure_collecting()?;

        let _span = debug_span!("window", id = self.id, rank = self.rank).entered();

        if self.layers.len() < 3 {
            return Ok(self.finish_with_backbone());
        }

        let (mut graph, total_weight) = self.build_graph(aligner)?;

        let average_weight = total_weight as f64 / self.backbone().len() as f64;
        let min_weight = config.effective_min_weight(self.layers[0].quality.is_some());

        graph.prune_graph(min_weight, config.min_confidence, config.min_support, Some(average_weight));
        let mut pruned = graph.largest_subgraph();
        drop(graph);

        if pruned.edge_count() == 0 {
            return Ok(self.finish_with_pruned_out(min_weight));
        }

        let order = self.insertion_order();
        for round in 1..config.num_prune {
            for &i in &order {
                let layer = &self.layers[i];
                let alignment = if i == 0 || self.spans_window(layer) {
                    aligner.align(&pruned, &layer.sequence)?
                } else {
                    local_aligner.align(&pruned, &layer.sequence)?
                };

                pruned.add_weights(&alignment, &layer.sequence, &layer.weights())?;
            }

            pruned.prune_graph(min_weight, config.min_confidence, config.min_support, Some(average_weight));
            pruned = pruned.largest_subgraph();

            debug!(round, nodes = pruned.node_count(), edges = pruned.edge_count(), "Refined pruned graph");

            if pruned.edge_count() == 0 {
                return Ok(self.finish_with_pruned_out(min_weight));
            }
        }

        let alignment = local_aligner.align(&pruned, self.backbone())?;
        let corrected = pruned.generate_corrected_sequence(&alignment)?;

        if corrected.is_empty() || corrected.len() < self.backbone().len() / 2 {
            warn!(
                "Backbone of window {} (contig {}) aligns to only {} bases of the pruned graph, keeping it",
                self.rank, self.id, corrected.len()
            );
            return Ok(self.finish_with_backbone());
        }

        self.consensus = corrected;
        self.graph = Some(pruned);
        self.state = WindowState::Done;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::aligner::{AlignmentType, LinearGapAligner};
    use crate::config::PruneConfig;
    use crate::errors::PoaError;
    use super::{Window, WindowType};

    fn global() -> LinearGapAligner {
        LinearGapAligner::new(AlignmentType::Global, 3, -5, -4)
    }

    fn local() -> LinearGapAligner {
        LinearGapAligner::new(AlignmentType::Local, 3, -5, -4)
    }

    #[test]
    fn test_majority_consensus() {
        let mut window = Window::new(0, 0, WindowType::LongRead, b"ACGTACGT", Some(b"!!!!!!!!")).unwrap();
        window.add_layer(b"ACGAACGT", None, 0, 7).unwrap();
        window.add_layer(b"ACGTACGT", None, 0, 7).unwrap();

        assert!(window.generate_consensus(&global(), false).unwrap());
        assert_eq!(window.consensus(), b"ACGTACGT");
        assert!(window.graph().unwrap().is_topologically_sorted());
    }

    #[test]
    fn test_too_few_sequences() {
        let backbone: Vec<u8> = b"ACGTTGCA".iter().cycle().take(100).copied().collect();
        let mut window = Window::new(3, 7, WindowType::LongRead, &backbone, None).unwrap();
        window.add_layer(&backbone[10..60], None, 10, 59).unwrap();

        assert!(!window.generate_consensus(&global(), true).unwrap());
        assert_eq!(window.consensus(), backbone.as_slice());
        assert_eq!(window.id(), 3);
        assert_eq!(window.rank(), 7);
        assert!(window.graph().is_none());
    }

    #[test]
    fn test_add_layer_noop() {
        let mut window = Window::new(0, 0, WindowType::ShortRead, b"ACGT", None).unwrap();
        window.add_layer(b"", None, 0, 3).unwrap();
        window.add_layer(b"ACGT", None, 2, 2).unwrap();

        assert_eq!(window.num_sequences(), 1);
    }

    #[test]
    fn test_invalid_construction() {
        assert!(matches!(
            Window::new(0, 0, WindowType::LongRead, b"", None),
            Err(PoaError::EmptyBackbone)
        ));

        assert!(matches!(
            Window::new(0, 0, WindowType::LongRead, b"ACGT", Some(b"!!")),
            Err(PoaError::QualityLengthMismatch { seq_len: 4, qual_len: 2 })
        ));
    }

    #[test]
    fn test_invalid_layers() {
        let mut window = Window::new(0, 0, WindowType::LongRead, b"ACGTACGT", None).unwrap();

        assert!(matches!(window.add_layer(b"ACG", Some(b"!!"), 0, 3), Err(PoaError::InvalidLayer(_))));
        assert!(matches!(window.add_layer(b"ACG", None, 5, 2), Err(PoaError::InvalidLayer(_))));
        assert!(matches!(window.add_layer(b"ACG", None, 4, 9), Err(PoaError::InvalidLayer(_))));
        assert_eq!(window.num_sequences(), 1);

        window.add_layer(b"ACG", Some(b"III"), 5, 8).unwrap();
        assert_eq!(window.num_sequences(), 2);
    }

    #[test]
    fn test_window_consumed() {
        let mut window = Window::new(0, 0, WindowType::LongRead, b"ACGT", None).unwrap();
        window.generate_consensus(&global(), false).unwrap();

        assert!(matches!(window.add_layer(b"ACGT", None, 0, 3), Err(PoaError::WindowConsumed)));
        assert!(matches!(window.generate_consensus(&global(), false), Err(PoaError::WindowConsumed)));
        assert!(matches!(
            window.generate_haplotype_consensus(&global(), &local(), &PruneConfig::default()),
            Err(PoaError::WindowConsumed)
        ));
    }

    #[test]
    fn test_trim_long_read_consensus() {
        let backbone = b"ACGTACGTAC";
        let mut window = Window::new(0, 0, WindowType::LongRead, backbone, None).unwrap();
        for _ in 0..4 {
            window.add_layer(&backbone[2..8], None, 2, 7).unwrap();
        }

        assert!(window.generate_consensus(&global(), true).unwrap());
        assert_eq!(window.consensus(), b"GTACGT");
    }

    #[test]
    fn test_no_trim_for_short_reads() {
        let backbone = b"ACGTACGTAC";
        let mut window = Window::new(0, 0, WindowType::ShortRead, backbone, None).unwrap();
        for _ in 0..4 {
            window.add_layer(&backbone[2..8], None, 2, 7).unwrap();
        }

        assert!(window.generate_consensus(&global(), true).unwrap());
        assert_eq!(window.consensus(), backbone);
    }

    #[test]
    fn test_haplotype_correction() {
        let truth = b"ACGTTGCAAGCTTACCGATGGCATCGATCA";
        let mut backbone = truth.to_vec();
        backbone[15] = b'A';
        assert_ne!(truth[15], b'A');

        let quality = vec![b'!'; backbone.len()];
        let mut window = Window::new(1, 2, WindowType::LongRead, &backbone, Some(&quality)).unwrap();
        for _ in 0..6 {
            window.add_layer(truth, None, 0, truth.len() - 1).unwrap();
        }

        let corrected = window.generate_haplotype_consensus(&global(), &local(), &PruneConfig::default()).unwrap();
        assert!(corrected);
        assert_eq!(window.consensus(), truth);

        let graph = window.graph().unwrap();
        assert!(graph.is_topologically_sorted());
        assert_eq!(graph.node_count(), truth.len());
    }

    #[test]
    fn test_haplotype_too_few_sequences() {
        let mut window = Window::new(0, 0, WindowType::LongRead, b"ACGTACGT", None).unwrap();
        window.add_layer(b"ACGTACGT", None, 0, 7).unwrap();

        assert!(!window.generate_haplotype_consensus(&global(), &local(), &PruneConfig::default()).unwrap());
        assert_eq!(window.consensus(), b"ACGTACGT");
    }

    #[test]
    fn test_insertion_order() {
        let backbone = b"ACGTTGCAAGCTTACCGATG";
        let mut window = Window::new(0, 0, WindowType::ShortRead, backbone, None).unwrap();
        window.add_layer(&backbone[10..], None, 10, 19).unwrap();
        window.add_layer(b"", None, 0, 19).unwrap();
        window.add_layer(backbone, None, 0, 19).unwrap();

        assert_eq!(window.insertion_order(), vec![0, 2, 1]);

        assert!(window.generate_consensus(&global(), false).unwrap());
        let mut graph = window.graph().unwrap().clone();
        let msa = graph.generate_msa(false);

        assert_eq!(msa.len(), 3);
        assert_eq!(msa[1], backbone.to_vec());
        assert_eq!(msa[2], b"----------CTTACCGATG".to_vec());
    }

    fn long_backbone() -> Vec<u8> {
        b"ACGTTGCAAGCTTACCGATGGCATCGATCAGTCCATGAGTCAAGGT".iter()
            .cycle()
            .take(250)
            .copied()
            .collect()
    }

    #[test]
    fn test_spanning_reads_long_window() {
        let truth = long_backbone();
        let mut backbone = truth.clone();
        backbone[120] = if truth[120] == b'A' { b'C' } else { b'A' };

        let mut window = Window::new(0, 0, WindowType::LongRead, &backbone, None).unwrap();
        for _ in 0..4 {
            window.add_layer(&truth, None, 0, truth.len() - 1).unwrap();
        }
        window.add_layer(&truth[20..220], None, 20, 219).unwrap();

        // offset is 2, so only the full length reads are aligned to the whole graph
        let spanning = window.layers.iter().filter(|l| window.spans_window(l)).count();
        assert_eq!(spanning, 4);

        assert!(window.generate_consensus(&global(), true).unwrap());
        assert_eq!(window.consensus(), truth.as_slice());
    }

    #[test]
    fn test_haplotype_spanning_reads_with_qualities() {
        let truth = long_backbone();
        let mut backbone = truth.clone();
        backbone[120] = if truth[120] == b'A' { b'C' } else { b'A' };
        let backbone_quality = vec![b'!'; backbone.len()];
        let read_quality = vec![b'+'; truth.len()];

        let mut window = Window::new(0, 0, WindowType::LongRead, &backbone, Some(&backbone_quality)).unwrap();
        for _ in 0..5 {
            window.add_layer(&truth, Some(&read_quality), 0, truth.len() - 1).unwrap();
        }

        assert!(window.generate_haplotype_consensus(&global(), &local(), &PruneConfig::default()).unwrap());
        assert_eq!(window.consensus(), truth.as_slice());
    }

    #[test]
    fn test_haplotype_pruned_to_nothing() {
        let truth = b"ACGTTGCAAGCTTACCGATGGCATCGATCA";

        // Without backbone qualities the weight threshold is scaled to 100, more than any edge
        let mut window = Window::new(0, 0, WindowType::LongRead, truth, None).unwrap();
        for _ in 0..6 {
            window.add_layer(truth, None, 0, truth.len() - 1).unwrap();
        }

        let corrected = window.generate_haplotype_consensus(&global(), &local(), &PruneConfig::default()).unwrap();
        assert!(!corrected);
        assert_eq!(window.consensus(), truth);
        assert!(window.graph().is_none());
    }
}
