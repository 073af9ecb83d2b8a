use tracing::trace;

use crate::aligner::alignment::{AlignedPair, Alignment};
use crate::aligner::{AlignmentType, GraphAligner};
use crate::config::ScoringConfig;
use crate::errors::PoaError;
use crate::graphs::{AlignableGraph, NodeIndexType};

/// Full dynamic programming sequence-to-graph aligner with linear gap penalties.
///
/// All scratch memory is allocated per call, so a single aligner can be shared between threads.
#[derive(Clone, Debug)]
pub struct LinearGapAligner {
    mode: AlignmentType,
    match_score: i64,
    mismatch_score: i64,
    gap_score: i64,
}

impl LinearGapAligner {
    pub fn new(mode: AlignmentType, match_score: i32, mismatch_score: i32, gap_score: i32) -> Self {
        Self {
            mode,
            match_score: i64::from(match_score),
            mismatch_score: i64::from(mismatch_score),
            gap_score: i64::from(gap_score),
        }
    }

    pub fn from_config(mode: AlignmentType, scoring: &ScoringConfig) -> Self {
        Self::new(mode, scoring.match_score, scoring.mismatch_score, scoring.gap_score)
    }

    pub fn mode(&self) -> AlignmentType {
        self.mode
    }

    #[inline]
    fn substitution(&self, a: u8, b: u8) -> i64 {
        if a == b { self.match_score } else { self.mismatch_score }
    }
}

/// Dynamic programming matrix. Row 0 is a virtual source preceding all graph nodes, row `i > 0`
/// corresponds to the node at rank `i - 1`.
struct DPMatrix {
    scores: Vec<i64>,
    width: usize,
}

impl DPMatrix {
    fn new(rows: usize, width: usize) -> Self {
        Self {
            scores: vec![0; rows * width],
            width,
        }
    }

    #[inline(always)]
    fn get(&self, row: usize, col: usize) -> i64 {
        self.scores[row * self.width + col]
    }

    #[inline(always)]
    fn set(&mut self, row: usize, col: usize, value: i64) {
        self.scores[row * self.width + col] = value;
    }
}

impl GraphAligner for LinearGapAligner {
    fn align<G, S>(&self, graph: &G, seq: S) -> Result<Alignment<G::NodeIndex>, PoaError>
    where
        G: AlignableGraph,
        S: AsRef<[u8]>,
    {
        let seq = seq.as_ref();
        if graph.node_count() == 0 || seq.is_empty() {
            return Ok(Alignment::new());
        }

        let ranks = graph.rank_order();
        let num_rows = ranks.len() + 1;
        let width = seq.len() + 1;

        let max_ix = ranks.iter().map(|n| n.index()).max().unwrap_or(0);
        let mut node_to_row = vec![0; max_ix + 1];
        for (rank, node) in ranks.iter().enumerate() {
            node_to_row[node.index()] = rank + 1;
        }

        // Nodes without predecessors start from the virtual source row
        let pred_rows: Vec<Vec<usize>> = ranks.iter()
            .map(|node| {
                let preds: Vec<usize> = graph.predecessors(*node)
                    .map(|p| node_to_row[p.index()])
                    .collect();

                if preds.is_empty() { vec![0] } else { preds }
            })
            .collect();

        let is_local = self.mode == AlignmentType::Local;
        let mut dp = DPMatrix::new(num_rows, width);

        if self.mode != AlignmentType::Local {
            for j in 1..width {
                dp.set(0, j, j as i64 * self.gap_score);
            }
        }

        for (i, node) in ranks.iter().enumerate() {
            let row = i + 1;
            let preds = &pred_rows[i];
            let symbol = graph.get_symbol(*node);

            let first_col = match self.mode {
                AlignmentType::Global => preds.iter()
                    .map(|p| dp.get(*p, 0) + self.gap_score)
                    .max()
                    .unwrap_or(self.gap_score),
                AlignmentType::Local | AlignmentType::SemiGlobal => 0,
            };
            dp.set(row, 0, first_col);

            for j in 1..width {
                let sub = self.substitution(symbol, seq[j - 1]);

                let mut best = dp.get(row, j - 1) + self.gap_score;
                for p in preds {
                    best = best
                        .max(dp.get(*p, j - 1) + sub)
                        .max(dp.get(*p, j) + self.gap_score);
                }

                if is_local {
                    best = best.max(0);
                }

                dp.set(row, j, best);
            }
        }

        let last_col = width - 1;
        let end = match self.mode {
            AlignmentType::Global => (1..num_rows)
                .filter(|row| graph.is_end(ranks[row - 1]))
                .map(|row| (row, last_col))
                .max_by_key(|(row, col)| (dp.get(*row, *col), std::cmp::Reverse(*row))),
            AlignmentType::SemiGlobal => (1..num_rows)
                .map(|row| (row, last_col))
                .max_by_key(|(row, col)| (dp.get(*row, *col), std::cmp::Reverse(*row))),
            AlignmentType::Local => (1..num_rows)
                .flat_map(|row| (1..width).map(move |col| (row, col)))
                .max_by_key(|(row, col)| (dp.get(*row, *col), std::cmp::Reverse(*row), std::cmp::Reverse(*col)))
                .filter(|(row, col)| dp.get(*row, *col) > 0),
        };

        let Some((mut row, mut col)) = end else {
            return Ok(Alignment::new());
        };

        trace!(score = dp.get(row, col), mode = ?self.mode, "Graph alignment score");

        let mut alignment = Alignment::new();
        loop {
            let done = match self.mode {
                AlignmentType::Global => row == 0 && col == 0,
                AlignmentType::SemiGlobal => col == 0,
                AlignmentType::Local => row == 0 || col == 0 || dp.get(row, col) == 0,
            };

            if done {
                break;
            }

            let score = dp.get(row, col);

            if row == 0 {
                alignment.push(AlignedPair::new(None, Some(col - 1)));
                col -= 1;
                continue;
            }

            let node = ranks[row - 1];
            let preds = &pred_rows[row - 1];

            if col > 0 {
                let sub = self.substitution(graph.get_symbol(node), seq[col - 1]);
                if let Some(p) = preds.iter().find(|p| dp.get(**p, col - 1) + sub == score) {
                    alignment.push(AlignedPair::new(Some(node), Some(col - 1)));
                    row = *p;
                    col -= 1;
                    continue;
                }
            }

            if let Some(p) = preds.iter().find(|p| dp.get(**p, col) + self.gap_score == score) {
                alignment.push(AlignedPair::new(Some(node), None));
                row = *p;
                continue;
            }

            if col > 0 && dp.get(row, col - 1) + self.gap_score == score {
                alignment.push(AlignedPair::new(None, Some(col - 1)));
                col -= 1;
                continue;
            }

            // Only reachable for a cell whose score could not have been produced by the recurrence
            return Err(PoaError::InvalidAlignment);
        }

        alignment.reverse();

        Ok(alignment)
    }
}

#[cfg(test)]
mod tests {
    use petgraph::graph::NodeIndex;

    use crate::aligner::{AlignmentType, GraphAligner};
    use crate::graphs::mock::{create_bubble_graph, create_linear_graph, MockGraph};
    use super::LinearGapAligner;

    fn aligner(mode: AlignmentType) -> LinearGapAligner {
        LinearGapAligner::new(mode, 3, -5, -4)
    }

    fn pairs(graph: &MockGraph, aligner: &LinearGapAligner, seq: &[u8]) -> Vec<(Option<usize>, Option<usize>)> {
        aligner.align(graph, seq).unwrap()
            .into_iter()
            .map(|p| (p.node.map(|n: NodeIndex<u32>| n.index()), p.qpos))
            .collect()
    }

    #[test]
    fn test_global_exact() {
        let graph = create_linear_graph(b"ACGT");
        let aln = pairs(&graph, &aligner(AlignmentType::Global), b"ACGT");

        assert_eq!(aln, vec![(Some(0), Some(0)), (Some(1), Some(1)), (Some(2), Some(2)), (Some(3), Some(3))]);
    }

    #[test]
    fn test_global_bubble() {
        let graph = create_bubble_graph();
        let aln = pairs(&graph, &aligner(AlignmentType::Global), b"ACGACG");

        let nodes: Vec<_> = aln.iter().map(|(n, _)| n.unwrap()).collect();
        assert_eq!(nodes, vec![0, 1, 2, 4, 5, 6]);
        assert!(aln.iter().all(|(_, q)| q.is_some()));
    }

    #[test]
    fn test_global_deletion() {
        let graph = create_linear_graph(b"ACGTAC");
        let aln = pairs(&graph, &aligner(AlignmentType::Global), b"ACGAC");

        assert_eq!(aln, vec![
            (Some(0), Some(0)), (Some(1), Some(1)), (Some(2), Some(2)),
            (Some(3), None),
            (Some(4), Some(3)), (Some(5), Some(4)),
        ]);
    }

    #[test]
    fn test_global_insertion() {
        let graph = create_linear_graph(b"ACGT");
        let aln = pairs(&graph, &aligner(AlignmentType::Global), b"ACTGT");

        assert_eq!(aln.len(), 5);
        assert_eq!(aln.iter().filter(|(n, _)| n.is_none()).count(), 1);

        let nodes: Vec<_> = aln.iter().filter_map(|(n, _)| *n).collect();
        let positions: Vec<_> = aln.iter().filter_map(|(_, q)| *q).collect();
        assert_eq!(nodes, vec![0, 1, 2, 3]);
        assert_eq!(positions, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_local() {
        let graph = create_linear_graph(b"GGGGACGTCCCC");
        let aln = pairs(&graph, &aligner(AlignmentType::Local), b"TTACGTTT");

        assert_eq!(aln, vec![(Some(4), Some(2)), (Some(5), Some(3)), (Some(6), Some(4)), (Some(7), Some(5))]);
    }

    #[test]
    fn test_local_no_match() {
        let graph = create_linear_graph(b"AAAA");
        let aln = pairs(&graph, &aligner(AlignmentType::Local), b"CCCC");

        assert!(aln.is_empty());
    }

    #[test]
    fn test_semi_global() {
        let graph = create_linear_graph(b"GGGACGTCCC");
        let aln = pairs(&graph, &aligner(AlignmentType::SemiGlobal), b"ACGT");

        assert_eq!(aln, vec![(Some(3), Some(0)), (Some(4), Some(1)), (Some(5), Some(2)), (Some(6), Some(3))]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = MockGraph::default();
        let aln = pairs(&graph, &aligner(AlignmentType::Global), b"ACGT");

        assert!(aln.is_empty());
    }
}
