use std::io::Read;

use serde::{Deserialize, Serialize};

use crate::errors::PoaError;

/// Parameters of the haplotype-aware prune and re-align loop
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PruneConfig {
    /// Edges lighter than this are removed
    pub min_weight: i64,

    /// Multiplier for `min_weight` when the backbone has no base qualities
    pub quality_weight_scale: i64,

    /// Minimum share of the weight leaving the tail, and entering the head, an edge must carry
    pub min_confidence: f64,

    /// Minimum edge weight relative to the average per-base weight of the window
    pub min_support: f64,

    /// Number of pruning rounds, including the initial one
    pub num_prune: u32,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            min_weight: 5,
            quality_weight_scale: 20,
            min_confidence: 0.2,
            min_support: 0.2,
            num_prune: 2,
        }
    }
}

impl PruneConfig {
    /// Edge weight threshold for a window, depending on whether its backbone has qualities.
    /// Callers without real qualities pass a dummy `!` string to keep the plain threshold.
    pub fn effective_min_weight(&self, backbone_has_quality: bool) -> i64 {
        if backbone_has_quality {
            self.min_weight
        } else {
            self.min_weight * self.quality_weight_scale
        }
    }
}

/// Linear gap alignment scores
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    #[serde(rename = "match")]
    pub match_score: i32,

    #[serde(rename = "mismatch")]
    pub mismatch_score: i32,

    #[serde(rename = "gap")]
    pub gap_score: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            match_score: 3,
            mismatch_score: -5,
            gap_score: -4,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scores of the aligner used to build the graph
    pub scoring: ScoringConfig,

    /// Scores of the local aligner used during haplotype refinement
    pub local_scoring: ScoringConfig,

    pub prune: PruneConfig,
}

impl Config {
    pub fn from_json_reader<R: Read>(reader: R) -> Result<Self, PoaError> {
        Ok(serde_json::from_reader(reader)?)
    }
}
