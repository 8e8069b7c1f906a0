//! Tunable constants for the probability engine, the selector and memory.
//!
//! The values are empirical. Embedding callers can override any subset from
//! JSON; missing fields keep their defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Assumed fraction of cells holding a mine.
    pub base_density: f64,
    pub corner_discount: f64,
    pub edge_discount: f64,
    /// Applied to cells one step in from the border.
    pub near_edge_discount: f64,
    pub base_confidence: f64,

    /// Components up to this size are enumerated exhaustively.
    pub exact_enumeration_limit: usize,
    /// Components up to this size are sampled; larger ones use least squares.
    pub max_enumeration_cells: usize,
    pub sample_count: usize,
    pub unconstrained_probability: f64,
    pub unconstrained_confidence: f64,
    /// Multiplier for non-frontier cells with low confidence.
    pub non_frontier_damping: f64,
    /// Allowed relative deviation of total probability mass before rescaling.
    pub mass_deviation: f64,
    pub rescale_min: f64,
    pub rescale_max: f64,

    /// Upper bounds of the first four risk tiers; everything else is tier five.
    pub risk_tiers: [f64; 4],
    /// Random pick among this many best-ranked candidates.
    pub top_candidates: usize,
    pub opening_win_rate: f64,
    pub second_move_win_rate: f64,
    pub second_move_confidence: f64,

    pub contradiction_threshold: u32,
    pub attenuation_factor: f64,

    /// Fixed seed for the move selector; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_density: 0.18,
            corner_discount: 0.7,
            edge_discount: 0.8,
            near_edge_discount: 0.9,
            base_confidence: 0.2,
            exact_enumeration_limit: 10,
            max_enumeration_cells: 12,
            sample_count: 1000,
            unconstrained_probability: 0.1,
            unconstrained_confidence: 0.4,
            non_frontier_damping: 0.85,
            mass_deviation: 0.5,
            rescale_min: 0.05,
            rescale_max: 0.95,
            risk_tiers: [0.1, 0.2, 0.3, 0.5],
            top_candidates: 3,
            opening_win_rate: 0.55,
            second_move_win_rate: 0.6,
            second_move_confidence: 0.5,
            contradiction_threshold: 3,
            attenuation_factor: 0.7,
            seed: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}
