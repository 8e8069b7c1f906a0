//! Core data types shared by every engine stage.
//!
//! Positions are `(row, col)` tuples. Grid storage is flat and row-major:
//! `cells[row * cols + col]`.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// A `(row, col)` grid coordinate.
pub type Position = (usize, usize);

/// Bit-pack (row, col) into a single u32 key: `(row << 16) | col`.
#[inline(always)]
pub fn cell_key(row: usize, col: usize) -> u32 {
    ((row as u32) << 16) | (col as u32)
}

/// What the oracle reported for a revealed cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellValue {
    Empty,
    Digit(u8),
    Mine,
}

impl CellValue {
    /// Mine count around the cell, treating an empty reveal as zero.
    /// `None` for a mine.
    pub fn mine_count(self) -> Option<u8> {
        match self {
            CellValue::Empty => Some(0),
            CellValue::Digit(n) => Some(n),
            CellValue::Mine => None,
        }
    }

    /// Empty or "0": every neighbor is safe.
    pub fn is_zero(self) -> bool {
        self.mine_count() == Some(0)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => f.write_str(""),
            CellValue::Digit(n) => write!(f, "{n}"),
            CellValue::Mine => f.write_str("mine"),
        }
    }
}

impl FromStr for CellValue {
    type Err = EngineError;

    /// Parses the oracle vocabulary: `""`/`"empty"`, `"0"`..`"8"`, `"mine"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "empty" => Ok(CellValue::Empty),
            "mine" => Ok(CellValue::Mine),
            digit => match digit.parse::<u8>() {
                Ok(n) if n <= 8 => Ok(CellValue::Digit(n)),
                _ => Err(EngineError::InvalidGroundTruth(s.to_string())),
            },
        }
    }
}

/// Where a probability estimate came from. Declaration order is the total
/// order used to break confidence ties: later variants win.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Initial,
    HeuristicDefault,
    MemoryBias,
    ProbabilityEstimate,
    SubsetIntersection,
    Pattern,
    Restriction,
    CertainAnalysis,
    Flagged,
    Revealed,
}

/// Single overwrite rule for every estimate update: strictly higher
/// confidence, or equal confidence with higher provenance.
#[inline]
pub fn should_overwrite(
    current_confidence: f64,
    current: Provenance,
    new_confidence: f64,
    new: Provenance,
) -> bool {
    new_confidence > current_confidence || (new_confidence == current_confidence && new > current)
}

/// Number of prior estimates kept per cell.
pub const ESTIMATE_HISTORY_LEN: usize = 8;

/// A prior `(probability, confidence, provenance)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriorEstimate {
    pub mine_probability: f64,
    pub confidence: f64,
    pub provenance: Provenance,
}

/// Mine-probability record carried by every cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbabilityEstimate {
    pub mine_probability: f64,
    pub confidence: f64,
    pub provenance: Provenance,
    pub history: VecDeque<PriorEstimate>,
}

impl Default for ProbabilityEstimate {
    fn default() -> Self {
        Self {
            mine_probability: 0.0,
            confidence: 0.0,
            provenance: Provenance::Initial,
            history: VecDeque::with_capacity(ESTIMATE_HISTORY_LEN),
        }
    }
}

impl ProbabilityEstimate {
    pub fn is_certain_mine(&self) -> bool {
        self.confidence >= 1.0 && self.mine_probability >= 1.0
    }

    pub fn is_certain_safe(&self) -> bool {
        self.confidence >= 1.0 && self.mine_probability <= 0.0
    }

    pub fn is_certain(&self) -> bool {
        self.is_certain_mine() || self.is_certain_safe()
    }

    /// Apply an update if it passes `should_overwrite`. Values are clamped
    /// to [0, 1]. Returns whether the estimate changed.
    pub fn propose(&mut self, probability: f64, confidence: f64, provenance: Provenance) -> bool {
        let probability = clamp_unit(probability);
        let confidence = clamp_unit(confidence);
        if !should_overwrite(self.confidence, self.provenance, confidence, provenance) {
            return false;
        }
        self.replace(probability, confidence, provenance);
        true
    }

    /// Overwrite unconditionally, recording the previous value.
    pub fn force(&mut self, probability: f64, confidence: f64, provenance: Provenance) {
        self.replace(clamp_unit(probability), clamp_unit(confidence), provenance);
    }

    /// Adjust the probability in place without touching confidence or
    /// provenance. Certain estimates are left alone.
    pub fn scale(&mut self, factor: f64, min: f64, max: f64) {
        if self.is_certain() {
            return;
        }
        self.mine_probability = (self.mine_probability * factor).clamp(min, max);
    }

    /// Drop back to `Initial` unless the estimate is terminal.
    pub fn reset_if_uncertain(&mut self) {
        if self.is_certain() || self.provenance == Provenance::Initial {
            return;
        }
        self.replace(0.0, 0.0, Provenance::Initial);
    }

    fn replace(&mut self, probability: f64, confidence: f64, provenance: Provenance) {
        if self.history.len() == ESTIMATE_HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(PriorEstimate {
            mine_probability: self.mine_probability,
            confidence: self.confidence,
            provenance: self.provenance,
        });
        self.mine_probability = probability;
        self.confidence = confidence;
        self.provenance = provenance;
    }
}

#[inline]
pub fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Position-derived geometry, fixed at grid creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Geometry {
    pub is_corner: bool,
    pub is_edge: bool,
    /// Chebyshev distance to the nearest border row/column (0 on the edge).
    pub distance_to_edge: usize,
}

impl Geometry {
    pub fn new(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        let on_row_border = row == 0 || row + 1 == rows;
        let on_col_border = col == 0 || col + 1 == cols;
        let distance_to_edge = row
            .min(rows - 1 - row)
            .min(col)
            .min(cols - 1 - col);
        Self {
            is_corner: on_row_border && on_col_border,
            is_edge: on_row_border || on_col_border,
            distance_to_edge,
        }
    }

    /// Ordering key for placement preference: corner, then edge, then interior.
    pub fn placement_rank(&self) -> u8 {
        if self.is_corner {
            0
        } else if self.is_edge {
            1
        } else {
            2
        }
    }
}

/// Kind of a recorded move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MoveKind {
    Probe,
    FlagBatch,
}

/// One entry of the per-game move log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoveRecord {
    pub row: usize,
    pub col: usize,
    pub kind: MoveKind,
    /// Oracle answer for probes; `None` for flags.
    pub ground_truth: Option<CellValue>,
}

/// Pre-computed neighbor cache for all cells.
///
/// Stores the 8-directional neighbors (clipped to grid bounds) for every cell
/// in row-major offset order. Indexed by `row * cols + col`.
pub struct NeighborCache {
    pub rows: usize,
    pub cols: usize,
    /// Flat storage of all neighbor pairs.
    data: Vec<Position>,
    /// offsets[i]..offsets[i+1] is the neighbor slice for cell i.
    offsets: Vec<usize>,
}

impl NeighborCache {
    pub fn new(rows: usize, cols: usize) -> Self {
        let total = rows * cols;
        let mut data = Vec::with_capacity(total * 8);
        let mut offsets = Vec::with_capacity(total + 1);

        for row in 0..rows {
            for col in 0..cols {
                offsets.push(data.len());
                for dr in -1i32..=1 {
                    for dc in -1i32..=1 {
                        if dr == 0 && dc == 0 {
                            continue;
                        }
                        let nr = row as i32 + dr;
                        let nc = col as i32 + dc;
                        if nr >= 0 && nr < rows as i32 && nc >= 0 && nc < cols as i32 {
                            data.push((nr as usize, nc as usize));
                        }
                    }
                }
            }
        }
        offsets.push(data.len()); // sentinel

        Self {
            rows,
            cols,
            data,
            offsets,
        }
    }

    #[inline(always)]
    pub fn get(&self, row: usize, col: usize) -> &[Position] {
        let idx = row * self.cols + col;
        &self.data[self.offsets[idx]..self.offsets[idx + 1]]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_keys_are_distinct() {
        let mut keys = std::collections::HashSet::new();
        for row in [0usize, 1, 17, 499] {
            for col in [0usize, 3, 255, 1023] {
                assert!(keys.insert(cell_key(row, col)));
            }
        }
        assert_eq!(cell_key(1, 0), 1 << 16);
    }

    #[test]
    fn test_neighbor_cache_counts() {
        let nc = NeighborCache::new(5, 5);
        assert_eq!(nc.get(0, 0).len(), 3);
        assert_eq!(nc.get(0, 2).len(), 5);
        assert_eq!(nc.get(2, 2).len(), 8);
    }

    #[test]
    fn test_neighbor_cache_row_major_order() {
        let nc = NeighborCache::new(3, 3);
        assert_eq!(
            nc.get(1, 1),
            &[(0, 0), (0, 1), (0, 2), (1, 0), (1, 2), (2, 0), (2, 1), (2, 2)]
        );
        assert_eq!(nc.get(0, 0), &[(0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_geometry() {
        let g = Geometry::new(0, 0, 8, 8);
        assert!(g.is_corner && g.is_edge);
        assert_eq!(g.distance_to_edge, 0);

        let g = Geometry::new(0, 4, 8, 8);
        assert!(!g.is_corner && g.is_edge);

        let g = Geometry::new(3, 4, 8, 8);
        assert!(!g.is_edge);
        assert_eq!(g.distance_to_edge, 3);

        let g = Geometry::new(1, 5, 8, 8);
        assert_eq!(g.distance_to_edge, 1);
    }

    #[test]
    fn test_provenance_order() {
        assert!(Provenance::Revealed > Provenance::Flagged);
        assert!(Provenance::Flagged > Provenance::CertainAnalysis);
        assert!(Provenance::CertainAnalysis > Provenance::Restriction);
        assert!(Provenance::Restriction > Provenance::Pattern);
        assert!(Provenance::Pattern > Provenance::SubsetIntersection);
        assert!(Provenance::SubsetIntersection > Provenance::ProbabilityEstimate);
        assert!(Provenance::ProbabilityEstimate > Provenance::MemoryBias);
        assert!(Provenance::MemoryBias > Provenance::HeuristicDefault);
        assert!(Provenance::HeuristicDefault > Provenance::Initial);
    }

    #[test]
    fn test_should_overwrite() {
        use Provenance::*;
        assert!(should_overwrite(0.5, Restriction, 0.6, HeuristicDefault));
        assert!(!should_overwrite(0.6, HeuristicDefault, 0.5, Restriction));
        assert!(should_overwrite(0.6, HeuristicDefault, 0.6, Restriction));
        assert!(!should_overwrite(0.6, Restriction, 0.6, Restriction));
    }

    #[test]
    fn test_certain_estimate_is_sticky() {
        let mut e = ProbabilityEstimate::default();
        assert!(e.propose(0.0, 1.0, Provenance::CertainAnalysis));
        assert!(e.is_certain_safe());
        assert!(!e.propose(0.9, 0.95, Provenance::Restriction));
        assert!(!e.propose(0.5, 1.0, Provenance::MemoryBias));
        e.reset_if_uncertain();
        assert!(e.is_certain_safe());
        e.scale(10.0, 0.05, 0.95);
        assert_eq!(e.mine_probability, 0.0);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut e = ProbabilityEstimate::default();
        for i in 0..20 {
            e.force(0.01 * i as f64, 0.5, Provenance::ProbabilityEstimate);
        }
        assert_eq!(e.history.len(), ESTIMATE_HISTORY_LEN);
    }

    #[test]
    fn test_cell_value_parse() {
        assert_eq!("".parse::<CellValue>().unwrap(), CellValue::Empty);
        assert_eq!("3".parse::<CellValue>().unwrap(), CellValue::Digit(3));
        assert_eq!("mine".parse::<CellValue>().unwrap(), CellValue::Mine);
        assert!("9".parse::<CellValue>().is_err());
        assert!("x".parse::<CellValue>().is_err());
        assert!(CellValue::Empty.is_zero());
        assert!(CellValue::Digit(0).is_zero());
        assert!(!CellValue::Mine.is_zero());
    }
}
