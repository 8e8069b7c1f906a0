//! Ground-truth boards: the oracle the engine plays against.
//!
//! `MineField` places mines at random (optionally keeping a square around a
//! start cell clear) and pre-computes every neighbor count, so answering a
//! probe is a lookup.

use crate::error::EngineError;
use crate::grid::MAX_DIMENSION;
use crate::rng::EngineRng;
use crate::types::{CellValue, NeighborCache, Position};

/// Answers probes with the true content of a cell.
pub trait Oracle {
    fn answer(&mut self, row: usize, col: usize) -> CellValue;
}

/// Cells within `radius` (Chebyshev) of this position get no mine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeZone {
    pub center: Position,
    pub radius: usize,
}

impl SafeZone {
    fn contains(&self, (r, c): Position) -> bool {
        r.abs_diff(self.center.0) <= self.radius && c.abs_diff(self.center.1) <= self.radius
    }
}

pub struct MineField {
    rows: usize,
    cols: usize,
    mines: Vec<bool>,
    counts: Vec<u8>,
}

fn check_dimensions(rows: usize, cols: usize) -> Result<(), EngineError> {
    if rows == 0 || cols == 0 || rows > MAX_DIMENSION || cols > MAX_DIMENSION {
        return Err(EngineError::InvalidDimensions { rows, cols });
    }
    Ok(())
}

/// Randomly place `mine_count` mines outside `safe`. Stops early if the
/// attempt budget runs out, so a crowded board may get fewer mines.
fn place_mines_random(
    rows: usize,
    cols: usize,
    mine_count: usize,
    safe: Option<SafeZone>,
    rng: &mut EngineRng,
) -> Vec<bool> {
    let mut mines = vec![false; rows * cols];
    let mut placed = 0;
    let mut attempts = 0;
    let max_placement_attempts = 100_000.max(rows * cols * 20);

    while placed < mine_count && attempts < max_placement_attempts {
        attempts += 1;
        let r = rng.gen_range(rows);
        let c = rng.gen_range(cols);
        if safe.is_some_and(|z| z.contains((r, c))) {
            continue;
        }
        let idx = r * cols + c;
        if !mines[idx] {
            mines[idx] = true;
            placed += 1;
        }
    }

    if placed < mine_count {
        log::warn!("placed {} of {} requested mines", placed, mine_count);
    }
    mines
}

/// Adjacent-mine count of every cell. Mine cells keep 0.
fn calculate_numbers(mines: &[bool], neighbors: &NeighborCache) -> Vec<u8> {
    let cols = neighbors.cols;
    let mut counts = vec![0u8; mines.len()];

    for r in 0..neighbors.rows {
        for c in 0..cols {
            if mines[r * cols + c] {
                continue;
            }
            counts[r * cols + c] = neighbors
                .get(r, c)
                .iter()
                .filter(|&&(nr, nc)| mines[nr * cols + nc])
                .count() as u8;
        }
    }
    counts
}

impl MineField {
    pub fn random(
        rows: usize,
        cols: usize,
        mine_count: usize,
        safe: Option<SafeZone>,
        rng: &mut EngineRng,
    ) -> Result<Self, EngineError> {
        check_dimensions(rows, cols)?;
        let mines = place_mines_random(rows, cols, mine_count, safe, rng);
        Ok(Self::build(rows, cols, mines))
    }

    /// Fixed layout; out-of-range positions are rejected.
    pub fn from_mines(rows: usize, cols: usize, positions: &[Position]) -> Result<Self, EngineError> {
        check_dimensions(rows, cols)?;
        let mut mines = vec![false; rows * cols];
        for &(row, col) in positions {
            if row >= rows || col >= cols {
                return Err(EngineError::InvalidPosition { row, col, rows, cols });
            }
            mines[row * cols + col] = true;
        }
        Ok(Self::build(rows, cols, mines))
    }

    fn build(rows: usize, cols: usize, mines: Vec<bool>) -> Self {
        let neighbors = NeighborCache::new(rows, cols);
        let counts = calculate_numbers(&mines, &neighbors);
        Self {
            rows,
            cols,
            mines,
            counts,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn mine_count(&self) -> usize {
        self.mines.iter().filter(|&&m| m).count()
    }

    pub fn is_mine(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols && self.mines[row * self.cols + col]
    }

    pub fn mine_positions(&self) -> Vec<Position> {
        (0..self.rows)
            .flat_map(|r| (0..self.cols).map(move |c| (r, c)))
            .filter(|&(r, c)| self.mines[r * self.cols + c])
            .collect()
    }

    /// True content of a cell: a mine, empty for zero, else the digit.
    pub fn value_at(&self, row: usize, col: usize) -> CellValue {
        let idx = row * self.cols + col;
        if self.mines[idx] {
            CellValue::Mine
        } else {
            match self.counts[idx] {
                0 => CellValue::Empty,
                n => CellValue::Digit(n),
            }
        }
    }
}

impl Oracle for MineField {
    fn answer(&mut self, row: usize, col: usize) -> CellValue {
        self.value_at(row, col)
    }
}
