//! Board state: cells, derived geometry and the constraint set.
//!
//! Every reveal or flag change bumps a generation counter. Constraints are a
//! pure function of cell state and are rebuilt in full when the counter has
//! moved since the last rebuild.

use serde::Serialize;

use crate::error::EngineError;
use crate::types::{CellValue, Geometry, NeighborCache, Position, ProbabilityEstimate, Provenance};

/// Largest supported side length; positions must fit in a packed cell key.
pub const MAX_DIMENSION: usize = u16::MAX as usize;

/// One grid position.
#[derive(Debug, Clone)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
    pub geometry: Geometry,
    revealed: bool,
    flagged: bool,
    value: Option<CellValue>,
    constraints: Vec<usize>,
    estimate: ProbabilityEstimate,
}

impl Cell {
    fn new(row: usize, col: usize, rows: usize, cols: usize) -> Self {
        Self {
            row,
            col,
            geometry: Geometry::new(row, col, rows, cols),
            revealed: false,
            flagged: false,
            value: None,
            constraints: Vec::new(),
            estimate: ProbabilityEstimate::default(),
        }
    }

    pub fn position(&self) -> Position {
        (self.row, self.col)
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn is_flagged(&self) -> bool {
        self.flagged
    }

    /// Neither revealed nor flagged.
    pub fn is_unknown(&self) -> bool {
        !self.revealed && !self.flagged
    }

    pub fn value(&self) -> Option<CellValue> {
        self.value
    }

    /// Indices into `Grid::constraints` of the constraints covering this cell.
    pub fn constraints(&self) -> &[usize] {
        &self.constraints
    }

    pub fn estimate(&self) -> &ProbabilityEstimate {
        &self.estimate
    }

    fn reset(&mut self) {
        self.revealed = false;
        self.flagged = false;
        self.value = None;
        self.constraints.clear();
        self.estimate = ProbabilityEstimate::default();
    }
}

/// The count implied by one revealed digit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Constraint {
    pub origin: Position,
    pub value: u8,
    pub flags_placed: u8,
    /// `value - flags_placed`; negative means the flags already overshoot.
    pub mines_remaining: i32,
    /// Unrevealed, unflagged neighbors in neighbor order.
    pub unknowns: Vec<Position>,
}

impl Constraint {
    /// Local mine ratio over the unknowns, clamped to [0, 1].
    pub fn ratio(&self) -> f64 {
        if self.unknowns.is_empty() {
            return 0.0;
        }
        (self.mines_remaining as f64 / self.unknowns.len() as f64).clamp(0.0, 1.0)
    }
}

pub struct Grid {
    rows: usize,
    cols: usize,
    cells: Vec<Cell>,
    neighbors: NeighborCache,
    constraints: Vec<Constraint>,
    flag_count: usize,
    generation: u64,
    constraints_generation: Option<u64>,
}

impl Grid {
    pub fn new(rows: usize, cols: usize) -> Result<Self, EngineError> {
        if rows == 0 || cols == 0 || rows > MAX_DIMENSION || cols > MAX_DIMENSION {
            return Err(EngineError::InvalidDimensions { rows, cols });
        }
        let mut cells = Vec::with_capacity(rows * cols);
        for row in 0..rows {
            for col in 0..cols {
                cells.push(Cell::new(row, col, rows, cols));
            }
        }
        Ok(Self {
            rows,
            cols,
            cells,
            neighbors: NeighborCache::new(rows, cols),
            constraints: Vec::new(),
            flag_count: 0,
            generation: 0,
            constraints_generation: None,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline(always)]
    fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    fn checked_index(&self, row: usize, col: usize) -> Result<usize, EngineError> {
        if row < self.rows && col < self.cols {
            Ok(self.index(row, col))
        } else {
            Err(EngineError::InvalidPosition {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            })
        }
    }

    pub fn in_bounds(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Result<&Cell, EngineError> {
        let idx = self.checked_index(row, col)?;
        Ok(&self.cells[idx])
    }

    /// Unchecked lookup for positions produced by the grid itself.
    #[inline(always)]
    pub fn cell(&self, pos: Position) -> &Cell {
        &self.cells[self.index(pos.0, pos.1)]
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Mutable estimate access for the engines.
    #[inline(always)]
    pub fn estimate_mut(&mut self, pos: Position) -> &mut ProbabilityEstimate {
        let idx = self.index(pos.0, pos.1);
        &mut self.cells[idx].estimate
    }

    #[inline(always)]
    pub fn neighbors(&self, row: usize, col: usize) -> &[Position] {
        self.neighbors.get(row, col)
    }

    /// Record an oracle answer. Returns `Ok(false)` if the cell was already
    /// revealed.
    pub fn reveal(&mut self, row: usize, col: usize, value: CellValue) -> Result<bool, EngineError> {
        let idx = self.checked_index(row, col)?;
        let cell = &mut self.cells[idx];
        if cell.revealed {
            return Ok(false);
        }
        if cell.flagged {
            cell.flagged = false;
            self.flag_count -= 1;
        }
        cell.value = Some(value);
        cell.revealed = true;
        let p = if value == CellValue::Mine { 1.0 } else { 0.0 };
        cell.estimate.force(p, 1.0, Provenance::Revealed);
        self.generation += 1;
        Ok(true)
    }

    /// Place or remove a flag. Revealed cells are left untouched. Returns
    /// whether the flag state changed.
    pub fn set_flag(&mut self, row: usize, col: usize, flagged: bool) -> Result<bool, EngineError> {
        let idx = self.checked_index(row, col)?;
        let cell = &mut self.cells[idx];
        if cell.revealed || cell.flagged == flagged {
            return Ok(false);
        }
        cell.flagged = flagged;
        if flagged {
            self.flag_count += 1;
            cell.estimate.force(1.0, 1.0, Provenance::Flagged);
        } else {
            self.flag_count -= 1;
            cell.estimate.force(0.0, 0.0, Provenance::Initial);
        }
        self.generation += 1;
        Ok(true)
    }

    /// Return every cell to its initial state.
    pub fn reset(&mut self) {
        for cell in &mut self.cells {
            cell.reset();
        }
        self.constraints.clear();
        self.flag_count = 0;
        self.generation += 1;
        self.constraints_generation = None;
    }

    pub fn flag_count(&self) -> usize {
        self.flag_count
    }

    /// Invalidation token; changes on every reveal or flag mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_dirty(&self) -> bool {
        self.constraints_generation != Some(self.generation)
    }

    /// Rebuild constraints if any mutation happened since the last rebuild.
    /// Returns whether a rebuild ran.
    pub fn ensure_constraints(&mut self) -> bool {
        if !self.is_dirty() {
            return false;
        }
        self.recompute_constraints();
        true
    }

    /// Full O(R·C) rebuild of the constraint list and per-cell attachments.
    pub fn recompute_constraints(&mut self) {
        for cell in &mut self.cells {
            cell.constraints.clear();
        }

        let mut constraints = Vec::new();
        for idx in 0..self.cells.len() {
            let cell = &self.cells[idx];
            if !cell.revealed {
                continue;
            }
            let Some(value) = cell.value.and_then(CellValue::mine_count) else {
                continue;
            };

            let mut flags_placed = 0u8;
            let mut unknowns = Vec::new();
            for &(nr, nc) in self.neighbors.get(cell.row, cell.col) {
                let n = &self.cells[self.index(nr, nc)];
                if n.flagged {
                    flags_placed += 1;
                } else if !n.revealed {
                    unknowns.push((nr, nc));
                }
            }
            constraints.push(Constraint {
                origin: (cell.row, cell.col),
                value,
                flags_placed,
                mines_remaining: value as i32 - flags_placed as i32,
                unknowns,
            });
        }

        for (id, constraint) in constraints.iter().enumerate() {
            for &(r, c) in &constraint.unknowns {
                let idx = self.index(r, c);
                self.cells[idx].constraints.push(id);
            }
        }

        self.constraints = constraints;
        self.constraints_generation = Some(self.generation);
    }

    /// Constraints as of the last rebuild.
    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    // ─── Bulk queries ───────────────────────────────────────────────────────

    fn positions_where(&self, pred: impl Fn(&Cell) -> bool) -> Vec<Position> {
        self.cells.iter().filter(|c| pred(c)).map(Cell::position).collect()
    }

    pub fn unrevealed(&self) -> Vec<Position> {
        self.positions_where(|c| !c.revealed)
    }

    /// Unrevealed and unflagged.
    pub fn unknown_cells(&self) -> Vec<Position> {
        self.positions_where(Cell::is_unknown)
    }

    pub fn flagged(&self) -> Vec<Position> {
        self.positions_where(|c| c.flagged)
    }

    pub fn revealed(&self) -> Vec<Position> {
        self.positions_where(|c| c.revealed)
    }

    pub fn numeric_revealed(&self) -> Vec<Position> {
        self.positions_where(|c| c.revealed && c.value.and_then(CellValue::mine_count).is_some())
    }

    pub fn certain_mines(&self) -> Vec<Position> {
        self.positions_where(|c| !c.revealed && c.estimate.is_certain_mine())
    }

    pub fn certain_safe(&self) -> Vec<Position> {
        self.positions_where(|c| c.is_unknown() && c.estimate.is_certain_safe())
    }

    /// Unknown cells adjacent to at least one revealed cell.
    pub fn frontier(&self) -> Vec<Position> {
        self.positions_where(|c| c.is_unknown() && self.is_adjacent_to_revealed((c.row, c.col)))
    }

    pub fn unrevealed_count(&self) -> usize {
        self.cells.iter().filter(|c| !c.revealed).count()
    }

    pub fn is_adjacent_to_revealed(&self, pos: Position) -> bool {
        self.neighbors(pos.0, pos.1)
            .iter()
            .any(|&n| self.cell(n).revealed)
    }

    /// True when a revealed empty/zero neighbor proves `pos` safe.
    pub fn is_adjacent_to_revealed_zero(&self, pos: Position) -> bool {
        self.neighbors(pos.0, pos.1).iter().any(|&n| {
            let c = self.cell(n);
            c.revealed && c.value.is_some_and(CellValue::is_zero)
        })
    }

    /// Build a grid from ASCII rows for tests: `.` hidden, `F` flagged,
    /// `*` revealed mine, `_` revealed empty, digits revealed numbers.
    #[cfg(test)]
    pub(crate) fn from_ascii(lines: &[&str]) -> Grid {
        let rows = lines.len();
        let cols = lines[0].len();
        let mut grid = Grid::new(rows, cols).unwrap();
        for (r, line) in lines.iter().enumerate() {
            for (c, ch) in line.chars().enumerate() {
                match ch {
                    '.' => {}
                    'F' => {
                        grid.set_flag(r, c, true).unwrap();
                    }
                    '*' => {
                        grid.reveal(r, c, CellValue::Mine).unwrap();
                    }
                    '_' => {
                        grid.reveal(r, c, CellValue::Empty).unwrap();
                    }
                    d => {
                        let n = d.to_digit(10).expect("digit") as u8;
                        grid.reveal(r, c, CellValue::Digit(n)).unwrap();
                    }
                }
            }
        }
        grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_initializes_geometry() {
        let grid = Grid::new(4, 6).unwrap();
        assert_eq!(grid.len(), 24);
        assert!(grid.get(0, 0).unwrap().geometry.is_corner);
        assert!(grid.get(3, 5).unwrap().geometry.is_corner);
        assert!(grid.get(0, 3).unwrap().geometry.is_edge);
        assert!(!grid.get(1, 2).unwrap().geometry.is_edge);
        assert_eq!(grid.get(1, 2).unwrap().geometry.distance_to_edge, 1);
    }

    #[test]
    fn test_invalid_dimensions() {
        assert!(matches!(Grid::new(0, 5), Err(EngineError::InvalidDimensions { .. })));
    }

    #[test]
    fn test_get_out_of_range() {
        let grid = Grid::new(3, 3).unwrap();
        assert!(matches!(
            grid.get(3, 0),
            Err(EngineError::InvalidPosition { row: 3, col: 0, .. })
        ));
    }

    #[test]
    fn test_reveal_is_idempotent() {
        let mut grid = Grid::new(3, 3).unwrap();
        let g0 = grid.generation();
        assert!(grid.reveal(1, 1, CellValue::Digit(2)).unwrap());
        assert!(grid.is_dirty());
        let g1 = grid.generation();
        assert!(g1 > g0);
        assert!(!grid.reveal(1, 1, CellValue::Digit(3)).unwrap());
        assert_eq!(grid.generation(), g1);
        assert_eq!(grid.get(1, 1).unwrap().value(), Some(CellValue::Digit(2)));
    }

    #[test]
    fn test_reveal_out_of_range_does_not_mutate() {
        let mut grid = Grid::new(3, 3).unwrap();
        let g = grid.generation();
        assert!(grid.reveal(5, 5, CellValue::Empty).is_err());
        assert_eq!(grid.generation(), g);
    }

    #[test]
    fn test_flag_counts_and_revealed_noop() {
        let mut grid = Grid::new(3, 3).unwrap();
        assert!(grid.set_flag(0, 0, true).unwrap());
        assert!(!grid.set_flag(0, 0, true).unwrap());
        assert_eq!(grid.flag_count(), 1);
        assert!(grid.set_flag(0, 0, false).unwrap());
        assert_eq!(grid.flag_count(), 0);

        grid.reveal(1, 1, CellValue::Digit(1)).unwrap();
        assert!(!grid.set_flag(1, 1, true).unwrap());
        assert!(!grid.get(1, 1).unwrap().is_flagged());
        assert_eq!(grid.flag_count(), 0);
    }

    #[test]
    fn test_constraints_rebuild_only_when_dirty() {
        let mut grid = Grid::from_ascii(&["F..", ".2.", "..."]);
        assert!(grid.ensure_constraints());
        assert!(!grid.ensure_constraints());

        let c = &grid.constraints()[0];
        assert_eq!(c.origin, (1, 1));
        assert_eq!(c.value, 2);
        assert_eq!(c.flags_placed, 1);
        assert_eq!(c.mines_remaining, 1);
        assert_eq!(c.unknowns.len(), 7);
        assert_eq!(grid.cell((0, 1)).constraints(), &[0]);
        assert!(grid.cell((0, 0)).constraints().is_empty());

        grid.reveal(2, 2, CellValue::Digit(1)).unwrap();
        assert!(grid.ensure_constraints());
        assert_eq!(grid.constraints().len(), 2);
        assert_eq!(grid.cell((2, 1)).constraints(), &[0, 1]);
    }

    #[test]
    fn test_bulk_queries() {
        let grid = Grid::from_ascii(&["_1.", "F2.", "..*"]);
        assert_eq!(grid.revealed().len(), 4);
        assert_eq!(grid.numeric_revealed(), vec![(0, 0), (0, 1), (1, 1)]);
        assert_eq!(grid.flagged(), vec![(1, 0)]);
        assert_eq!(grid.unrevealed().len(), 5);
        assert_eq!(grid.unknown_cells().len(), 4);
        assert_eq!(grid.certain_mines(), vec![(1, 0)]);
        assert!(grid.is_adjacent_to_revealed_zero((1, 0)));
        assert!(!grid.is_adjacent_to_revealed_zero((2, 2)));
    }

    #[test]
    fn test_reset() {
        let mut grid = Grid::from_ascii(&["F1", ".."]);
        grid.reset();
        assert_eq!(grid.flag_count(), 0);
        assert_eq!(grid.unrevealed_count(), 4);
        assert!(grid.is_dirty());
    }
}
