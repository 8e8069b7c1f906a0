//! Mine-probability estimation for cells the constraint engine could not
//! settle.
//!
//! `compute_all` runs six stages in order: base density, local restriction,
//! component analysis, frontier refinement, memory bias and finalization.
//! Every write goes through `ProbabilityEstimate::propose`, so a stage only
//! replaces an estimate it is more confident about. Certain estimates
//! (0 or 1 at confidence 1) are never touched.

use serde::Serialize;
use std::collections::HashMap;

use crate::config::EngineConfig;
use crate::gaussian::{self, Component};
use crate::grid::Grid;
use crate::memory::PatternMemory;
use crate::rng::EngineRng;
use crate::types::{cell_key, CellValue, Position, Provenance};

/// Largest component the bit-mask enumerator accepts.
const MAX_MASK_BITS: usize = 24;

const EXACT_CONFIDENCE: f64 = 0.8;
const SAMPLED_CONFIDENCE: f64 = 0.6;
const APPROXIMATE_CONFIDENCE: f64 = 0.6;
const FRONTIER_CONFIDENCE_CAP: f64 = 0.7;
const LOW_CONFIDENCE: f64 = 0.5;
const HISTORY_MIN_CONFIDENCE: f64 = 0.4;
const HISTORY_CAP: f64 = 0.9;
const PROMOTE_CONFIDENCE: f64 = 0.95;

/// Counters from one `compute_all` pass, for logging and tests.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ProbabilitySummary {
    pub unknown_cells: usize,
    pub exact_components: usize,
    pub sampled_components: usize,
    pub approximated_components: usize,
    pub memory_adjusted: usize,
    pub rescaled: bool,
    pub certain_safe: usize,
    pub certain_mines: usize,
}

pub struct ProbabilityEngine {
    config: EngineConfig,
    rng: EngineRng,
}

impl ProbabilityEngine {
    pub fn new(config: EngineConfig, rng: EngineRng) -> Self {
        Self { config, rng }
    }

    /// Refresh the estimate of every unrevealed cell.
    pub fn compute_all(&mut self, grid: &mut Grid, memory: Option<&dyn PatternMemory>) -> ProbabilitySummary {
        grid.ensure_constraints();
        let unknown = grid.unknown_cells();
        for &pos in &unknown {
            grid.estimate_mut(pos).reset_if_uncertain();
        }

        let mut summary = ProbabilitySummary {
            unknown_cells: unknown.len(),
            ..Default::default()
        };

        let remaining = self.apply_base_density(grid, &unknown);
        self.apply_local_restriction(grid);
        self.apply_component_analysis(grid, &unknown, &mut summary);
        self.apply_frontier_refinement(grid, &unknown);
        if let Some(history) = memory {
            summary.memory_adjusted = self.apply_memory_bias(grid, &unknown, history);
        }
        summary.rescaled = self.finalize(grid, &unknown, remaining);

        summary.certain_safe = grid.certain_safe().len();
        summary.certain_mines = unknown
            .iter()
            .filter(|&&p| grid.cell(p).estimate().is_certain_mine())
            .count();

        log::debug!(
            "probability pass: {} unknown, {}/{}/{} exact/sampled/approx components, {} certain safe",
            summary.unknown_cells,
            summary.exact_components,
            summary.sampled_components,
            summary.approximated_components,
            summary.certain_safe
        );
        summary
    }

    // ─── Stage 1: Base density ──────────────────────────────────────────────

    /// Returns the density-implied number of mines still hidden.
    fn apply_base_density(&self, grid: &mut Grid, unknown: &[Position]) -> f64 {
        let expected = (self.config.base_density * grid.len() as f64).round();
        let remaining = (expected - grid.flag_count() as f64).max(0.0);
        if unknown.is_empty() {
            return remaining;
        }
        let base = remaining / unknown.len() as f64;

        for &pos in unknown {
            let g = grid.cell(pos).geometry;
            let factor = if g.is_corner {
                self.config.corner_discount
            } else if g.is_edge {
                self.config.edge_discount
            } else if g.distance_to_edge == 1 {
                self.config.near_edge_discount
            } else {
                1.0
            };
            grid.estimate_mut(pos)
                .propose(base * factor, self.config.base_confidence, Provenance::HeuristicDefault);
        }
        remaining
    }

    // ─── Stage 2: Local restriction ─────────────────────────────────────────

    /// Cells covered by exactly the same constraints form a group, and one
    /// constraint's remaining mines are spread evenly over it. A group under
    /// a single constraint uses that constraint. A group under several uses
    /// the one whose unknowns are exactly the group, and is skipped if none
    /// is.
    fn apply_local_restriction(&self, grid: &mut Grid) {
        let mut groups: HashMap<Vec<usize>, Vec<Position>> = HashMap::new();
        for cell in grid.cells() {
            if cell.is_unknown() && !cell.constraints().is_empty() {
                groups
                    .entry(cell.constraints().to_vec())
                    .or_default()
                    .push(cell.position());
            }
        }

        for (ids, cells) in groups {
            let size = cells.len();
            let constraints = grid.constraints();
            let source = match ids.as_slice() {
                [only] => Some(&constraints[*only]),
                _ => ids.iter().map(|&id| &constraints[id]).find(|c| c.unknowns.len() == size),
            };
            let Some(constraint) = source else {
                continue;
            };
            let p = constraint.mines_remaining.clamp(0, size as i32) as f64 / size as f64;
            let conf = 0.5 + 0.3 / (size as f64).sqrt();
            for pos in cells {
                grid.estimate_mut(pos).propose(p, conf, Provenance::Restriction);
            }
        }
    }

    // ─── Stage 3: Component analysis ────────────────────────────────────────

    fn apply_component_analysis(
        &mut self,
        grid: &mut Grid,
        unknown: &[Position],
        summary: &mut ProbabilitySummary,
    ) {
        for component in gaussian::connected_components(grid) {
            let n = component.cells.len();
            let (probabilities, conf) = if n <= self.config.exact_enumeration_limit {
                summary.exact_components += 1;
                (enumerate_exact(grid, &component), EXACT_CONFIDENCE)
            } else if n <= self.config.max_enumeration_cells {
                summary.sampled_components += 1;
                let sampled = enumerate_sampled(grid, &component, self.config.sample_count, &mut self.rng);
                match sampled {
                    Some(p) => (Some(p), SAMPLED_CONFIDENCE),
                    None => (approximate_linear(grid, &component), APPROXIMATE_CONFIDENCE),
                }
            } else {
                summary.approximated_components += 1;
                (approximate_linear(grid, &component), APPROXIMATE_CONFIDENCE)
            };

            let Some(probabilities) = probabilities else {
                log::debug!("component of {} cells has no consistent assignment", n);
                continue;
            };
            for (&pos, &p) in component.cells.iter().zip(&probabilities) {
                grid.estimate_mut(pos)
                    .propose(p, conf, Provenance::ProbabilityEstimate);
            }
        }

        for &pos in unknown {
            if grid.cell(pos).constraints().is_empty() {
                grid.estimate_mut(pos).propose(
                    self.config.unconstrained_probability,
                    self.config.unconstrained_confidence,
                    Provenance::HeuristicDefault,
                );
            }
        }
    }

    // ─── Stage 4: Frontier refinement ───────────────────────────────────────

    fn apply_frontier_refinement(&self, grid: &mut Grid, unknown: &[Position]) {
        for &pos in unknown {
            if !grid.is_adjacent_to_revealed(pos) {
                let estimate = grid.estimate_mut(pos);
                if estimate.confidence < LOW_CONFIDENCE {
                    estimate.scale(self.config.non_frontier_damping, 0.0, 1.0);
                }
                continue;
            }

            let mut weighted = 0.0;
            let mut total_weight = 0.0;
            let mut contributors = 0usize;
            for &id in grid.cell(pos).constraints() {
                let c = &grid.constraints()[id];
                let weight = 1.0 / c.unknowns.len() as f64;
                weighted += weight * c.ratio();
                total_weight += weight;
                contributors += 1;
            }
            if contributors == 0 {
                continue;
            }

            let p = weighted / total_weight;
            let conf = (0.4 + 0.1 * contributors as f64).min(FRONTIER_CONFIDENCE_CAP);
            grid.estimate_mut(pos)
                .propose(p, conf, Provenance::ProbabilityEstimate);
        }
    }

    // ─── Stage 5: Memory bias ───────────────────────────────────────────────

    fn apply_memory_bias(&self, grid: &mut Grid, unknown: &[Position], history: &dyn PatternMemory) -> usize {
        let (rows, cols) = (grid.rows(), grid.cols());
        let mut adjusted = 0;

        for &pos in unknown {
            let Some(occurrence) = history.mine_occurrence(pos.0, pos.1, rows, cols) else {
                continue;
            };
            if occurrence.count <= 0.0 {
                continue;
            }

            let recent_bonus = if occurrence.recent { 0.1 } else { 0.0 };
            let hist_p = (0.15 * occurrence.count + recent_bonus).min(HISTORY_CAP);
            let hist_conf = (0.3 + 0.1 * occurrence.count).min(HISTORY_CAP);

            let estimate = grid.estimate_mut(pos);
            if estimate.is_certain() || hist_conf <= HISTORY_MIN_CONFIDENCE || hist_conf <= estimate.confidence {
                continue;
            }
            let cur_p = estimate.mine_probability;
            let cur_conf = estimate.confidence;
            let blended = (cur_p * cur_conf + hist_p * hist_conf) / (cur_conf + hist_conf);
            if estimate.propose(blended, hist_conf, Provenance::MemoryBias) {
                adjusted += 1;
            }
        }
        adjusted
    }

    // ─── Stage 6: Finalization ──────────────────────────────────────────────

    /// Returns whether the global rescale ran.
    fn finalize(&self, grid: &mut Grid, unknown: &[Position], remaining: f64) -> bool {
        for &pos in unknown {
            let estimate = grid.estimate_mut(pos);
            if estimate.is_certain() || estimate.confidence <= PROMOTE_CONFIDENCE {
                continue;
            }
            if estimate.mine_probability > 0.99 {
                estimate.force(1.0, 1.0, Provenance::CertainAnalysis);
            } else if estimate.mine_probability < 0.01 {
                estimate.force(0.0, 1.0, Provenance::CertainAnalysis);
            }
        }

        let certain_mines = unknown
            .iter()
            .filter(|&&p| grid.cell(p).estimate().is_certain_mine())
            .count() as f64;
        let target = (remaining - certain_mines).max(0.0);
        let mass: f64 = unknown
            .iter()
            .map(|&p| grid.cell(p).estimate())
            .filter(|e| !e.is_certain())
            .map(|e| e.mine_probability)
            .sum();

        let mut rescaled = false;
        if target > 0.0 && mass > 0.0 && (mass - target).abs() / target > self.config.mass_deviation {
            let factor = target / mass;
            for &pos in unknown {
                grid.estimate_mut(pos)
                    .scale(factor, self.config.rescale_min, self.config.rescale_max);
            }
            rescaled = true;
        }

        for &pos in unknown {
            if grid.is_adjacent_to_revealed_zero(pos) {
                let estimate = grid.estimate_mut(pos);
                if !(estimate.is_certain_safe() && estimate.provenance >= Provenance::CertainAnalysis) {
                    estimate.force(0.0, 1.0, Provenance::CertainAnalysis);
                }
            } else if is_sole_corner_of_one(grid, pos) && !grid.cell(pos).estimate().is_certain_mine() {
                grid.estimate_mut(pos)
                    .force(1.0, 1.0, Provenance::CertainAnalysis);
            }
        }

        rescaled
    }
}

/// A corner that is the only unrevealed neighbor of some revealed 1.
fn is_sole_corner_of_one(grid: &Grid, pos: Position) -> bool {
    if !grid.cell(pos).geometry.is_corner {
        return false;
    }
    grid.neighbors(pos.0, pos.1).iter().any(|&(r, c)| {
        let n = grid.cell((r, c));
        n.is_revealed()
            && n.value() == Some(CellValue::Digit(1))
            && grid
                .neighbors(r, c)
                .iter()
                .filter(|&&m| !grid.cell(m).is_revealed())
                .count()
                == 1
    })
}

// ─── Enumeration helpers ────────────────────────────────────────────────────

/// Per-constraint `(mask, mines)` over the component's cell indices.
fn constraint_masks(grid: &Grid, component: &Component) -> Option<Vec<(u64, u32)>> {
    let index: HashMap<u32, usize> = component
        .cells
        .iter()
        .enumerate()
        .map(|(i, &(r, c))| (cell_key(r, c), i))
        .collect();

    component
        .constraints
        .iter()
        .map(|&id| {
            let c = &grid.constraints()[id];
            if c.mines_remaining < 0 {
                return None;
            }
            let mask = c
                .unknowns
                .iter()
                .filter_map(|&(r, cc)| index.get(&cell_key(r, cc)))
                .fold(0u64, |m, &i| m | (1u64 << i));
            Some((mask, c.mines_remaining as u32))
        })
        .collect()
}

#[inline]
fn is_consistent(assignment: u64, masks: &[(u64, u32)]) -> bool {
    masks
        .iter()
        .all(|&(mask, mines)| (assignment & mask).count_ones() == mines)
}

fn tally(assignments: impl Iterator<Item = u64>, n: usize, masks: &[(u64, u32)]) -> Option<Vec<f64>> {
    let mut counts = vec![0u64; n];
    let mut valid = 0u64;
    for assignment in assignments {
        if !is_consistent(assignment, masks) {
            continue;
        }
        valid += 1;
        for (i, count) in counts.iter_mut().enumerate() {
            if (assignment >> i) & 1 == 1 {
                *count += 1;
            }
        }
    }
    if valid == 0 {
        return None;
    }
    Some(counts.into_iter().map(|c| c as f64 / valid as f64).collect())
}

/// Fraction of all consistent assignments placing a mine on each cell.
pub(crate) fn enumerate_exact(grid: &Grid, component: &Component) -> Option<Vec<f64>> {
    let n = component.cells.len();
    if n == 0 || n > MAX_MASK_BITS {
        return None;
    }
    let masks = constraint_masks(grid, component)?;
    tally(0..(1u64 << n), n, &masks)
}

/// Same estimate from uniformly random assignments.
pub(crate) fn enumerate_sampled(
    grid: &Grid,
    component: &Component,
    samples: usize,
    rng: &mut EngineRng,
) -> Option<Vec<f64>> {
    let n = component.cells.len();
    if n == 0 || n > MAX_MASK_BITS {
        return None;
    }
    let masks = constraint_masks(grid, component)?;
    let space = 1usize << n;
    let draws: Vec<u64> = (0..samples).map(|_| rng.gen_range(space) as u64).collect();
    tally(draws.into_iter(), n, &masks)
}

/// Least-squares solution of the component's equations, clamped to [0, 1].
pub(crate) fn approximate_linear(grid: &Grid, component: &Component) -> Option<Vec<f64>> {
    let system = gaussian::build_system(grid, component);
    let solution = gaussian::least_squares(&system, component.cells.len())?;
    Some(solution.into_iter().map(|v| v.clamp(0.0, 1.0)).collect())
}
