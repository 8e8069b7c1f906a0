//! Exact deduction of certain mines.
//!
//! Contains:
//! - Pass 1: Basic counting
//! - Pass 2: Subset / intersection logic
//! - Pass 3: Fixed shape patterns (1-2-1, shared corner, edge 1)
//! - Pass 4: Linear system (delegated to gaussian.rs)
//! - Global consistency filter and commit
//!
//! `ConstraintEngine::run` repeats the passes until a round commits no new
//! flag, so a second run on an unchanged board finds nothing.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::gaussian;
use crate::grid::{Constraint, Grid};
use crate::types::{cell_key, Position, Provenance};

/// Which pass produced a conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeductionRule {
    BasicCounting,
    Subset,
    Intersection,
    PatternOneTwoOne,
    PatternSharedCorner,
    PatternEdgeOne,
    LinearSystem,
}

impl DeductionRule {
    pub fn provenance(self) -> Provenance {
        match self {
            DeductionRule::BasicCounting | DeductionRule::LinearSystem => Provenance::CertainAnalysis,
            DeductionRule::Subset | DeductionRule::Intersection => Provenance::SubsetIntersection,
            DeductionRule::PatternOneTwoOne
            | DeductionRule::PatternSharedCorner
            | DeductionRule::PatternEdgeOne => Provenance::Pattern,
        }
    }
}

/// A committed flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlagDeduction {
    pub position: Position,
    pub rule: DeductionRule,
    /// Round of the fixpoint loop that produced it, starting at 1.
    pub iteration: u32,
}

/// A cell proven safe and marked as such in its estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafeDeduction {
    pub position: Position,
    pub rule: DeductionRule,
}

/// A mine candidate rejected by the global filter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedCandidate {
    pub position: Position,
    pub rule: DeductionRule,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DeductionReport {
    /// Rounds executed by this run.
    pub iterations: u32,
    pub flags: Vec<FlagDeduction>,
    pub safe: Vec<SafeDeduction>,
    pub dropped: Vec<DroppedCandidate>,
}

impl DeductionReport {
    pub fn has_flags(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// Candidate conclusions of one round, first rule wins per cell.
#[derive(Default)]
struct Candidates {
    mines: Vec<(Position, DeductionRule)>,
    safe: Vec<(Position, DeductionRule)>,
    mine_keys: HashSet<u32>,
    safe_keys: HashSet<u32>,
}

impl Candidates {
    fn mine(&mut self, pos: Position, rule: DeductionRule) {
        if self.mine_keys.insert(cell_key(pos.0, pos.1)) {
            self.mines.push((pos, rule));
        }
    }

    fn safe(&mut self, pos: Position, rule: DeductionRule) {
        if self.safe_keys.insert(cell_key(pos.0, pos.1)) {
            self.safe.push((pos, rule));
        }
    }

    fn is_empty(&self) -> bool {
        self.mines.is_empty() && self.safe.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ConstraintEngine {
    runs: u64,
}

impl ConstraintEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed `run` calls.
    pub fn runs(&self) -> u64 {
        self.runs
    }

    /// Derive, filter and commit certain mines (and certain-safe marks).
    pub fn run(&mut self, grid: &mut Grid) -> DeductionReport {
        self.runs += 1;
        let mut report = DeductionReport::default();
        let mut dropped_keys: HashSet<u32> = HashSet::new();
        let max_rounds = grid.len() as u32 + 1;

        while report.iterations < max_rounds {
            report.iterations += 1;
            let iteration = report.iterations;
            grid.ensure_constraints();

            let mut candidates = Candidates::default();
            apply_basic_counting(grid.constraints(), &mut candidates);
            apply_subset_logic(grid.constraints(), &mut candidates);
            apply_patterns(grid, &mut candidates);
            apply_linear_system(grid, &mut candidates);

            if candidates.is_empty() {
                break;
            }

            let (accepted, dropped) = global_filter(grid, &candidates);
            for d in dropped {
                if dropped_keys.insert(cell_key(d.position.0, d.position.1)) {
                    log::warn!(
                        "dropping {:?} flag at {:?}: {}",
                        d.rule,
                        d.position,
                        d.reason
                    );
                    report.dropped.push(d);
                }
            }

            // Cells also claimed as mines stay unresolved.
            for &(pos, rule) in &candidates.safe {
                if candidates.mine_keys.contains(&cell_key(pos.0, pos.1)) || !grid.cell(pos).is_unknown() {
                    continue;
                }
                if grid.estimate_mut(pos).propose(0.0, 1.0, rule.provenance()) {
                    report.safe.push(SafeDeduction { position: pos, rule });
                }
            }

            let mut committed = 0;
            for (pos, rule) in accepted {
                if let Ok(true) = grid.set_flag(pos.0, pos.1, true) {
                    committed += 1;
                    report.flags.push(FlagDeduction {
                        position: pos,
                        rule,
                        iteration,
                    });
                }
            }

            log::debug!(
                "deduction round {}: {} flags, {} safe, {} dropped so far",
                iteration,
                committed,
                report.safe.len(),
                report.dropped.len()
            );

            if committed == 0 {
                break;
            }
        }

        report
    }
}

// ─── Pass 1: Basic counting ─────────────────────────────────────────────────

fn apply_basic_counting(constraints: &[Constraint], out: &mut Candidates) {
    for c in constraints {
        if c.unknowns.is_empty() {
            continue;
        }
        if c.mines_remaining > 0 && c.unknowns.len() as i32 == c.mines_remaining {
            for &pos in &c.unknowns {
                out.mine(pos, DeductionRule::BasicCounting);
            }
        } else if c.mines_remaining == 0 {
            for &pos in &c.unknowns {
                out.safe(pos, DeductionRule::BasicCounting);
            }
        }
    }
}

// ─── Pass 2: Subset / intersection ──────────────────────────────────────────

fn apply_subset_logic(constraints: &[Constraint], out: &mut Candidates) {
    let sets: Vec<HashSet<u32>> = constraints
        .iter()
        .map(|c| c.unknowns.iter().map(|&(r, cc)| cell_key(r, cc)).collect())
        .collect();

    for (ia, a) in constraints.iter().enumerate() {
        if a.unknowns.is_empty() || a.mines_remaining < 0 {
            continue;
        }
        for (ib, b) in constraints.iter().enumerate() {
            if ia == ib || b.unknowns.is_empty() || b.mines_remaining < 0 {
                continue;
            }
            // Origins more than two apart cannot share an unknown.
            if a.origin.0.abs_diff(b.origin.0) > 2 || a.origin.1.abs_diff(b.origin.1) > 2 {
                continue;
            }

            let set_a = &sets[ia];
            let set_b = &sets[ib];
            let shared = set_a.intersection(set_b).count();
            if shared == 0 {
                continue;
            }

            let only_a = set_a.len() - shared;
            let only_b = set_b.len() - shared;
            let mr_a = a.mines_remaining;
            let mr_b = b.mines_remaining;

            if only_a == 0 && only_b > 0 {
                // A ⊂ B: the difference holds exactly mr(B) - mr(A) mines.
                let diff_mines = mr_b - mr_a;
                let diff = b.unknowns.iter().filter(|&&(r, c)| !set_a.contains(&cell_key(r, c)));
                if diff_mines > 0 && diff_mines == only_b as i32 {
                    for &pos in diff {
                        out.mine(pos, DeductionRule::Subset);
                    }
                } else if diff_mines == 0 {
                    for &pos in diff {
                        out.safe(pos, DeductionRule::Subset);
                    }
                }
                continue;
            }

            if only_a == 0 || only_b == 0 {
                continue;
            }

            // Partial overlap: bound the mines inside the intersection.
            let i_min = 0.max(mr_a - only_a as i32).max(mr_b - only_b as i32);
            let i_max = (shared as i32).min(mr_a).min(mr_b);
            if i_min > i_max {
                continue;
            }

            let a_exclusive = a.unknowns.iter().filter(|&&(r, c)| !set_b.contains(&cell_key(r, c)));
            if mr_b - only_b as i32 >= mr_a {
                // B forces at least all of A's mines into the intersection.
                for &pos in a_exclusive {
                    out.safe(pos, DeductionRule::Intersection);
                }
            } else if mr_a - i_max == only_a as i32 {
                for &pos in a_exclusive {
                    out.mine(pos, DeductionRule::Intersection);
                }
            }

            if i_min == shared as i32 {
                for &(r, c) in &a.unknowns {
                    if set_b.contains(&cell_key(r, c)) {
                        out.mine((r, c), DeductionRule::Intersection);
                    }
                }
            }
        }
    }
}

// ─── Pass 3: Patterns ───────────────────────────────────────────────────────

fn apply_patterns(grid: &Grid, out: &mut Candidates) {
    let constraints = grid.constraints();
    let by_origin: HashMap<u32, usize> = constraints
        .iter()
        .enumerate()
        .map(|(i, c)| (cell_key(c.origin.0, c.origin.1), i))
        .collect();

    for c in constraints {
        if c.mines_remaining == 2 {
            for horizontal in [true, false] {
                match_one_two_one(grid, &by_origin, c, horizontal, out);
            }
        }
    }

    // Shared corner: several 1s whose only unknown is the same cell.
    let mut sole_unknown_refs: HashMap<u32, usize> = HashMap::new();
    for c in constraints {
        if c.value == 1 && c.mines_remaining == 1 && c.unknowns.len() == 1 {
            let (r, cc) = c.unknowns[0];
            *sole_unknown_refs.entry(cell_key(r, cc)).or_insert(0) += 1;
        }
    }
    for c in constraints {
        if c.value == 1 && c.mines_remaining == 1 && c.unknowns.len() == 1 {
            let (r, cc) = c.unknowns[0];
            if sole_unknown_refs.get(&cell_key(r, cc)).copied().unwrap_or(0) >= 2 {
                out.mine((r, cc), DeductionRule::PatternSharedCorner);
            }
        }
    }

    // Isolated edge 1.
    for c in constraints {
        if c.value == 1
            && c.mines_remaining == 1
            && c.unknowns.len() == 1
            && grid.cell(c.origin).geometry.is_edge
        {
            out.mine(c.unknowns[0], DeductionRule::PatternEdgeOne);
        }
    }
}

/// Map (along, across) offsets from `center` to a grid position.
fn oriented(grid: &Grid, center: Position, horizontal: bool, along: i64, across: i64) -> Option<Position> {
    let (dr, dc) = if horizontal { (across, along) } else { (along, across) };
    let r = center.0 as i64 + dr;
    let c = center.1 as i64 + dc;
    if r < 0 || c < 0 || !grid.in_bounds(r as usize, c as usize) {
        return None;
    }
    Some((r as usize, c as usize))
}

/// Collinear remaining counts 1-2-1 with every unknown on one side:
/// the cells diagonal to the 2 are mines, the cell facing it is safe.
fn match_one_two_one(
    grid: &Grid,
    by_origin: &HashMap<u32, usize>,
    middle: &Constraint,
    horizontal: bool,
    out: &mut Candidates,
) {
    let constraints = grid.constraints();
    let lookup = |pos: Option<Position>| {
        pos.and_then(|(r, c)| by_origin.get(&cell_key(r, c)))
            .map(|&i| &constraints[i])
    };
    let center = middle.origin;
    let (Some(left), Some(right)) = (
        lookup(oriented(grid, center, horizontal, -1, 0)),
        lookup(oriented(grid, center, horizontal, 1, 0)),
    ) else {
        return;
    };
    if left.mines_remaining != 1 || right.mines_remaining != 1 {
        return;
    }

    for side in [-1i64, 1] {
        let row: Vec<Option<Position>> = (-2..=2)
            .map(|along| oriented(grid, center, horizontal, along, side))
            .collect();
        let (Some(a), Some(b), Some(d)) = (row[1], row[2], row[3]) else {
            continue;
        };

        let as_keys = |cells: &[Option<Position>]| -> HashSet<u32> {
            cells.iter().flatten().map(|&(r, c)| cell_key(r, c)).collect()
        };
        let middle_expected = as_keys(&row[1..=3]);
        let left_allowed = as_keys(&row[0..=2]);
        let right_allowed = as_keys(&row[2..=4]);
        let keys = |c: &Constraint| -> HashSet<u32> {
            c.unknowns.iter().map(|&(r, cc)| cell_key(r, cc)).collect()
        };

        if keys(middle) == middle_expected
            && keys(left).is_subset(&left_allowed)
            && keys(right).is_subset(&right_allowed)
        {
            out.mine(a, DeductionRule::PatternOneTwoOne);
            out.mine(d, DeductionRule::PatternOneTwoOne);
            out.safe(b, DeductionRule::PatternOneTwoOne);
        }
    }
}

// ─── Pass 4: Linear system ──────────────────────────────────────────────────

fn apply_linear_system(grid: &Grid, out: &mut Candidates) {
    for component in gaussian::connected_components(grid) {
        if component.constraints.len() < 2 {
            continue;
        }
        match gaussian::solve_component(grid, &component) {
            Some(result) => {
                for pos in result.mines {
                    out.mine(pos, DeductionRule::LinearSystem);
                }
                for pos in result.safe {
                    out.safe(pos, DeductionRule::LinearSystem);
                }
            }
            None => log::debug!(
                "linear pass: degenerate system over {} cells, no conclusion",
                component.cells.len()
            ),
        }
    }
}

// ─── Global consistency filter ──────────────────────────────────────────────

/// Accept mine candidates in pass order while no referencing constraint
/// would exceed its digit. Cells next to a revealed zero and cells also
/// claimed safe are never accepted.
fn global_filter(
    grid: &Grid,
    candidates: &Candidates,
) -> (Vec<(Position, DeductionRule)>, Vec<DroppedCandidate>) {
    let constraints = grid.constraints();
    let mut accepted = Vec::new();
    let mut dropped = Vec::new();
    let mut pending: HashMap<usize, u32> = HashMap::new();

    'candidates: for &(pos, rule) in &candidates.mines {
        let drop = |reason: String| DroppedCandidate { position: pos, rule, reason };

        if !grid.cell(pos).is_unknown() {
            continue;
        }
        if grid.is_adjacent_to_revealed_zero(pos) {
            dropped.push(drop("adjacent to a revealed empty cell".to_string()));
            continue;
        }
        if candidates.safe_keys.contains(&cell_key(pos.0, pos.1)) {
            dropped.push(drop("also derived as safe".to_string()));
            continue;
        }

        let refs = grid.cell(pos).constraints();
        for &id in refs {
            let c = &constraints[id];
            let total = c.flags_placed as u32 + pending.get(&id).copied().unwrap_or(0) + 1;
            if total > c.value as u32 {
                dropped.push(drop(format!(
                    "would place {} flags around {:?} showing {}",
                    total, c.origin, c.value
                )));
                continue 'candidates;
            }
        }

        for &id in refs {
            *pending.entry(id).or_insert(0) += 1;
        }
        accepted.push((pos, rule));
    }

    (accepted, dropped)
}

/// Largest component `overflag_violation` enumerates exhaustively.
#[cfg(test)]
const MAX_CHECKED_COMPONENT: usize = 14;

/// For every constraint, flags placed plus the fewest mines any consistent
/// completion puts among its unflagged unknowns must not exceed the digit.
/// Returns the first violation. Components above `MAX_CHECKED_COMPONENT`
/// cells only get the flag check.
#[cfg(test)]
pub(crate) fn overflag_violation(grid: &mut Grid) -> Option<String> {
    grid.ensure_constraints();
    let constraints = grid.constraints();
    if let Some(c) = constraints.iter().find(|c| c.flags_placed > c.value) {
        return Some(format!("{} flags around {:?} showing {}", c.flags_placed, c.origin, c.value));
    }

    for component in gaussian::connected_components(grid) {
        let n = component.cells.len();
        if n > MAX_CHECKED_COMPONENT {
            continue;
        }
        let index: HashMap<Position, usize> =
            component.cells.iter().enumerate().map(|(i, &p)| (p, i)).collect();
        let masks: Vec<(usize, u64)> = component
            .constraints
            .iter()
            .map(|&id| {
                let mask = constraints[id]
                    .unknowns
                    .iter()
                    .fold(0u64, |m, p| m | (1u64 << index[p]));
                (id, mask)
            })
            .collect();
        let completions: Vec<u64> = (0..1u64 << n)
            .filter(|&a| {
                masks
                    .iter()
                    .all(|&(id, mask)| (a & mask).count_ones() as i32 == constraints[id].mines_remaining)
            })
            .collect();

        for &(id, mask) in &masks {
            let c = &constraints[id];
            let Some(fewest) = completions.iter().map(|&a| (a & mask).count_ones()).min() else {
                return Some(format!("no consistent completion around {:?}", c.origin));
            };
            if c.flags_placed as u32 + fewest > c.value as u32 {
                return Some(format!(
                    "{} flags + {} forced mines around {:?} showing {}",
                    c.flags_placed, fewest, c.origin, c.value
                ));
            }
        }
    }
    None
}

#[cfg(test)]
pub(crate) fn assert_no_overflagging(grid: &mut Grid) {
    if let Some(violation) = overflag_violation(grid) {
        panic!("{violation}");
    }
}
