//! Move selection state machine.
//!
//! `NotStarted → FirstMove → SteadyState → Terminal`. The first move comes
//! from memory or from a corner-first placement order. Steady-state moves
//! try, in order: constraint flags, a certain-safe cell, a remembered second
//! move, then the lowest risk tier.

use serde::Serialize;

use crate::config::EngineConfig;
use crate::constraint::{ConstraintEngine, DeductionReport};
use crate::grid::Grid;
use crate::memory::{normalize, PatternMemory};
use crate::probability::{ProbabilityEngine, ProbabilitySummary};
use crate::rng::EngineRng;
use crate::types::{MoveKind, MoveRecord, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectorState {
    NotStarted,
    FirstMove,
    SteadyState,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Outcome {
    Victory,
    Defeat,
}

/// Why a probe was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProbeReason {
    MemoryOpening,
    Opening,
    CertainSafe,
    MemorySecondMove,
    /// Risk tier 1..=5.
    RiskTier(u8),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Action {
    Probe {
        row: usize,
        col: usize,
        reason: ProbeReason,
        probability: f64,
    },
    /// Cells already flagged on the grid.
    FlagBatch { cells: Vec<Position> },
    Finished { outcome: Outcome },
    Error { message: String },
}

fn chebyshev(a: Position, b: Position) -> usize {
    a.0.abs_diff(b.0).max(a.1.abs_diff(b.1))
}

pub struct MoveSelector {
    config: EngineConfig,
    rng: EngineRng,
    state: SelectorState,
    constraints: ConstraintEngine,
    probability: ProbabilityEngine,
    last_report: Option<DeductionReport>,
    last_summary: Option<ProbabilitySummary>,
}

impl MoveSelector {
    /// A configured seed drives both the tie-break and the sampler.
    pub fn new(config: EngineConfig) -> Self {
        let mut rng = EngineRng::from_optional_seed(config.seed);
        let sampler = rng.fork();
        Self {
            probability: ProbabilityEngine::new(config.clone(), sampler),
            config,
            rng,
            state: SelectorState::NotStarted,
            constraints: ConstraintEngine::new(),
            last_report: None,
            last_summary: None,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    pub fn begin(&mut self) {
        self.state = SelectorState::FirstMove;
        self.last_report = None;
        self.last_summary = None;
    }

    pub fn finish(&mut self) {
        self.state = SelectorState::Terminal;
    }

    pub fn reset(&mut self) {
        self.state = SelectorState::NotStarted;
        self.last_report = None;
        self.last_summary = None;
    }

    /// Report of the most recent constraint run.
    pub fn last_report(&self) -> Option<&DeductionReport> {
        self.last_report.as_ref()
    }

    pub fn take_report(&mut self) -> Option<DeductionReport> {
        self.last_report.take()
    }

    pub fn last_summary(&self) -> Option<&ProbabilitySummary> {
        self.last_summary.as_ref()
    }

    /// Decide the next action. Flag batches are already applied to `grid`
    /// when returned.
    pub fn next_move(
        &mut self,
        grid: &mut Grid,
        history: &[MoveRecord],
        memory: Option<&dyn PatternMemory>,
    ) -> Action {
        match self.state {
            SelectorState::NotStarted => Action::Error {
                message: "no game in progress".into(),
            },
            SelectorState::Terminal => Action::Error {
                message: "game is over".into(),
            },
            SelectorState::FirstMove => self.first_move(grid, memory),
            SelectorState::SteadyState => self.steady_state(grid, history, memory),
        }
    }

    // ─── First move ─────────────────────────────────────────────────────────

    fn first_move(&mut self, grid: &Grid, memory: Option<&dyn PatternMemory>) -> Action {
        let (rows, cols) = (grid.rows(), grid.cols());

        if let Some(best) = memory.and_then(|m| m.opening_candidates().into_iter().next()) {
            let pos = best.position.denormalize(rows, cols);
            if best.win_rate > self.config.opening_win_rate && grid.cell(pos).is_unknown() {
                log::debug!("opening from memory at {:?} (win rate {:.2})", pos, best.win_rate);
                self.state = SelectorState::SteadyState;
                return probe(grid, pos, ProbeReason::MemoryOpening);
            }
        }

        let unknown = grid.unknown_cells();
        let geometry = |p: &Position| grid.cell(*p).geometry;
        let corners: Vec<Position> = unknown.iter().copied().filter(|p| geometry(p).is_corner).collect();
        let edges: Vec<Position> = unknown.iter().copied().filter(|p| geometry(p).is_edge).collect();
        let near_edge: Vec<Position> = unknown
            .iter()
            .copied()
            .filter(|p| geometry(p).distance_to_edge <= 2)
            .collect();

        for tier in [&corners, &edges, &near_edge, &unknown] {
            if let Some(&pos) = self.rng.choose(tier) {
                self.state = SelectorState::SteadyState;
                return probe(grid, pos, ProbeReason::Opening);
            }
        }
        Action::Error {
            message: "no unclaimed cell for an opening move".into(),
        }
    }

    // ─── Steady state ───────────────────────────────────────────────────────

    fn steady_state(
        &mut self,
        grid: &mut Grid,
        history: &[MoveRecord],
        memory: Option<&dyn PatternMemory>,
    ) -> Action {
        let report = self.constraints.run(grid);
        let flags: Vec<Position> = report.flags.iter().map(|f| f.position).collect();
        self.last_report = Some(report);
        if !flags.is_empty() {
            return Action::FlagBatch { cells: flags };
        }

        self.last_summary = Some(self.probability.compute_all(grid, memory));

        let probes: Vec<Position> = history
            .iter()
            .filter(|m| m.kind == MoveKind::Probe)
            .map(|m| (m.row, m.col))
            .collect();
        let last = probes.last().copied();

        if let Some(pos) = self.pick_certain_safe(grid, last) {
            return probe(grid, pos, ProbeReason::CertainSafe);
        }

        if let ([first], Some(mem)) = (probes.as_slice(), memory) {
            if let Some(pos) = self.remembered_second_move(grid, *first, mem) {
                return probe(grid, pos, ProbeReason::MemorySecondMove);
            }
        }

        if let Some((pos, tier)) = self.pick_lowest_risk(grid, last) {
            return probe(grid, pos, ProbeReason::RiskTier(tier));
        }

        // Only proven mines remain unflagged.
        let mines: Vec<Position> = grid.certain_mines().into_iter().filter(|&p| grid.cell(p).is_unknown()).collect();
        if !mines.is_empty() {
            for &(r, c) in &mines {
                if let Err(e) = grid.set_flag(r, c, true) {
                    return Action::Error { message: e.to_string() };
                }
            }
            return Action::FlagBatch { cells: mines };
        }

        Action::Error {
            message: "no unrevealed cell left to play".into(),
        }
    }

    /// Corner before edge before interior, then nearest to the last probe.
    fn pick_certain_safe(&self, grid: &Grid, last: Option<Position>) -> Option<Position> {
        grid.certain_safe().into_iter().min_by_key(|&p| {
            let rank = grid.cell(p).geometry.placement_rank();
            let dist = last.map_or(0, |l| chebyshev(p, l));
            (rank, dist, p)
        })
    }

    fn remembered_second_move(&self, grid: &Grid, first: Position, memory: &dyn PatternMemory) -> Option<Position> {
        let (rows, cols) = (grid.rows(), grid.cols());
        let best = memory
            .second_move_candidates(normalize(first.0, first.1, rows, cols))
            .into_iter()
            .next()?;
        if best.confidence <= self.config.second_move_confidence || best.win_rate <= self.config.second_move_win_rate {
            return None;
        }
        let pos = best.position.denormalize(rows, cols);
        grid.cell(pos).is_unknown().then_some(pos)
    }

    /// Lowest non-empty tier; returns the cell and its 1-based tier.
    fn pick_lowest_risk(&mut self, grid: &Grid, last: Option<Position>) -> Option<(Position, u8)> {
        let tiers = self.config.risk_tiers;
        let tier_of = |p: f64| tiers.iter().position(|&t| p < t).unwrap_or(tiers.len());

        let candidates: Vec<Position> = grid
            .unknown_cells()
            .into_iter()
            .filter(|&p| !grid.cell(p).estimate().is_certain_mine())
            .collect();
        let lowest = candidates
            .iter()
            .map(|&p| tier_of(grid.cell(p).estimate().mine_probability))
            .min()?;

        let mut tier: Vec<Position> = candidates
            .into_iter()
            .filter(|&p| tier_of(grid.cell(p).estimate().mine_probability) == lowest)
            .collect();
        tier.sort_by(|&a, &b| {
            let (ea, eb) = (grid.cell(a).estimate(), grid.cell(b).estimate());
            let dist = |p: Position| last.map_or(0, |l| chebyshev(p, l));
            ea.mine_probability
                .total_cmp(&eb.mine_probability)
                .then(eb.confidence.total_cmp(&ea.confidence))
                .then(grid.cell(a).geometry.placement_rank().cmp(&grid.cell(b).geometry.placement_rank()))
                .then(dist(a).cmp(&dist(b)))
                .then(a.cmp(&b))
        });
        tier.truncate(self.config.top_candidates.max(1));

        let pos = *self.rng.choose(&tier)?;
        Some((pos, lowest as u8 + 1))
    }
}

fn probe(grid: &Grid, pos: Position, reason: ProbeReason) -> Action {
    Action::Probe {
        row: pos.0,
        col: pos.1,
        reason,
        probability: grid.cell(pos).estimate().mine_probability,
    }
}
