//! Game session: the public face of the engine.
//!
//! A session owns the grid, the move selector and the memory engine. The
//! caller alternates `next_action` and, for probes, `submit_ground_truth`;
//! `play` drives the same loop against an [`Oracle`].

use serde::Serialize;

use crate::board::Oracle;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::grid::Grid;
use crate::memory::{
    now_ms, Contradiction, ContradictionKind, KeyValueStore, MemoryEngine, MemoryStats,
};
use crate::selector::{Action, MoveSelector, Outcome, SelectorState};
use crate::types::{CellValue, MoveKind, MoveRecord, Position, Provenance};

/// Called after every reveal, flag batch and terminal result.
pub type Observer = Box<dyn FnMut(&GameSnapshot)>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSnapshot {
    pub row: usize,
    pub col: usize,
    pub revealed: bool,
    pub flagged: bool,
    pub value: Option<CellValue>,
    pub mine_probability: f64,
    pub confidence: f64,
    pub provenance: Provenance,
}

/// Full serializable view of a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub game_id: u64,
    pub rows: usize,
    pub cols: usize,
    pub state: SelectorState,
    pub outcome: Option<Outcome>,
    pub pending_probe: Option<Position>,
    pub flags: usize,
    pub unrevealed: usize,
    pub moves: Vec<MoveRecord>,
    pub cells: Vec<CellSnapshot>,
    pub memory: MemoryStats,
}

pub struct GameSession<S: KeyValueStore> {
    selector: MoveSelector,
    memory: MemoryEngine<S>,
    grid: Option<Grid>,
    moves: Vec<MoveRecord>,
    pending: Option<Position>,
    outcome: Option<Outcome>,
    started_at: f64,
    observer: Option<Observer>,
}

impl<S: KeyValueStore> GameSession<S> {
    /// Loads memory from `store` once.
    pub fn new(config: EngineConfig, store: S) -> Self {
        let memory = MemoryEngine::load(store, &config);
        Self {
            selector: MoveSelector::new(config),
            memory,
            grid: None,
            moves: Vec::new(),
            pending: None,
            outcome: None,
            started_at: 0.0,
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: impl FnMut(&GameSnapshot) + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    pub fn memory(&self) -> &MemoryEngine<S> {
        &self.memory
    }

    pub fn moves(&self) -> &[MoveRecord] {
        &self.moves
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }

    pub fn pending_probe(&self) -> Option<Position> {
        self.pending
    }

    /// Abandon any current game and start a fresh `rows` x `cols` board.
    pub fn start_new_game(&mut self, rows: usize, cols: usize) -> Result<(), EngineError> {
        let grid = Grid::new(rows, cols)?;
        self.grid = Some(grid);
        self.moves.clear();
        self.pending = None;
        self.outcome = None;
        self.started_at = now_ms();
        self.selector.begin();
        let id = self.memory.begin_game();
        log::info!("game {} started on a {}x{} grid", id, rows, cols);
        Ok(())
    }

    /// Compute the next move. A probe stays pending until its ground truth
    /// is submitted; a flag batch is applied immediately.
    pub fn next_action(&mut self) -> Action {
        if let Some(outcome) = self.outcome {
            return Action::Finished { outcome };
        }
        if let Some((row, col)) = self.pending {
            return Action::Error {
                message: format!("awaiting ground truth for ({row}, {col})"),
            };
        }
        let Some(grid) = self.grid.as_mut() else {
            return Action::Error {
                message: "no game in progress".into(),
            };
        };

        let action = self.selector.next_move(grid, &self.moves, Some(&self.memory));
        if let Some(report) = self.selector.take_report() {
            if let Some(first) = report.dropped.first() {
                self.memory.record_contradiction(Contradiction {
                    kind: ContradictionKind::DroppedCandidate,
                    row: first.position.0,
                    col: first.position.1,
                    detail: format!("{} candidate(s) dropped, first: {}", report.dropped.len(), first.reason),
                });
            }
        }

        match &action {
            Action::Probe { row, col, .. } => {
                self.pending = Some((*row, *col));
            }
            Action::FlagBatch { cells } => {
                let (rows, cols) = (grid.rows(), grid.cols());
                for &(row, col) in cells {
                    self.moves.push(MoveRecord {
                        row,
                        col,
                        kind: MoveKind::FlagBatch,
                        ground_truth: None,
                    });
                    self.memory.record_mine_found((row, col), rows, cols);
                }
                log::debug!("flagged {} cells", cells.len());
                self.notify();
                self.check_victory();
            }
            Action::Error { message } => {
                log::warn!("move computation failed: {}", message);
            }
            Action::Finished { .. } => {}
        }
        action
    }

    /// Submit the oracle's answer for the pending probe, in the oracle
    /// vocabulary (`""`, `"empty"`, `"0"`..`"8"`, `"mine"`).
    pub fn submit_ground_truth(&mut self, value: &str) -> Result<Option<Outcome>, EngineError> {
        let value: CellValue = value.parse()?;
        self.submit_value(value)
    }

    /// Returns the outcome if this answer ended the game.
    pub fn submit_value(&mut self, value: CellValue) -> Result<Option<Outcome>, EngineError> {
        let Some((row, col)) = self.pending else {
            return Err(EngineError::InvalidTransition(
                "no probe is awaiting ground truth".into(),
            ));
        };
        let Some(grid) = self.grid.as_mut() else {
            return Err(EngineError::InvalidTransition("no game in progress".into()));
        };

        let was_certain_safe = grid.get(row, col)?.estimate().is_certain_safe();
        if !grid.reveal(row, col, value)? {
            self.pending = None;
            return Err(EngineError::InvalidTransition(format!(
                "cell ({row}, {col}) is already revealed"
            )));
        }
        self.pending = None;
        self.moves.push(MoveRecord {
            row,
            col,
            kind: MoveKind::Probe,
            ground_truth: Some(value),
        });

        let (rows, cols) = (grid.rows(), grid.cols());
        let adjacent_flags = grid
            .neighbors(row, col)
            .iter()
            .filter(|&&p| grid.cell(p).is_flagged())
            .count();

        match value.mine_count() {
            None => {
                if was_certain_safe {
                    self.memory.record_contradiction(Contradiction {
                        kind: ContradictionKind::SafeCellWasMine,
                        row,
                        col,
                        detail: "cell deduced safe revealed a mine".into(),
                    });
                }
                self.memory.record_mine_found((row, col), rows, cols);
                self.notify();
                self.finish(Outcome::Defeat);
            }
            Some(n) => {
                if (n as usize) < adjacent_flags {
                    self.memory.record_contradiction(Contradiction {
                        kind: ContradictionKind::DigitBelowFlags,
                        row,
                        col,
                        detail: format!("digit {n} with {adjacent_flags} adjacent flags"),
                    });
                }
                self.notify();
                self.check_victory();
            }
        }
        Ok(self.outcome)
    }

    /// Wipe the learned memory, in memory and in the store.
    pub fn reset_memory(&mut self) {
        self.memory.reset();
    }

    /// `None` before the first game.
    pub fn current_state(&self) -> Option<GameSnapshot> {
        let grid = self.grid.as_ref()?;
        let cells = grid
            .cells()
            .iter()
            .map(|cell| {
                let e = cell.estimate();
                CellSnapshot {
                    row: cell.row,
                    col: cell.col,
                    revealed: cell.is_revealed(),
                    flagged: cell.is_flagged(),
                    value: cell.value(),
                    mine_probability: e.mine_probability,
                    confidence: e.confidence,
                    provenance: e.provenance,
                }
            })
            .collect();

        Some(GameSnapshot {
            game_id: self.memory.current_game(),
            rows: grid.rows(),
            cols: grid.cols(),
            state: self.selector.state(),
            outcome: self.outcome,
            pending_probe: self.pending,
            flags: grid.flag_count(),
            unrevealed: grid.unrevealed_count(),
            moves: self.moves.clone(),
            cells,
            memory: self.memory.stats(),
        })
    }

    /// Play the current game to the end against `oracle`.
    pub fn play<O: Oracle>(&mut self, oracle: &mut O) -> Result<Outcome, EngineError> {
        let budget = self.grid.as_ref().map_or(0, |g| 2 * g.len() + 2);
        for _ in 0..budget {
            match self.next_action() {
                Action::Probe { row, col, .. } => {
                    if let Some(outcome) = self.submit_value(oracle.answer(row, col))? {
                        return Ok(outcome);
                    }
                }
                Action::FlagBatch { .. } => {}
                Action::Finished { outcome } => return Ok(outcome),
                Action::Error { message } => return Err(EngineError::MoveFailed(message)),
            }
        }
        match self.outcome {
            Some(outcome) => Ok(outcome),
            None => Err(EngineError::MoveFailed("game did not finish".into())),
        }
    }

    fn check_victory(&mut self) {
        let Some(grid) = self.grid.as_ref() else {
            return;
        };
        if self.outcome.is_none() && grid.unrevealed_count() == grid.flag_count() {
            self.finish(Outcome::Victory);
        }
    }

    fn finish(&mut self, outcome: Outcome) {
        let Some(grid) = self.grid.as_ref() else {
            return;
        };
        let (rows, cols) = (grid.rows(), grid.cols());
        self.outcome = Some(outcome);
        self.selector.finish();
        let elapsed = (now_ms() - self.started_at).max(0.0);
        self.memory.record_game_result(
            outcome == Outcome::Victory,
            &self.moves,
            rows,
            cols,
            elapsed,
        );
        log::info!("game {} ended: {:?}", self.memory.current_game(), outcome);
        self.notify();
    }

    fn notify(&mut self) {
        if self.observer.is_none() {
            return;
        }
        let Some(snapshot) = self.current_state() else {
            return;
        };
        if let Some(observer) = self.observer.as_mut() {
            observer(&snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::MineField;
    use crate::constraint::assert_no_overflagging;
    use crate::memory::InMemoryStore;
    use crate::rng::EngineRng;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn session(seed: u64) -> GameSession<InMemoryStore> {
        GameSession::new(EngineConfig::default().with_seed(seed), InMemoryStore::new())
    }

    fn expect_probe(action: Action) -> Position {
        match action {
            Action::Probe { row, col, .. } => (row, col),
            other => panic!("expected probe, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_bad_dimensions() {
        let mut s = session(1);
        assert!(matches!(
            s.start_new_game(0, 5),
            Err(EngineError::InvalidDimensions { .. })
        ));
        assert!(s.current_state().is_none());
    }

    #[test]
    fn test_ground_truth_without_pending_probe() {
        let mut s = session(1);
        s.start_new_game(4, 4).unwrap();
        let before = s.current_state();
        assert!(matches!(
            s.submit_ground_truth("3"),
            Err(EngineError::InvalidTransition(_))
        ));
        assert_eq!(s.current_state(), before);
    }

    #[test]
    fn test_bad_ground_truth_keeps_probe_pending() {
        let mut s = session(1);
        s.start_new_game(4, 4).unwrap();
        let pos = expect_probe(s.next_action());
        assert!(matches!(
            s.submit_ground_truth("9"),
            Err(EngineError::InvalidGroundTruth(_))
        ));
        assert_eq!(s.pending_probe(), Some(pos));
        assert!(matches!(s.next_action(), Action::Error { .. }));
    }

    #[test]
    fn test_mine_ends_game_in_defeat() {
        let mut s = session(2);
        s.start_new_game(5, 5).unwrap();
        expect_probe(s.next_action());
        assert_eq!(s.submit_ground_truth("mine").unwrap(), Some(Outcome::Defeat));
        assert_eq!(
            s.next_action(),
            Action::Finished {
                outcome: Outcome::Defeat
            }
        );
        let stats = s.memory().stats();
        assert_eq!(stats.games_played, 1);
        assert_eq!(stats.losses, 1);
        assert_eq!(stats.known_mine_buckets, 1);
        assert_eq!(s.current_state().unwrap().state, SelectorState::Terminal);
    }

    #[test]
    fn test_all_unrevealed_flagged_is_victory() {
        let mut s = session(3);
        s.start_new_game(2, 2).unwrap();
        expect_probe(s.next_action());
        assert_eq!(s.submit_ground_truth("3").unwrap(), None);
        match s.next_action() {
            Action::FlagBatch { cells } => assert_eq!(cells.len(), 3),
            other => panic!("expected flag batch, got {other:?}"),
        }
        assert_eq!(s.outcome(), Some(Outcome::Victory));
        assert_eq!(
            s.next_action(),
            Action::Finished {
                outcome: Outcome::Victory
            }
        );
        assert_eq!(s.memory().stats().wins, 1);
        assert_eq!(s.memory().data().opening_moves.len(), 1);
    }

    #[test]
    fn test_observer_sees_every_event() {
        let seen: Rc<RefCell<Vec<Option<Outcome>>>> = Rc::default();
        let sink = Rc::clone(&seen);
        let mut s = session(4);
        s.set_observer(move |snap| sink.borrow_mut().push(snap.outcome));
        s.start_new_game(3, 3).unwrap();
        let mut field = MineField::from_mines(3, 3, &[]).unwrap();
        assert_eq!(s.play(&mut field).unwrap(), Outcome::Victory);
        assert_eq!(s.moves().len(), 9);
        let seen = seen.borrow();
        // One per reveal, plus the terminal notification.
        assert_eq!(seen.len(), 10);
        assert_eq!(seen.last(), Some(&Some(Outcome::Victory)));
    }

    #[test]
    fn test_certain_safe_mine_is_contradiction() {
        let mut s = session(5);
        s.start_new_game(3, 3).unwrap();
        let grid = s.grid.as_mut().unwrap();
        grid.set_flag(0, 0, true).unwrap();
        grid.reveal(1, 0, CellValue::Digit(1)).unwrap();
        grid.estimate_mut((2, 0)).propose(0.0, 1.0, Provenance::SubsetIntersection);
        s.pending = Some((2, 0));

        assert_eq!(s.submit_value(CellValue::Mine).unwrap(), Some(Outcome::Defeat));
        let event = s.memory().data().contradictions.back().unwrap();
        assert_eq!(event.kind, ContradictionKind::SafeCellWasMine);
        assert_eq!(s.memory().data().change_count, 1);
    }

    #[test]
    fn test_digit_below_flags_is_contradiction() {
        let mut s = session(6);
        s.start_new_game(3, 3).unwrap();
        let grid = s.grid.as_mut().unwrap();
        grid.set_flag(0, 0, true).unwrap();
        grid.set_flag(0, 1, true).unwrap();
        s.pending = Some((1, 1));

        assert_eq!(s.submit_ground_truth("1").unwrap(), None);
        let event = s.memory().data().contradictions.back().unwrap();
        assert_eq!(event.kind, ContradictionKind::DigitBelowFlags);
    }

    #[test]
    fn test_seeded_random_game_finishes() {
        for seed in 0..5 {
            let mut s = session(seed);
            s.start_new_game(9, 9).unwrap();
            let mut rng = EngineRng::from_seed(seed + 100);
            let mut field = MineField::random(9, 9, 10, None, &mut rng).unwrap();
            let mut outcome = None;
            for _ in 0..200 {
                match s.next_action() {
                    Action::Probe { row, col, .. } => {
                        s.submit_value(field.answer(row, col)).unwrap();
                    }
                    Action::FlagBatch { .. } => {}
                    Action::Finished { outcome: done } => {
                        outcome = Some(done);
                        break;
                    }
                    Action::Error { message } => panic!("seed {seed}: {message}"),
                }
                if s.outcome().is_none() {
                    assert_no_overflagging(s.grid.as_mut().unwrap());
                }
            }
            let outcome = outcome.expect("game did not finish");

            let state = s.current_state().unwrap();
            assert_eq!(state.outcome, Some(outcome));
            assert_eq!(s.memory().stats().games_played, 1);
            let grid = s.grid().unwrap();
            // Flags are only ever placed on mines.
            for pos in grid.flagged() {
                assert!(field.is_mine(pos.0, pos.1), "flag on safe cell {pos:?}");
            }
            if outcome == Outcome::Victory {
                assert_eq!(grid.flag_count(), field.mine_count());
            }
        }
    }

    #[test]
    fn test_memory_carries_across_games() {
        let mut s = session(8);
        for _ in 0..3 {
            s.start_new_game(6, 6).unwrap();
            let mut field = MineField::from_mines(6, 6, &[]).unwrap();
            assert_eq!(s.play(&mut field).unwrap(), Outcome::Victory);
        }
        let stats = s.memory().stats();
        assert_eq!(stats.games_played, 3);
        assert_eq!(stats.wins, 3);
        s.reset_memory();
        assert_eq!(s.memory().stats().games_played, 0);
    }
}
