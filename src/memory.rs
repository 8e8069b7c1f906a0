//! Cross-session learning memory.
//!
//! Positions are stored in a grid-size independent form (see [`normalize`])
//! so patterns learned on one board size carry over to another. The whole
//! store is a single versioned JSON blob held by a [`KeyValueStore`]; it is
//! read once when the engine is created and written back after every
//! mutating event.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use crate::config::EngineConfig;
use crate::error::PersistenceError;
use crate::types::{MoveKind, MoveRecord, Position};

/// Storage key of the memory blob.
pub const MEMORY_KEY: &str = "minesweeper-agent-memory";
pub const MEMORY_VERSION: u32 = 1;

const MAX_GAMES: usize = 50;
const MAX_SEQUENCES: usize = 100;
const MAX_CONTRADICTIONS: usize = 20;
const MAX_GAME_IDS: usize = 50;
/// Games needed before a move tally is fully trusted.
const FULL_CONFIDENCE_GAMES: f64 = 10.0;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> f64 {
    #[cfg(target_arch = "wasm32")]
    {
        js_sys::Date::now()
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as f64)
            .unwrap_or_default()
    }
}

// ─── Persistence ────────────────────────────────────────────────────────────

/// Storage collaborator for the memory blob.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PersistenceError>;
    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError>;
}

/// Process-local store; nothing survives the process.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    entries: HashMap<String, serde_json::Value>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path(key), serde_json::to_string_pretty(&value)?)?;
        Ok(())
    }
}

// ─── Normalization ──────────────────────────────────────────────────────────

/// Grid position bucketed to tenths of each axis (0..=10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NormalizedPosition {
    pub row: u8,
    pub col: u8,
}

/// `floor(pos / (dim - 1) * 10) / 10` per axis, 0 for a dimension of 1.
pub fn normalize(row: usize, col: usize, rows: usize, cols: usize) -> NormalizedPosition {
    fn tenths(pos: usize, dim: usize) -> u8 {
        if dim <= 1 {
            return 0;
        }
        ((pos * 10) / (dim - 1)).min(10) as u8
    }
    NormalizedPosition {
        row: tenths(row, rows),
        col: tenths(col, cols),
    }
}

impl NormalizedPosition {
    /// Map back onto a concrete grid.
    pub fn denormalize(self, rows: usize, cols: usize) -> Position {
        fn scale(tenths: u8, dim: usize) -> usize {
            let max = dim.saturating_sub(1);
            let pos = (tenths as f64 / 10.0 * max as f64).round() as usize;
            pos.min(max)
        }
        (scale(self.row, rows), scale(self.col, cols))
    }

    pub fn key(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NormalizedPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{},{}.{}", self.row / 10, self.row % 10, self.col / 10, self.col % 10)
    }
}

impl FromStr for NormalizedPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (r, c) = s.split_once(',').ok_or_else(|| format!("malformed position key '{s}'"))?;
        let parse = |part: &str| -> Result<u8, String> {
            let v: f64 = part
                .trim()
                .parse()
                .map_err(|_| format!("malformed position key '{s}'"))?;
            if !(0.0..=1.0).contains(&v) {
                return Err(format!("position key '{s}' out of range"));
            }
            Ok((v * 10.0).round() as u8)
        };
        Ok(Self {
            row: parse(r)?,
            col: parse(c)?,
        })
    }
}

/// Ordered normalized probe positions joined into one key.
pub fn sequence_key(moves: &[MoveRecord], rows: usize, cols: usize) -> String {
    moves
        .iter()
        .filter(|m| m.kind == MoveKind::Probe)
        .map(|m| normalize(m.row, m.col, rows, cols).key())
        .collect::<Vec<_>>()
        .join("|")
}

// ─── Stored records ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MineRecord {
    pub count: f64,
    pub first_seen: f64,
    pub last_seen: f64,
    pub recent: bool,
    pub game_ids: VecDeque<u64>,
}

impl Default for MineRecord {
    fn default() -> Self {
        Self {
            count: 0.0,
            first_seen: 0.0,
            last_seen: 0.0,
            recent: false,
            game_ids: VecDeque::new(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WinLoss {
    pub wins: u32,
    pub losses: u32,
}

impl WinLoss {
    pub fn total(&self) -> u32 {
        self.wins + self.losses
    }

    pub fn win_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.wins as f64 / self.total() as f64
        }
    }

    fn record(&mut self, won: bool) {
        if won {
            self.wins += 1;
        } else {
            self.losses += 1;
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GameSummary {
    pub id: u64,
    pub won: bool,
    pub rows: usize,
    pub cols: usize,
    pub moves: usize,
    pub elapsed_ms: f64,
    pub finished_at: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AggregateStats {
    pub games_played: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_moves: u64,
    pub total_elapsed_ms: f64,
}

/// What tripped a contradiction.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContradictionKind {
    /// A cell deduced certain-safe revealed a mine.
    SafeCellWasMine,
    /// A revealed digit is smaller than the flags around it.
    DigitBelowFlags,
    /// The constraint engine dropped a flag candidate.
    #[default]
    DroppedCandidate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub kind: ContradictionKind,
    pub row: usize,
    pub col: usize,
    pub detail: String,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContradictionEvent {
    pub at: f64,
    pub kind: ContradictionKind,
    pub row: usize,
    pub col: usize,
    pub detail: String,
}

/// The persisted memory blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryStore {
    pub version: u32,
    pub next_game_id: u64,
    pub known_mines: BTreeMap<String, MineRecord>,
    pub opening_moves: BTreeMap<String, WinLoss>,
    /// Keyed by `"<first>|<second>"`.
    pub second_moves: BTreeMap<String, WinLoss>,
    pub winning_sequences: VecDeque<String>,
    pub losing_sequences: VecDeque<String>,
    pub games: VecDeque<GameSummary>,
    pub stats: AggregateStats,
    pub contradictions: VecDeque<ContradictionEvent>,
    pub change_count: u32,
    pub changes_detected: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            version: MEMORY_VERSION,
            next_game_id: 1,
            known_mines: BTreeMap::new(),
            opening_moves: BTreeMap::new(),
            second_moves: BTreeMap::new(),
            winning_sequences: VecDeque::new(),
            losing_sequences: VecDeque::new(),
            games: VecDeque::new(),
            stats: AggregateStats::default(),
            contradictions: VecDeque::new(),
            change_count: 0,
            changes_detected: false,
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T, cap: usize) {
    while queue.len() >= cap {
        queue.pop_front();
    }
    queue.push_back(item);
}

// ─── Read views ─────────────────────────────────────────────────────────────

/// Mine history of one bucket as seen by the probability engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MineOccurrence {
    pub count: f64,
    pub recent: bool,
}

/// Win statistics of a remembered move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoveStat {
    pub position: NormalizedPosition,
    pub win_rate: f64,
    /// `min(1, games / 10)`.
    pub confidence: f64,
    pub games: u32,
}

impl MoveStat {
    fn from_tally(position: NormalizedPosition, tally: &WinLoss) -> Self {
        Self {
            position,
            win_rate: tally.win_rate(),
            confidence: (tally.total() as f64 / FULL_CONFIDENCE_GAMES).min(1.0),
            games: tally.total(),
        }
    }
}

fn sort_best_first(stats: &mut [MoveStat]) {
    stats.sort_by(|a, b| {
        b.win_rate
            .total_cmp(&a.win_rate)
            .then(b.games.cmp(&a.games))
            .then(a.position.cmp(&b.position))
    });
}

/// Read-only queries the probability engine and selector make.
pub trait PatternMemory {
    fn mine_occurrence(&self, row: usize, col: usize, rows: usize, cols: usize) -> Option<MineOccurrence>;

    /// Remembered opening moves, best first.
    fn opening_candidates(&self) -> Vec<MoveStat> {
        Vec::new()
    }

    /// Remembered replies to `first`, best first.
    fn second_move_candidates(&self, _first: NormalizedPosition) -> Vec<MoveStat> {
        Vec::new()
    }
}

/// Summary numbers for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub games_played: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub average_moves: f64,
    pub known_mine_buckets: usize,
    pub contradictions: u32,
    pub changes_detected: bool,
    pub persistence_degraded: bool,
}

// ─── Engine ─────────────────────────────────────────────────────────────────

pub struct MemoryEngine<S: KeyValueStore> {
    store: S,
    data: MemoryStore,
    degraded: bool,
    current_game: u64,
    contradiction_threshold: u32,
    attenuation_factor: f64,
}

impl<S: KeyValueStore> MemoryEngine<S> {
    /// Read the blob from `store`. A missing, malformed or foreign-version
    /// blob yields an empty memory; a failing store leaves the engine
    /// in-memory only.
    pub fn load(store: S, config: &EngineConfig) -> Self {
        let mut degraded = false;
        let data = match store.get(MEMORY_KEY) {
            Ok(Some(value)) => match serde_json::from_value::<MemoryStore>(value) {
                Ok(data) if data.version == MEMORY_VERSION => data,
                Ok(data) => {
                    log::warn!(
                        "memory blob has version {}, expected {}; starting fresh",
                        data.version,
                        MEMORY_VERSION
                    );
                    MemoryStore::default()
                }
                Err(e) => {
                    log::warn!("memory blob is malformed ({e}); starting fresh");
                    MemoryStore::default()
                }
            },
            Ok(None) => MemoryStore::default(),
            Err(e) => {
                log::warn!("memory store unavailable ({e}); continuing in-memory only");
                degraded = true;
                MemoryStore::default()
            }
        };

        Self {
            store,
            data,
            degraded,
            current_game: 0,
            contradiction_threshold: config.contradiction_threshold,
            attenuation_factor: config.attenuation_factor,
        }
    }

    pub fn data(&self) -> &MemoryStore {
        &self.data
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn changes_detected(&self) -> bool {
        self.data.changes_detected
    }

    pub fn current_game(&self) -> u64 {
        self.current_game
    }

    /// Allocate an id for a new game. Persisted with the next mutation.
    pub fn begin_game(&mut self) -> u64 {
        self.current_game = self.data.next_game_id;
        self.data.next_game_id += 1;
        self.current_game
    }

    pub fn record_mine_found(&mut self, pos: Position, rows: usize, cols: usize) {
        let key = normalize(pos.0, pos.1, rows, cols).key();
        let now = now_ms();
        let game = self.current_game;

        let record = self.data.known_mines.entry(key).or_insert_with(|| MineRecord {
            first_seen: now,
            ..MineRecord::default()
        });
        record.count += 1.0;
        record.last_seen = now;
        record.recent = true;
        if game != 0 && record.game_ids.back() != Some(&game) {
            push_bounded(&mut record.game_ids, game, MAX_GAME_IDS);
        }
        self.persist();
    }

    pub fn record_game_result(
        &mut self,
        won: bool,
        moves: &[MoveRecord],
        rows: usize,
        cols: usize,
        elapsed_ms: f64,
    ) {
        let stats = &mut self.data.stats;
        stats.games_played += 1;
        if won {
            stats.wins += 1;
        } else {
            stats.losses += 1;
        }
        stats.total_moves += moves.len() as u64;
        stats.total_elapsed_ms += elapsed_ms;

        push_bounded(
            &mut self.data.games,
            GameSummary {
                id: self.current_game,
                won,
                rows,
                cols,
                moves: moves.len(),
                elapsed_ms,
                finished_at: now_ms(),
            },
            MAX_GAMES,
        );

        let sequence = sequence_key(moves, rows, cols);
        if !sequence.is_empty() {
            let list = if won {
                &mut self.data.winning_sequences
            } else {
                &mut self.data.losing_sequences
            };
            push_bounded(list, sequence, MAX_SEQUENCES);
        }

        let mut probes = moves
            .iter()
            .filter(|m| m.kind == MoveKind::Probe)
            .map(|m| normalize(m.row, m.col, rows, cols));
        if let Some(first) = probes.next() {
            self.data
                .opening_moves
                .entry(first.key())
                .or_default()
                .record(won);
            if let Some(second) = probes.next() {
                self.data
                    .second_moves
                    .entry(format!("{}|{}", first.key(), second.key()))
                    .or_default()
                    .record(won);
            }
        }

        log::info!(
            "game {} recorded as {} after {} moves",
            self.current_game,
            if won { "win" } else { "loss" },
            moves.len()
        );
        self.persist();
    }

    /// Log a contradiction. From the configured threshold on, every known
    /// mine record is attenuated.
    pub fn record_contradiction(&mut self, contradiction: Contradiction) {
        log::warn!(
            "contradiction at ({}, {}): {:?} {}",
            contradiction.row,
            contradiction.col,
            contradiction.kind,
            contradiction.detail
        );
        self.data.change_count += 1;
        push_bounded(
            &mut self.data.contradictions,
            ContradictionEvent {
                at: now_ms(),
                kind: contradiction.kind,
                row: contradiction.row,
                col: contradiction.col,
                detail: contradiction.detail,
            },
            MAX_CONTRADICTIONS,
        );

        if self.data.change_count >= self.contradiction_threshold {
            self.data.changes_detected = true;
            for record in self.data.known_mines.values_mut() {
                record.count = (record.count * self.attenuation_factor).max(1.0);
                record.recent = false;
            }
        }
        self.persist();
    }

    /// Occurrence record of a bucket. Once changes are detected, counts are
    /// halved and reported as not recent; the stored record is unchanged.
    pub fn occurrence(&self, norm: NormalizedPosition) -> Option<MineOccurrence> {
        let record = self.data.known_mines.get(&norm.key())?;
        Some(if self.data.changes_detected {
            MineOccurrence {
                count: record.count / 2.0,
                recent: false,
            }
        } else {
            MineOccurrence {
                count: record.count,
                recent: record.recent,
            }
        })
    }

    pub fn best_opening(&self) -> Option<MoveStat> {
        self.opening_candidates().into_iter().next()
    }

    pub fn best_second_move(&self, first: NormalizedPosition) -> Option<MoveStat> {
        self.second_move_candidates(first).into_iter().next()
    }

    /// Forget everything, including the persisted copy.
    pub fn reset(&mut self) {
        self.data = MemoryStore::default();
        self.current_game = 0;
        log::info!("memory reset");
        self.persist();
    }

    pub fn stats(&self) -> MemoryStats {
        let s = &self.data.stats;
        let ratio = |num: f64| if s.games_played == 0 { 0.0 } else { num / s.games_played as f64 };
        MemoryStats {
            games_played: s.games_played,
            wins: s.wins,
            losses: s.losses,
            win_rate: ratio(s.wins as f64),
            average_moves: ratio(s.total_moves as f64),
            known_mine_buckets: self.data.known_mines.len(),
            contradictions: self.data.change_count,
            changes_detected: self.data.changes_detected,
            persistence_degraded: self.degraded,
        }
    }

    fn persist(&mut self) {
        if self.degraded {
            return;
        }
        let result = serde_json::to_value(&self.data)
            .map_err(PersistenceError::from)
            .and_then(|value| self.store.set(MEMORY_KEY, value));
        if let Err(e) = result {
            log::warn!("memory persistence failed ({e}); continuing in-memory only");
            self.degraded = true;
        }
    }
}

impl<S: KeyValueStore> PatternMemory for MemoryEngine<S> {
    fn mine_occurrence(&self, row: usize, col: usize, rows: usize, cols: usize) -> Option<MineOccurrence> {
        self.occurrence(normalize(row, col, rows, cols))
    }

    fn opening_candidates(&self) -> Vec<MoveStat> {
        let mut stats: Vec<MoveStat> = self
            .data
            .opening_moves
            .iter()
            .filter(|(_, t)| t.total() > 0)
            .filter_map(|(key, t)| Some(MoveStat::from_tally(key.parse().ok()?, t)))
            .collect();
        sort_best_first(&mut stats);
        stats
    }

    fn second_move_candidates(&self, first: NormalizedPosition) -> Vec<MoveStat> {
        let prefix = format!("{}|", first.key());
        let mut stats: Vec<MoveStat> = self
            .data
            .second_moves
            .iter()
            .filter(|(_, t)| t.total() > 0)
            .filter_map(|(key, t)| {
                let second = key.strip_prefix(&prefix)?.parse().ok()?;
                Some(MoveStat::from_tally(second, t))
            })
            .collect();
        sort_best_first(&mut stats);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> MemoryEngine<InMemoryStore> {
        MemoryEngine::load(InMemoryStore::new(), &EngineConfig::default())
    }

    fn probe(row: usize, col: usize) -> MoveRecord {
        MoveRecord {
            row,
            col,
            kind: MoveKind::Probe,
            ground_truth: None,
        }
    }

    fn contradiction() -> Contradiction {
        Contradiction {
            kind: ContradictionKind::SafeCellWasMine,
            row: 0,
            col: 0,
            detail: String::new(),
        }
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, PersistenceError> {
            Ok(None)
        }

        fn set(&mut self, _key: &str, _value: serde_json::Value) -> Result<(), PersistenceError> {
            Err(PersistenceError::Backend("quota exceeded".into()))
        }
    }

    #[test]
    fn test_normalize_origin() {
        for (rows, cols) in [(1, 1), (8, 8), (16, 30), (100, 3)] {
            assert_eq!(normalize(0, 0, rows, cols), NormalizedPosition { row: 0, col: 0 });
        }
    }

    #[test]
    fn test_normalize_across_sizes() {
        // Same relative position on 11x11 and 21x21 boards.
        assert_eq!(normalize(5, 10, 11, 11), normalize(10, 20, 21, 21));
        assert_eq!(normalize(10, 10, 11, 11), NormalizedPosition { row: 10, col: 10 });
        assert_eq!(normalize(3, 0, 9, 1), NormalizedPosition { row: 3, col: 0 });
        assert_eq!(normalize(7, 7, 8, 8).key(), "1.0,1.0");
        assert_eq!(normalize(1, 2, 8, 8).key(), "0.1,0.2");
    }

    #[test]
    fn test_key_parse() {
        let norm = NormalizedPosition { row: 3, col: 10 };
        assert_eq!(norm.key().parse::<NormalizedPosition>(), Ok(norm));
        assert!("nope".parse::<NormalizedPosition>().is_err());
        assert!("0.5,1.5".parse::<NormalizedPosition>().is_err());
    }

    #[test]
    fn test_denormalize() {
        assert_eq!(NormalizedPosition { row: 0, col: 10 }.denormalize(8, 8), (0, 7));
        assert_eq!(NormalizedPosition { row: 5, col: 5 }.denormalize(11, 21), (5, 10));
        assert_eq!(NormalizedPosition { row: 10, col: 10 }.denormalize(1, 1), (0, 0));
    }

    #[test]
    fn test_record_mine_found() {
        let mut mem = engine();
        let id = mem.begin_game();
        mem.record_mine_found((0, 0), 8, 8);
        mem.record_mine_found((0, 0), 8, 8);
        let occ = mem.mine_occurrence(0, 0, 16, 16).unwrap();
        assert_eq!(occ.count, 2.0);
        assert!(occ.recent);
        let record = &mem.data().known_mines["0.0,0.0"];
        assert_eq!(record.game_ids, VecDeque::from(vec![id]));
        assert!(record.first_seen <= record.last_seen);
    }

    #[test]
    fn test_three_contradictions_attenuate() {
        let mut mem = engine();
        for _ in 0..5 {
            mem.record_mine_found((3, 3), 8, 8);
        }
        let before = mem.mine_occurrence(3, 3, 8, 8).unwrap().count;

        mem.record_contradiction(contradiction());
        mem.record_contradiction(contradiction());
        assert!(!mem.changes_detected());
        assert_eq!(mem.mine_occurrence(3, 3, 8, 8).unwrap().count, before);

        mem.record_contradiction(contradiction());
        assert!(mem.changes_detected());
        let after = mem.mine_occurrence(3, 3, 8, 8).unwrap();
        assert!(after.count < before);
        assert!(!after.recent);
        // Stored count is attenuated once, the read is halved on top.
        assert!((mem.data().known_mines["0.4,0.4"].count - 3.5).abs() < 1e-12);
        assert!((after.count - 1.75).abs() < 1e-12);

        mem.record_contradiction(contradiction());
        assert!(mem.changes_detected());
        assert!(mem.mine_occurrence(3, 3, 8, 8).unwrap().count < after.count);
    }

    #[test]
    fn test_attenuation_floor() {
        let mut mem = engine();
        mem.record_mine_found((0, 0), 8, 8);
        for _ in 0..6 {
            mem.record_contradiction(contradiction());
        }
        assert_eq!(mem.data().known_mines["0.0,0.0"].count, 1.0);
        assert_eq!(mem.data().contradictions.len(), 6);
    }

    #[test]
    fn test_contradiction_ring_bounded() {
        let mut mem = engine();
        for _ in 0..25 {
            mem.record_contradiction(contradiction());
        }
        assert_eq!(mem.data().contradictions.len(), MAX_CONTRADICTIONS);
        assert_eq!(mem.data().change_count, 25);
    }

    #[test]
    fn test_game_result_tallies() {
        let mut mem = engine();
        mem.begin_game();
        mem.record_game_result(true, &[probe(0, 0), probe(7, 7)], 8, 8, 1200.0);
        mem.begin_game();
        mem.record_game_result(false, &[probe(0, 0)], 8, 8, 300.0);

        let opening = mem.best_opening().unwrap();
        assert_eq!(opening.position, NormalizedPosition { row: 0, col: 0 });
        assert_eq!(opening.games, 2);
        assert_eq!(opening.win_rate, 0.5);

        let second = mem.best_second_move(opening.position).unwrap();
        assert_eq!(second.position, NormalizedPosition { row: 10, col: 10 });
        assert_eq!(second.win_rate, 1.0);
        assert!((second.confidence - 0.1).abs() < 1e-12);

        assert_eq!(mem.data().winning_sequences.front().map(String::as_str), Some("0.0,0.0|1.0,1.0"));
        assert_eq!(mem.data().losing_sequences.len(), 1);

        let stats = mem.stats();
        assert_eq!(stats.games_played, 2);
        assert_eq!(stats.win_rate, 0.5);
        assert_eq!(stats.average_moves, 1.5);
    }

    #[test]
    fn test_games_fifo() {
        let mut mem = engine();
        for _ in 0..(MAX_GAMES + 5) {
            mem.begin_game();
            mem.record_game_result(true, &[probe(1, 1)], 8, 8, 0.0);
        }
        assert_eq!(mem.data().games.len(), MAX_GAMES);
        assert_eq!(mem.data().games.front().map(|g| g.id), Some(6));
    }

    #[test]
    fn test_persists_and_reloads() {
        let mut mem = engine();
        mem.record_mine_found((2, 2), 5, 5);
        let store = mem.store.clone();
        let reloaded = MemoryEngine::load(store, &EngineConfig::default());
        assert_eq!(reloaded.data(), mem.data());
    }

    #[test]
    fn test_shape_mismatch_falls_back() {
        let mut store = InMemoryStore::new();
        store
            .set(MEMORY_KEY, json!({ "knownMines": 5, "changeCount": "many" }))
            .unwrap();
        let mem = MemoryEngine::load(store, &EngineConfig::default());
        assert_eq!(mem.data(), &MemoryStore::default());

        let mut store = InMemoryStore::new();
        store.set(MEMORY_KEY, json!({ "version": 99 })).unwrap();
        let mem = MemoryEngine::load(store, &EngineConfig::default());
        assert_eq!(mem.data(), &MemoryStore::default());
    }

    #[test]
    fn test_missing_fields_default() {
        let mut store = InMemoryStore::new();
        store
            .set(MEMORY_KEY, json!({ "version": MEMORY_VERSION, "changeCount": 2 }))
            .unwrap();
        let mem = MemoryEngine::load(store, &EngineConfig::default());
        assert_eq!(mem.data().change_count, 2);
        assert!(mem.data().known_mines.is_empty());
    }

    #[test]
    fn test_failing_store_degrades() {
        let mut mem = MemoryEngine::load(FailingStore, &EngineConfig::default());
        assert!(!mem.is_degraded());
        mem.record_mine_found((0, 0), 4, 4);
        assert!(mem.is_degraded());
        assert!(mem.stats().persistence_degraded);
        mem.record_mine_found((0, 0), 4, 4);
        assert_eq!(mem.mine_occurrence(0, 0, 4, 4).unwrap().count, 2.0);
    }

    #[test]
    fn test_reset_clears() {
        let mut mem = engine();
        mem.record_mine_found((0, 0), 4, 4);
        mem.record_contradiction(contradiction());
        mem.reset();
        assert_eq!(mem.data(), &MemoryStore::default());
        assert!(mem.mine_occurrence(0, 0, 4, 4).is_none());
    }

    #[test]
    fn test_json_file_store() {
        let dir = std::env::temp_dir().join(format!("minesweeper-agent-test-{}", std::process::id()));
        let mut store = JsonFileStore::new(&dir);
        assert!(store.get("absent").unwrap().is_none());
        store.set("blob", json!({ "a": 1 })).unwrap();
        assert_eq!(store.get("blob").unwrap(), Some(json!({ "a": 1 })));
        let _ = fs::remove_dir_all(&dir);
    }
}
