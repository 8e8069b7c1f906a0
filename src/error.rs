//! Error types for the engine and its persistence collaborator.

use thiserror::Error;

/// Errors surfaced by the grid model and the game session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("position ({row}, {col}) is outside the {rows}x{cols} grid")]
    InvalidPosition {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("grid dimensions must be between 1x1 and 65535x65535, got {rows}x{cols}")]
    InvalidDimensions { rows: usize, cols: usize },

    #[error("unrecognized ground truth value '{0}'")]
    InvalidGroundTruth(String),

    #[error("move computation failed: {0}")]
    MoveFailed(String),
}

/// Failures of the key-value store holding the memory blob. Never fatal:
/// the memory engine falls back to in-memory operation.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("memory blob could not be (de)serialized: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}
