//! Error taxonomy for the mining pipeline.
//!
//! Only the orchestrator surfaces `NoLogicFound`. Degenerate RANSAC samples,
//! rejected syntheses and terminated lift branches are ordinary values, not
//! errors.

use thiserror::Error;

/// Errors that can occur while mining a dataset.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MinerError {
    /// No strategy (polynomial, synthesis, Mahler, real) cleared `min_consensus`.
    #[error("no logic rule found: {reason}")]
    NoLogicFound { reason: String },

    /// Malformed observations (length mismatch, empty set, ragged vectors).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration values out of range.
    #[error("config error: {0}")]
    Config(String),

    /// Configuration could not be parsed.
    #[error("config parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for MinerError {
    fn from(err: serde_json::Error) -> Self {
        MinerError::Parse(err.to_string())
    }
}

pub type MinerResult<T> = Result<T, MinerError>;
