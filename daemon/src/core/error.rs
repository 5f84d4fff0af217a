use kura_common::{encoding::EncodingError, transaction::TransactionError};
use thiserror::Error;

/// Errors raised by the application core.
///
/// Per-transaction failures never surface here: they become result codes in
/// the block response. `ChainError` is for the conditions that the process
/// either reports to the driver or dies over.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Storage corruption: {0}")]
    Corruption(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Genesis error: {0}")]
    Genesis(#[from] crate::core::genesis::GenesisError),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Commit tag {attempted} is not above the last applied tag {current}")]
    NonMonotonicCommit { current: u64, attempted: u64 },

    #[error("{0} is only valid inside an open block")]
    NoOpenBlock(&'static str),

    #[error("Simulation stores cannot hard_apply")]
    SimulationCommit,

    #[error("Configuration error: {0}")]
    Config(String),
}
