//! Error types for the replay engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("target transaction failed: {0}")]
    TransactionFailed(String),

    #[error("cache invariant violation: {0}")]
    Cache(#[from] tlog_cache::error::CacheError),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] tlog_common::collaborators::CollabError),

    #[error("structural error: {0}")]
    Structural(String),

    #[error("invariant violation: {0}")]
    Invariant(String),
}

pub type ReplayResult<T> = Result<T, ReplayError>;
