//! Error types for the single-shot segment consumer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("store error: {0}")]
    Store(#[from] tlog_store::error::StoreError),

    #[error("replay error: {0}")]
    Replay(#[from] tlog_replay::error::ReplayError),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] tlog_common::collaborators::CollabError),
}

pub type ConsumerResult<T> = Result<T, ConsumerError>;
