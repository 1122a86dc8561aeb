//! Error type for the continuous restore driver and its CLI.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("store error: {0}")]
    Store(#[from] tlog_store::error::StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] tlog_cache::error::CacheError),

    #[error("replay error: {0}")]
    Replay(#[from] tlog_replay::error::ReplayError),

    #[error("producer error: {0}")]
    Producer(#[from] tlog_producer::error::ProducerError),

    #[error("consumer error: {0}")]
    Consumer(#[from] tlog_consumer::error::ConsumerError),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] tlog_common::collaborators::CollabError),

    #[error("configuration error: {0}")]
    Config(#[from] tlog_common::config::ConfigError),

    #[error("failed to install a shutdown signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

pub type RestoreResult<T> = Result<T, RestoreError>;
