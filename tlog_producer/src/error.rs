//! Error types for the segment producer.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProducerError {
    #[error("source error: {0}")]
    Source(#[from] tlog_common::collaborators::CollabError),

    #[error("store error: {0}")]
    Store(#[from] tlog_store::error::StoreError),

    #[error("bulk backup aborted: segment [{start_t}, {end_t}) failed after {attempts} attempts: {source}")]
    SegmentFailed {
        start_t: u64,
        end_t: u64,
        attempts: u32,
        #[source]
        source: tlog_common::collaborators::CollabError,
    },

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type ProducerResult<T> = Result<T, ProducerError>;
