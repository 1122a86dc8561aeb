//! Error types for the ID-resolution cache.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invariant violation: source eid {source} was classified as new (entity_index above the watermark) but the target's original_id index already maps it to target eid {found}")]
    WatermarkViolation { source: i64, found: i64 },

    #[error("target probe failed during cache verification: {0}")]
    ProbeFailed(String),
}

pub type CacheResult<T> = Result<T, CacheError>;
