//! Error types for segment codec and store operations.

use thiserror::Error;

/// Errors that can occur while encoding, decoding, or persisting segments.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("segment not found for db '{db}' starting at {start_t}")]
    NotFound { db: String, start_t: u64 },

    #[error("no segment covers the requested range for db '{db}'")]
    RangeNotFound { db: String },

    #[error("segment header has bad magic: {magic:#x}")]
    BadMagic { magic: u32 },

    #[error("unsupported wire format version: {version}")]
    UnsupportedVersion { version: u16 },

    #[error("segment codec error: {source}")]
    Codec {
        #[from]
        source: bincode::Error,
    },

    #[error("compression error: {0}")]
    Compression(String),

    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("invalid segment filename: {name}")]
    BadFilename { name: String },

    #[error("a passthrough store has no save-side effects")]
    PassthroughIsReadOnly,

    #[error("configuration error: {0}")]
    Configuration(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
