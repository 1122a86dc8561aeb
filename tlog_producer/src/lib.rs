//! Segment producer: backs a source transaction log up into a segment store.

pub mod backup;
pub mod error;

pub mod prelude {
    pub use crate::backup::SegmentProducer;
    pub use crate::error::{ProducerError, ProducerResult};
}
