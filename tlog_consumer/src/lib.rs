//! Single-shot segment consumer: drives the replay engine across one
//! segment at a time against one target, reporting a terminal outcome.

pub mod consumer;
pub mod error;

pub mod prelude {
    pub use crate::consumer::{ConsumeOutcome, SegmentConsumer, SegmentReplayer};
    pub use crate::error::{ConsumerError, ConsumerResult};
}
