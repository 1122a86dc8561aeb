//! Per-transaction replay engine: turns one source transaction-log entry
//! into a target op list and submits it (§4.4).

pub mod carryover;
pub mod engine;
pub mod error;
pub mod filters;

pub mod prelude {
    pub use crate::carryover::CarryoverBuffer;
    pub use crate::engine::{ReplayEngine, ReplayOutcome, SchemaSnapshot, EPOCH_2000_MS};
    pub use crate::error::{ReplayError, ReplayResult};
    pub use crate::filters::ReplayFilters;
}
