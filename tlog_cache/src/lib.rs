//! Bounded ID-resolution cache: `source EID -> target EID`, with a
//! monotonic watermark fast path and a tunable verification hook.

pub mod cache;
pub mod error;
pub mod registry;

pub mod prelude {
    pub use crate::cache::{IdCache, DEFAULT_CAPACITY, DEFAULT_VERIFICATION_PROBABILITY};
    pub use crate::error::{CacheError, CacheResult};
    pub use crate::registry::CacheRegistry;
}
