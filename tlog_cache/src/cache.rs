//! The bounded `old_eid -> new_eid` cache and its monotonic watermark.

use crate::error::{CacheError, CacheResult};
use lru::LruCache;
use rand::Rng;
use std::num::NonZeroUsize;
use tlog_common::collaborators::TargetConnection;
use tlog_common::eid::{Eid, TargetEid};
use tracing::error;

/// Entries held by default, each roughly the size of two `i64`s plus LRU
/// bookkeeping — the §4.3 budget of about 48 bytes/entry.
pub const DEFAULT_CAPACITY: usize = 1_000_000;

/// Default probability (as a fraction of 1) that a "new" decision is
/// double-checked against the target's `original_id` index.
pub const DEFAULT_VERIFICATION_PROBABILITY: f64 = 0.01;

/// Per-database id-resolution cache: a bounded LRU plus a monotonic
/// watermark that lets most lookups for genuinely-new entities skip the LRU
/// entirely.
pub struct IdCache {
    lru: LruCache<i64, i64>,
    max_seen_eidx: u64,
    verification_probability: f64,
}

impl IdCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            lru: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap()),
            max_seen_eidx: 0,
            verification_probability: DEFAULT_VERIFICATION_PROBABILITY,
        }
    }

    pub fn with_verification_probability(mut self, p: f64) -> Self {
        self.verification_probability = p.clamp(0.0, 1.0);
        self
    }

    /// `true` if `old`'s entity index exceeds anything durably mapped so
    /// far — it cannot have been restored before.
    pub fn is_new(&self, old: Eid) -> bool {
        old.entity_index() > self.max_seen_eidx
    }

    /// Resolve a previously-seen source eid, short-circuiting on the
    /// watermark before consulting the LRU.
    pub fn lookup(&mut self, old: Eid) -> Option<TargetEid> {
        if self.is_new(old) {
            return None;
        }
        self.lru.get(&old.0).copied().map(TargetEid)
    }

    /// Record a durable mapping and raise the watermark if this is the
    /// highest entity index seen yet.
    pub fn store(&mut self, old: Eid, new: TargetEid) {
        self.lru.put(old.0, new.0);
        self.max_seen_eidx = self.max_seen_eidx.max(old.entity_index());
    }

    /// Run the tunable-probability verification hook for a "new" decision.
    /// On a hit, logs and returns a [`CacheError::WatermarkViolation`] —
    /// callers should treat this as fatal for the enclosing segment.
    pub fn verify_new<T: TargetConnection + ?Sized>(
        &self,
        old: Eid,
        target: &T,
    ) -> CacheResult<()> {
        if self.verification_probability <= 0.0 {
            return Ok(());
        }
        if rand::thread_rng().gen::<f64>() >= self.verification_probability {
            return Ok(());
        }
        match target.probe_original_id(old) {
            Ok(Some(found)) => {
                error!(source = old.0, found = found.0, "cache watermark invariant violated");
                Err(CacheError::WatermarkViolation {
                    source: old.0,
                    found: found.0,
                })
            }
            Ok(None) => Ok(()),
            Err(e) => Err(CacheError::ProbeFailed(e.to_string())),
        }
    }

    pub fn len(&self) -> usize {
        self.lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lru.is_empty()
    }
}

impl Default for IdCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
