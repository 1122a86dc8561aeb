//! Process-wide registry handing out one [`IdCache`] per database, the way
//! the teacher's `evo_hal` driver registry hands out per-device state lazily.

use crate::cache::IdCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

static REGISTRY: Lazy<Mutex<HashMap<String, Arc<Mutex<IdCache>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Keyed access to per-database [`IdCache`] instances, created on first use
/// with the default capacity.
pub struct CacheRegistry;

impl CacheRegistry {
    /// Get (creating if absent) the cache for `db`.
    pub fn get(db: &str) -> Arc<Mutex<IdCache>> {
        REGISTRY
            .lock()
            .entry(db.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(IdCache::default())))
            .clone()
    }

    /// Drop and recreate the entry for `db`, for test isolation.
    pub fn reset(db: &str) {
        REGISTRY.lock().remove(db);
    }
}
