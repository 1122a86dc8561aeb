//! Test-only in-memory segment store.

use crate::error::{StoreError, StoreResult};
use crate::store::SegmentStore;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tlog_common::segment::{Segment, SegmentRange};

/// Segments keyed by `(db, start_t)`, held entirely in process memory. Used
/// throughout this crate's own tests and exported for downstream
/// integration tests that don't want filesystem fixtures.
#[derive(Default)]
pub struct MemoryStore {
    segments: Mutex<BTreeMap<(String, u64), Segment>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            segments: Mutex::new(BTreeMap::new()),
        }
    }
}

impl SegmentStore for MemoryStore {
    fn save(&self, db: &str, segment: &Segment) -> StoreResult<()> {
        self.segments
            .lock()
            .insert((db.to_string(), segment.start_t), segment.clone());
        Ok(())
    }

    fn list(&self, db: &str) -> StoreResult<Vec<SegmentRange>> {
        Ok(self
            .segments
            .lock()
            .iter()
            .filter(|((d, _), _)| d == db)
            .map(|(_, s)| s.range())
            .collect())
    }

    fn load_from(&self, db: &str, start_t: u64) -> StoreResult<Segment> {
        let segments = self.segments.lock();
        let found = if start_t == 0 {
            segments
                .iter()
                .filter(|((d, _), _)| d == db)
                .map(|(_, s)| s)
                .next()
        } else {
            segments.get(&(db.to_string(), start_t))
        };
        found.cloned().ok_or_else(|| StoreError::NotFound {
            db: db.to_string(),
            start_t,
        })
    }

    fn load_range(&self, db: &str, start_t: u64, end_t: u64) -> StoreResult<Segment> {
        let segment = self.load_from(db, start_t)?;
        if segment.end_t != end_t {
            return Err(StoreError::NotFound {
                db: db.to_string(),
                start_t,
            });
        }
        Ok(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    fn segment(start: u64, end: u64) -> Segment {
        Segment {
            start_t: start,
            end_t: end,
            refs: HashSet::new(),
            id_to_attr: HashMap::new(),
            transactions: vec![],
        }
    }

    #[test]
    fn save_then_load_round_trips() {
        let store = MemoryStore::new();
        store.save("db", &segment(1, 10)).unwrap();
        let loaded = store.load_from("db", 1).unwrap();
        assert_eq!(loaded.start_t, 1);
        assert_eq!(loaded.end_t, 10);
    }

    #[test]
    fn start_zero_means_first() {
        let store = MemoryStore::new();
        store.save("db", &segment(5, 10)).unwrap();
        let loaded = store.load_from("db", 0).unwrap();
        assert_eq!(loaded.start_t, 5);
    }

    #[test]
    fn list_is_sorted_by_start_t() {
        let store = MemoryStore::new();
        store.save("db", &segment(10, 20)).unwrap();
        store.save("db", &segment(1, 9)).unwrap();
        let ranges = store.list("db").unwrap();
        assert_eq!(ranges[0].start_t, 1);
        assert_eq!(ranges[1].start_t, 10);
    }

    #[test]
    fn overwriting_same_range_is_idempotent() {
        let store = MemoryStore::new();
        store.save("db", &segment(1, 10)).unwrap();
        store.save("db", &segment(1, 10)).unwrap();
        assert_eq!(store.list("db").unwrap().len(), 1);
    }

    #[test]
    fn load_range_rejects_mismatched_end() {
        let store = MemoryStore::new();
        store.save("db", &segment(1, 10)).unwrap();
        assert!(store.load_range("db", 1, 99).is_err());
    }
}
