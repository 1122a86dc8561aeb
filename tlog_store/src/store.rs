//! The `SegmentStore` capability set every backend implements.

use crate::error::StoreResult;
use tlog_common::segment::{Segment, SegmentRange};

/// A key-addressed blob store keyed by `(db_name, start_t, end_t)`.
///
/// Implementations must make `save` atomic (a reader never observes a
/// partially-written segment) and `save` of an already-present range must
/// be a no-op-equivalent idempotent overwrite (§3 ownership & lifecycle).
pub trait SegmentStore: Send + Sync {
    /// Atomically publish one segment.
    fn save(&self, db: &str, segment: &Segment) -> StoreResult<()>;

    /// All segment ranges for `db`, sorted by `start_t`.
    fn list(&self, db: &str) -> StoreResult<Vec<SegmentRange>>;

    /// A cheap hint for the newest segment range, equal to `list(db).last()`
    /// whenever both are available.
    fn last(&self, db: &str) -> StoreResult<Option<SegmentRange>> {
        Ok(self.list(db)?.into_iter().next_back())
    }

    /// Exact-match load by start. `start_t == 0` means "the first segment".
    fn load_from(&self, db: &str, start_t: u64) -> StoreResult<Segment>;

    /// Exact-match load by both bounds.
    fn load_range(&self, db: &str, start_t: u64, end_t: u64) -> StoreResult<Segment>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use std::collections::{HashMap, HashSet};
    use tlog_common::prelude::*;

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
    fn default_last_matches_list_last() {
        let store = MemoryStore::new();
        store.save("db", &segment(1, 2)).unwrap();
        store.save("db", &segment(3, 4)).unwrap();
        assert_eq!(
            store.last("db").unwrap(),
            store.list("db").unwrap().last().copied()
        );
    }
}
