//! Adapts a live [`SourceLog`] into the [`SegmentStore`] interface so the
//! continuous restore driver can treat "read straight from the source" and
//! "read from a durable segment archive" identically (§4.2.1's "virtual
//! store" mode).

use crate::error::{StoreError, StoreResult};
use crate::store::SegmentStore;
use std::collections::HashSet;
use tlog_common::collaborators::SourceLog;
use tlog_common::segment::{Segment, SegmentRange};

/// A read-only [`SegmentStore`] view over a [`SourceLog`]. `save` is
/// unreachable: nothing ever writes segments back into the source.
pub struct PassthroughStore<S: SourceLog> {
    source: S,
}

impl<S: SourceLog> PassthroughStore<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    fn assemble(&self, db: &str, start_t: u64, end_t: u64) -> StoreResult<Segment> {
        let start = if start_t == 0 { 1 } else { start_t };
        let transactions = self
            .source
            .transactions_in(start, end_t + 1)
            .map_err(|e| StoreError::Configuration(e.to_string()))?;
        if transactions.is_empty() {
            return Err(StoreError::NotFound {
                db: db.to_string(),
                start_t,
            });
        }
        let refs: HashSet<_> = self
            .source
            .refs_snapshot()
            .map_err(|e| StoreError::Configuration(e.to_string()))?;
        let id_to_attr = self
            .source
            .id_to_attr_snapshot()
            .map_err(|e| StoreError::Configuration(e.to_string()))?;
        let actual_end = transactions.iter().map(|tx| tx.t).max().unwrap_or(end_t);
        Ok(Segment {
            start_t: transactions.first().map(|tx| tx.t).unwrap_or(start),
            end_t: actual_end,
            refs,
            id_to_attr,
            transactions,
        })
    }
}

impl<S: SourceLog> SegmentStore for PassthroughStore<S> {
    fn save(&self, _db: &str, _segment: &Segment) -> StoreResult<()> {
        Err(StoreError::PassthroughIsReadOnly)
    }

    fn list(&self, _db: &str) -> StoreResult<Vec<SegmentRange>> {
        let latest = self
            .source
            .latest_t()
            .map_err(|e| StoreError::Configuration(e.to_string()))?;
        Ok(match latest {
            Some(end_t) => vec![SegmentRange { start_t: 1, end_t }],
            None => vec![],
        })
    }

    fn load_from(&self, db: &str, start_t: u64) -> StoreResult<Segment> {
        let end_t = self
            .source
            .latest_t()
            .map_err(|e| StoreError::Configuration(e.to_string()))?
            .ok_or_else(|| StoreError::NotFound {
                db: db.to_string(),
                start_t,
            })?;
        self.assemble(db, start_t, end_t)
    }

    fn load_range(&self, db: &str, start_t: u64, end_t: u64) -> StoreResult<Segment> {
        self.assemble(db, start_t, end_t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlog_common::datom::{Datom, TxEntry};
    use tlog_common::eid::Eid;
    use tlog_common::testing::FakeSourceLog;
    use tlog_common::value::Value;

    fn one_tx_source() -> FakeSourceLog {
        FakeSourceLog::new(vec![TxEntry {
            t: 5,
            tx_eid: Eid(1000),
            data: vec![Datom {
                e: Eid(1000),
                a: Eid(50),
                v: Value::Instant(0),
                tx: Eid(1000),
                added: true,
            }],
        }])
    }

    #[test]
    fn save_is_rejected() {
        let store = PassthroughStore::new(one_tx_source());
        let segment = Segment {
            start_t: 1,
            end_t: 2,
            refs: Default::default(),
            id_to_attr: Default::default(),
            transactions: vec![],
        };
        assert!(matches!(
            store.save("db", &segment),
            Err(StoreError::PassthroughIsReadOnly)
        ));
    }

    #[test]
    fn empty_source_has_nothing_to_load() {
        let store = PassthroughStore::new(FakeSourceLog::new(vec![]));
        assert!(store.list("db").unwrap().is_empty());
        assert!(store.load_from("db", 0).is_err());
    }

    #[test]
    fn load_from_zero_returns_the_whole_log() {
        let store = PassthroughStore::new(one_tx_source());
        let segment = store.load_from("db", 0).unwrap();
        assert_eq!(segment.transactions.len(), 1);
        assert_eq!(segment.end_t, 5);
    }
}
