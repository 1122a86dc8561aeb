//! Segment producer (§4.1): reads source transaction-log ranges and writes
//! them out as durable segments.

use crate::error::{ProducerError, ProducerResult};
use std::sync::atomic::{AtomicBool, Ordering};
use tlog_common::collaborators::SourceLog;
use tlog_common::segment::{find_gaps, Gap, Segment, SegmentRange};
use tlog_store::store::SegmentStore;
use tracing::{info, instrument, warn};

const DEFAULT_MAX_RETRIES: u32 = 3;

/// Backs up a single source database's transaction log into a
/// [`SegmentStore`]. Stateless beyond its two collaborators — every
/// operation re-derives what it needs from `source`/`store`.
pub struct SegmentProducer<'a, S: SourceLog, St: SegmentStore> {
    source: &'a S,
    store: &'a St,
    max_retries: u32,
}

impl<'a, S: SourceLog, St: SegmentStore> SegmentProducer<'a, S, St> {
    pub fn new(source: &'a S, store: &'a St) -> Self {
        Self {
            source,
            store,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The primitive backup operation: read `[start_t, end_t)`, and if
    /// non-empty, write one segment covering the actually-observed bounds.
    /// Idempotent — writing the same range twice overwrites identically.
    #[instrument(skip(self), fields(db))]
    pub fn backup_segment(
        &self,
        db: &str,
        start_t: u64,
        end_t: u64,
    ) -> ProducerResult<Option<SegmentRange>> {
        let transactions = self.source.transactions_in(start_t, end_t)?;
        if transactions.is_empty() {
            return Ok(None);
        }
        let refs = self.source.refs_snapshot()?;
        let id_to_attr = self.source.id_to_attr_snapshot()?;

        let observed_start = transactions.first().map(|tx| tx.t).unwrap();
        let observed_end = transactions.last().map(|tx| tx.t).unwrap();

        let segment = Segment {
            start_t: observed_start,
            end_t: observed_end,
            refs,
            id_to_attr,
            transactions,
        };
        let range = segment.range();
        self.store.save(db, &segment)?;
        info!(db, start_t = range.start_t, end_t = range.end_t, "segment written");
        Ok(Some(range))
    }

    /// Continue backup from wherever the store last left off, writing at
    /// most one segment of up to `max_txns` transactions. Returns the
    /// number of transactions written (zero if already at the tip).
    pub fn backup_next(&self, db: &str, max_txns: u64) -> ProducerResult<usize> {
        let start = match self.store.last(db)? {
            Some(last) => last.end_t + 1,
            None => 1,
        };
        match self.backup_segment(db, start, start + max_txns)? {
            Some(range) => Ok((range.end_t - range.start_t + 1) as usize),
            None => Ok(0),
        }
    }

    /// Drive §4.1 entry point 3: partition `[starting_segment * size, tip]`
    /// into equal-sized ranges and back each one up, optionally in
    /// parallel via plain OS threads.
    pub fn backup_bulk(
        &self,
        db: &str,
        txns_per_segment: u64,
        starting_segment: u64,
        parallel: bool,
    ) -> ProducerResult<Vec<SegmentRange>> {
        let tip = match self.source.latest_t()? {
            Some(t) => t,
            None => return Ok(vec![]),
        };
        let mut start = starting_segment * txns_per_segment + 1;
        let mut ranges = Vec::new();
        while start <= tip {
            ranges.push((start, start + txns_per_segment));
            start += txns_per_segment;
        }

        if !parallel {
            let mut out = Vec::new();
            for (s, e) in ranges {
                out.push(self.backup_one_with_retries(db, s, e)?);
            }
            return Ok(out.into_iter().flatten().collect());
        }

        let poisoned = AtomicBool::new(false);
        let results: Vec<ProducerResult<Option<SegmentRange>>> = std::thread::scope(|scope| {
            let handles: Vec<_> = ranges
                .into_iter()
                .map(|(s, e)| {
                    let poisoned = &poisoned;
                    scope.spawn(move || {
                        if poisoned.load(Ordering::SeqCst) {
                            return Ok(None);
                        }
                        match self.backup_one_with_retries(db, s, e) {
                            Ok(range) => Ok(range),
                            Err(err) => {
                                poisoned.store(true, Ordering::SeqCst);
                                Err(err)
                            }
                        }
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().expect("backup worker thread panicked"))
                .collect()
        });

        let mut out = Vec::new();
        for result in results {
            out.push(result?);
        }
        Ok(out.into_iter().flatten().collect())
    }

    fn backup_one_with_retries(
        &self,
        db: &str,
        start_t: u64,
        end_t: u64,
    ) -> ProducerResult<Option<SegmentRange>> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.backup_segment(db, start_t, end_t) {
                Ok(range) => return Ok(range),
                Err(err) if attempts < self.max_retries && is_retryable(&err) => {
                    warn!(db, start_t, end_t, attempts, %err, "retrying segment backup");
                    continue;
                }
                Err(ProducerError::Source(source)) => {
                    return Err(ProducerError::SegmentFailed {
                        start_t,
                        end_t,
                        attempts,
                        source,
                    })
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// List gaps in `db`'s segment sequence.
    pub fn gaps(&self, db: &str) -> ProducerResult<Vec<Gap>> {
        Ok(find_gaps(&self.store.list(db)?))
    }

    /// Fill every gap in `db`'s segment sequence by calling
    /// [`Self::backup_segment`] on it.
    pub fn repair(&self, db: &str) -> ProducerResult<Vec<SegmentRange>> {
        let gaps = self.gaps(db)?;
        let mut filled = Vec::new();
        for gap in gaps {
            if let Some(range) = self.backup_segment(db, gap.start_t, gap.end_t + 1)? {
                filled.push(range);
            }
        }
        Ok(filled)
    }
}

fn is_retryable(err: &ProducerError) -> bool {
    matches!(err, ProducerError::Source(e) if e.is_transient())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlog_common::testing::FakeSourceLog;
    use tlog_store::memory::MemoryStore;

    fn entry(t: u64) -> tlog_common::datom::TxEntry {
        tlog_common::datom::TxEntry {
            t,
            tx_eid: tlog_common::eid::Eid(1000 + t as i64),
            data: vec![],
        }
    }

    #[test]
    fn backup_segment_writes_observed_bounds() {
        let source = FakeSourceLog::new(vec![entry(1), entry(2), entry(3)]);
        let store = MemoryStore::new();
        let producer = SegmentProducer::new(&source, &store);

        let range = producer.backup_segment("db", 1, 10).unwrap().unwrap();
        assert_eq!(range, SegmentRange { start_t: 1, end_t: 3 });
    }

    #[test]
    fn backup_segment_on_empty_range_writes_nothing() {
        let source = FakeSourceLog::new(vec![]);
        let store = MemoryStore::new();
        let producer = SegmentProducer::new(&source, &store);
        assert!(producer.backup_segment("db", 1, 10).unwrap().is_none());
    }

    #[test]
    fn backup_next_continues_from_the_tip() {
        let source = FakeSourceLog::new(vec![entry(1), entry(2), entry(3), entry(4)]);
        let store = MemoryStore::new();
        let producer = SegmentProducer::new(&source, &store);

        assert_eq!(producer.backup_next("db", 2).unwrap(), 2);
        assert_eq!(producer.backup_next("db", 2).unwrap(), 2);
        assert_eq!(producer.backup_next("db", 2).unwrap(), 0);
    }

    #[test]
    fn gaps_are_detected_between_segments() {
        let store = MemoryStore::new();
        let source = FakeSourceLog::new(vec![]);
        let producer = SegmentProducer::new(&source, &store);

        store
            .save(
                "db",
                &Segment {
                    start_t: 1,
                    end_t: 105,
                    refs: Default::default(),
                    id_to_attr: Default::default(),
                    transactions: vec![],
                },
            )
            .unwrap();
        store
            .save(
                "db",
                &Segment {
                    start_t: 110,
                    end_t: 118,
                    refs: Default::default(),
                    id_to_attr: Default::default(),
                    transactions: vec![],
                },
            )
            .unwrap();

        let gaps = producer.gaps("db").unwrap();
        assert_eq!(gaps, vec![Gap { start_t: 106, end_t: 109 }]);
    }

    #[test]
    fn bulk_backup_covers_the_whole_log_sequentially() {
        let entries: Vec<_> = (1..=10).map(entry).collect();
        let source = FakeSourceLog::new(entries);
        let store = MemoryStore::new();
        let producer = SegmentProducer::new(&source, &store);

        let ranges = producer.backup_bulk("db", 3, 0, false).unwrap();
        assert_eq!(ranges.len(), 4); // 1-3, 4-6, 7-9, 10-10
        assert_eq!(ranges.last().unwrap().end_t, 10);
    }

    #[test]
    fn bulk_backup_covers_the_whole_log_in_parallel() {
        let entries: Vec<_> = (1..=20).map(entry).collect();
        let source = FakeSourceLog::new(entries);
        let store = MemoryStore::new();
        let producer = SegmentProducer::new(&source, &store);

        let ranges = producer.backup_bulk("db", 5, 0, true).unwrap();
        let mut list = store.list("db").unwrap();
        list.sort_by_key(|r| r.start_t);
        assert_eq!(ranges.len(), list.len());
        assert_eq!(list.last().unwrap().end_t, 20);
    }
}
