//! Single-shot segment consumer (§4.5): restores as much of one segment as
//! is available, against one target, and reports which of the four
//! terminal states it landed in.

use crate::error::ConsumerResult;
use std::collections::HashMap;
use tlog_cache::cache::IdCache;
use tlog_common::collaborators::TargetConnection;
use tlog_common::segment::SegmentRange;
use tlog_replay::carryover::CarryoverBuffer;
use tlog_replay::engine::{ReplayEngine, SchemaSnapshot};
use tlog_replay::filters::ReplayFilters;
use tlog_store::store::SegmentStore;
use tracing::{info, warn};

/// Terminal outcome of one [`restore_segment`] call.
#[derive(Debug)]
pub enum ConsumeOutcome {
    /// Every transaction in the enclosing segment was applied, up to `t`.
    RestoredSegment { up_to_t: u64 },
    /// The store has nothing beyond what the target already has.
    NothingNewAvailable,
    /// A target transaction failed; the cursor remains at `last_good_t`.
    TransactionFailed { last_good_t: u64, reason: String },
    /// The enclosing segment's payload doesn't reach `desired_start`; the
    /// store needs repairing before a retry can make progress.
    PartialSegment { desired_start: u64, reached_t: Option<u64> },
}

fn install_attribute_ident() -> tlog_common::value::Keyword {
    tlog_common::value::Keyword::new("db.install", "attribute")
}

/// Drives the replay engine across an already-loaded segment. Holds no
/// store of its own, so the continuous driver can use it directly on
/// segments that arrive over its prefetch channel.
pub struct SegmentReplayer<'a> {
    cache: &'a mut IdCache,
    carryover: &'a mut CarryoverBuffer,
    filters: Option<&'a ReplayFilters>,
}

impl<'a> SegmentReplayer<'a> {
    pub fn new(cache: &'a mut IdCache, carryover: &'a mut CarryoverBuffer) -> Self {
        Self {
            cache,
            carryover,
            filters: None,
        }
    }

    pub fn with_filters(mut self, filters: &'a ReplayFilters) -> Self {
        self.filters = Some(filters);
        self
    }

    fn refresh_cardinalities(
        target: &dyn TargetConnection,
    ) -> HashMap<tlog_common::eid::TargetEid, tlog_common::collaborators::Cardinality> {
        target.attr_cardinalities().unwrap_or_default()
    }

    /// Steps 6-8: drive the replay engine across an already-loaded segment's
    /// transactions where `t > from_t`.
    pub fn replay_loaded_segment(
        &mut self,
        db: &str,
        target: &dyn TargetConnection,
        segment: &tlog_common::segment::Segment,
        from_t: u64,
    ) -> ConsumerResult<ConsumeOutcome> {
        let mut schema = SchemaSnapshot {
            id_to_attr: segment.id_to_attr.clone(),
            refs: segment.refs.clone(),
            target_cardinalities: Self::refresh_cardinalities(target),
        };

        let mut prev_t = from_t;
        let mut last_good_t = prev_t;

        for tx in segment.transactions.iter().filter(|tx| tx.t > prev_t) {
            let installs_attribute = tx.data.iter().any(|d| {
                schema
                    .id_to_attr
                    .get(&d.a)
                    .is_some_and(|ident| *ident == install_attribute_ident())
            });

            let mut engine = ReplayEngine::new(self.cache, self.carryover);
            if let Some(filters) = self.filters {
                engine = engine.with_filters(filters);
            }

            match engine.replay(db, target, &schema, tx, prev_t) {
                Ok(outcome) => {
                    last_good_t = outcome.applied_t;
                    prev_t = outcome.applied_t;
                    if installs_attribute {
                        schema.target_cardinalities = Self::refresh_cardinalities(target);
                    }
                }
                Err(err) => {
                    warn!(db, t = tx.t, %err, "transaction failed during replay");
                    return Ok(ConsumeOutcome::TransactionFailed {
                        last_good_t,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(db, up_to_t = last_good_t, "segment restored");
        Ok(ConsumeOutcome::RestoredSegment {
            up_to_t: last_good_t,
        })
    }
}

/// Run §4.5 steps 1-8 for one database against one [`SegmentStore`].
pub struct SegmentConsumer<'a, St: SegmentStore> {
    store: &'a St,
    replayer: SegmentReplayer<'a>,
}

impl<'a, St: SegmentStore> SegmentConsumer<'a, St> {
    pub fn new(store: &'a St, cache: &'a mut IdCache, carryover: &'a mut CarryoverBuffer) -> Self {
        Self {
            store,
            replayer: SegmentReplayer::new(cache, carryover),
        }
    }

    pub fn with_filters(mut self, filters: &'a ReplayFilters) -> Self {
        self.replayer = self.replayer.with_filters(filters);
        self
    }

    /// Run §4.5 steps 1-8 for one database.
    pub fn restore_segment(
        &mut self,
        db: &str,
        target: &mut dyn TargetConnection,
    ) -> ConsumerResult<ConsumeOutcome> {
        let t_last = target.read_last_source_transaction()?;
        let desired_start = t_last.map(|t| t + 1).unwrap_or(1);

        let last_range = self.store.last(db)?;
        let covers_tip = last_range.is_some_and(|r| r.end_t >= desired_start);
        if !covers_tip {
            return Ok(ConsumeOutcome::NothingNewAvailable);
        }

        if desired_start < 2 {
            let installed = target.ensure_bookkeeping_schema()?;
            if installed {
                info!(db, "installed target bookkeeping schema");
            }
        }

        let ranges = self.store.list(db)?;
        let Some(enclosing) = ranges
            .iter()
            .find(|r| r.start_t <= desired_start && desired_start <= r.end_t)
        else {
            return Ok(ConsumeOutcome::NothingNewAvailable);
        };

        let segment = self
            .store
            .load_range(db, enclosing.start_t, enclosing.end_t)?;

        if segment.last_contained_t().is_none_or(|t| t < desired_start) {
            return Ok(ConsumeOutcome::PartialSegment {
                desired_start,
                reached_t: segment.last_contained_t(),
            });
        }

        self.replayer
            .replay_loaded_segment(db, &*target, &segment, t_last.unwrap_or(0))
    }

    /// Convenience accessor mirroring the store's own `last`, for callers
    /// that want to check availability without running a full pass.
    pub fn last_range(&self, db: &str) -> ConsumerResult<Option<SegmentRange>> {
        Ok(self.store.last(db)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlog_common::datom::{Datom, TxEntry};
    use tlog_common::eid::Eid;
    use tlog_common::segment::Segment;
    use tlog_common::testing::FakeTargetConnection;
    use tlog_common::value::{Keyword, Value};
    use tlog_store::memory::MemoryStore;

    fn simple_segment() -> Segment {
        let mut id_to_attr = HashMap::new();
        id_to_attr.insert(Eid(900), Keyword::new("db", "txInstant"));
        id_to_attr.insert(Eid(901), Keyword::new("person", "name"));

        Segment {
            start_t: 1,
            end_t: 1,
            refs: Default::default(),
            id_to_attr,
            transactions: vec![TxEntry {
                t: 1,
                tx_eid: Eid(1000),
                data: vec![
                    Datom {
                        e: Eid(1000),
                        a: Eid(900),
                        v: Value::Instant(tlog_replay::engine::EPOCH_2000_MS + 1),
                        tx: Eid(1000),
                        added: true,
                    },
                    Datom {
                        e: Eid(5000),
                        a: Eid(901),
                        v: Value::Str("Bob".into()),
                        tx: Eid(1000),
                        added: true,
                    },
                ],
            }],
        }
    }

    #[test]
    fn nothing_new_available_on_an_empty_store() {
        let store = MemoryStore::new();
        let mut target = FakeTargetConnection::new();
        target.ensure_bookkeeping_schema().unwrap();
        let mut cache = IdCache::new(16);
        let mut carryover = CarryoverBuffer::new();
        let mut consumer = SegmentConsumer::new(&store, &mut cache, &mut carryover);

        let outcome = consumer.restore_segment("db", &mut target).unwrap();
        assert!(matches!(outcome, ConsumeOutcome::NothingNewAvailable));
    }

    #[test]
    fn restores_a_full_segment() {
        let store = MemoryStore::new();
        store.save("db", &simple_segment()).unwrap();

        let mut target = FakeTargetConnection::new();
        target.register_attribute("person/name", tlog_common::collaborators::Cardinality::One, false);

        let mut cache = IdCache::new(16);
        let mut carryover = CarryoverBuffer::new();
        let mut consumer = SegmentConsumer::new(&store, &mut cache, &mut carryover);

        let outcome = consumer.restore_segment("db", &mut target).unwrap();
        assert!(matches!(
            outcome,
            ConsumeOutcome::RestoredSegment { up_to_t: 1 }
        ));
    }

    #[test]
    fn catching_up_twice_is_idempotent() {
        let store = MemoryStore::new();
        store.save("db", &simple_segment()).unwrap();

        let mut target = FakeTargetConnection::new();
        target.register_attribute("person/name", tlog_common::collaborators::Cardinality::One, false);

        let mut cache = IdCache::new(16);
        let mut carryover = CarryoverBuffer::new();
        let mut consumer = SegmentConsumer::new(&store, &mut cache, &mut carryover);

        consumer.restore_segment("db", &mut target).unwrap();
        let second = consumer.restore_segment("db", &mut target).unwrap();
        assert!(matches!(second, ConsumeOutcome::NothingNewAvailable));
    }
}
