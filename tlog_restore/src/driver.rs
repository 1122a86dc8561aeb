//! Continuous restore driver (§4.6): a prefetcher task pulls freshly
//! backed-up segments off the store and a consumer task replays them into
//! the target, the two cooperating over a bounded channel with
//! exponential-backoff recovery on either side.

use crate::error::RestoreResult;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tlog_cache::cache::{IdCache, DEFAULT_CAPACITY};
use tlog_common::collaborators::TargetConnection;
use tlog_common::segment::{Segment, SegmentRange};
use tlog_consumer::consumer::{ConsumeOutcome, SegmentReplayer};
use tlog_replay::carryover::CarryoverBuffer;
use tlog_replay::filters::ReplayFilters;
use tlog_store::store::SegmentStore;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

/// One item flowing from the prefetcher to the consumer task.
enum PipelineItem {
    Segment(Segment),
    CaughtUp,
    Error(String),
}

/// Tunables for [`run_continuous`], mirroring the CLI surface in §4.6.1.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub poll_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub channel_capacity: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
            channel_capacity: 5,
        }
    }
}

/// Why [`run_continuous`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Cancelled,
    ChannelClosed,
}

fn find_enclosing(ranges: &[SegmentRange], t: u64) -> Option<SegmentRange> {
    ranges
        .iter()
        .find(|r| r.start_t <= t && t <= r.end_t)
        .copied()
}

/// Polls `cancel` until it is set. Paired with `tokio::select!` so a retry
/// sleep can be interrupted by a shutdown signal instead of running to completion.
async fn wait_for_cancel(cancel: &AtomicBool) {
    while !cancel.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Run §4.6 for one database until `cancel` is observed set or the channel
/// closes. `store` supplies already-backed-up segments; `target` is the
/// sole owner of its mutable bookkeeping state (only this task touches it).
#[instrument(skip(store, target, cancel, config, filters), fields(db = %db))]
pub async fn run_continuous<St, T>(
    db: String,
    store: Arc<St>,
    mut target: T,
    cancel: Arc<AtomicBool>,
    config: DriverConfig,
    filters: Option<ReplayFilters>,
) -> RestoreResult<ShutdownReason>
where
    St: SegmentStore + 'static,
    T: TargetConnection + 'static,
{
    let t_last = target.read_last_source_transaction()?;
    let desired_start = t_last.map(|t| t + 1).unwrap_or(1);
    if desired_start < 2 {
        let installed = target.ensure_bookkeeping_schema()?;
        if installed {
            info!(db = %db, "installed target bookkeeping schema");
        }
    }

    let next_start_t = Arc::new(AtomicU64::new(desired_start));
    let (tx, mut rx) = mpsc::channel::<PipelineItem>(config.channel_capacity);

    let prefetcher = tokio::spawn(prefetch_loop(
        db.clone(),
        store,
        next_start_t.clone(),
        cancel.clone(),
        config.clone(),
        tx,
    ));

    let mut cache = IdCache::new(DEFAULT_CAPACITY);
    let mut carryover = CarryoverBuffer::new();
    let mut replayer = SegmentReplayer::new(&mut cache, &mut carryover);
    if let Some(f) = &filters {
        replayer = replayer.with_filters(f);
    }
    let mut backoff = config.initial_backoff;

    let reason = 'outer: loop {
        if cancel.load(Ordering::SeqCst) {
            break ShutdownReason::Cancelled;
        }
        match rx.recv().await {
            None => break ShutdownReason::ChannelClosed,
            Some(PipelineItem::CaughtUp) => {
                backoff = config.initial_backoff;
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = wait_for_cancel(&cancel) => break 'outer ShutdownReason::Cancelled,
                }
            }
            Some(PipelineItem::Error(reason)) => {
                warn!(db = %db, %reason, backoff_ms = backoff.as_millis(), "prefetch error, backing off");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = wait_for_cancel(&cancel) => break 'outer ShutdownReason::Cancelled,
                }
                backoff = (backoff * 2).min(config.max_backoff);
            }
            Some(PipelineItem::Segment(segment)) => {
                let from_t = target
                    .read_last_source_transaction()?
                    .unwrap_or(0);

                match replayer.replay_loaded_segment(&db, &target, &segment, from_t) {
                    Ok(ConsumeOutcome::RestoredSegment { up_to_t }) => {
                        backoff = config.initial_backoff;
                        let resynced = target
                            .read_last_source_transaction()?
                            .map(|t| t + 1)
                            .unwrap_or(up_to_t + 1);
                        next_start_t.store(resynced, Ordering::SeqCst);
                    }
                    Ok(ConsumeOutcome::TransactionFailed { reason, .. }) => {
                        warn!(db = %db, %reason, "transaction failed, backing off");
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = wait_for_cancel(&cancel) => break 'outer ShutdownReason::Cancelled,
                        }
                        backoff = (backoff * 2).min(config.max_backoff);
                    }
                    Ok(ConsumeOutcome::NothingNewAvailable)
                    | Ok(ConsumeOutcome::PartialSegment { .. }) => {
                        // The prefetcher already guarantees the pushed segment covers
                        // `from_t`; these states shouldn't arise here, but treat them
                        // like a transient hiccup rather than a hard stop.
                        tokio::select! {
                            _ = tokio::time::sleep(config.poll_interval) => {}
                            _ = wait_for_cancel(&cancel) => break 'outer ShutdownReason::Cancelled,
                        }
                    }
                    Err(err) => {
                        warn!(db = %db, %err, "replay error, backing off");
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = wait_for_cancel(&cancel) => break 'outer ShutdownReason::Cancelled,
                        }
                        backoff = (backoff * 2).min(config.max_backoff);
                    }
                }
                if cancel.load(Ordering::SeqCst) {
                    break 'outer ShutdownReason::Cancelled;
                }
            }
        }
    };

    cancel.store(true, Ordering::SeqCst);
    prefetcher.abort();
    info!(db = %db, ?reason, "continuous restore stopped");
    Ok(reason)
}

async fn prefetch_loop<St: SegmentStore>(
    db: String,
    store: Arc<St>,
    next_start_t: Arc<AtomicU64>,
    cancel: Arc<AtomicBool>,
    config: DriverConfig,
    tx: mpsc::Sender<PipelineItem>,
) {
    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }

        let desired = next_start_t.load(Ordering::SeqCst);
        let item = match fetch_once(&db, &store, desired) {
            Ok(Some(segment)) => {
                next_start_t.store(segment.end_t + 1, Ordering::SeqCst);
                PipelineItem::Segment(segment)
            }
            Ok(None) => PipelineItem::CaughtUp,
            Err(err) => PipelineItem::Error(err.to_string()),
        };

        let is_caught_up = matches!(item, PipelineItem::CaughtUp);
        let is_error = matches!(item, PipelineItem::Error(_));
        if tx.send(item).await.is_err() {
            return;
        }
        if is_caught_up || is_error {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = wait_for_cancel(&cancel) => return,
            }
        }
    }
}

fn fetch_once<St: SegmentStore>(
    db: &str,
    store: &St,
    desired_start: u64,
) -> RestoreResult<Option<Segment>> {
    let last = store.last(db)?;
    if !last.is_some_and(|r| r.end_t >= desired_start) {
        return Ok(None);
    }
    let ranges = store.list(db)?;
    let Some(enclosing) = find_enclosing(&ranges, desired_start) else {
        return Ok(None);
    };
    Ok(Some(store.load_range(db, enclosing.start_t, enclosing.end_t)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlog_common::datom::{Datom, TxEntry};
    use tlog_common::eid::Eid;
    use tlog_common::testing::FakeTargetConnection;
    use tlog_common::value::{Keyword, Value};
    use tlog_store::memory::MemoryStore;

    fn segment_with_one_tx(t: u64) -> Segment {
        let mut id_to_attr = std::collections::HashMap::new();
        id_to_attr.insert(Eid(900), Keyword::new("db", "txInstant"));
        Segment {
            start_t: t,
            end_t: t,
            refs: Default::default(),
            id_to_attr,
            transactions: vec![TxEntry {
                t,
                tx_eid: Eid(1000 + t as i64),
                data: vec![Datom {
                    e: Eid(1000 + t as i64),
                    a: Eid(900),
                    v: Value::Instant(tlog_replay::engine::EPOCH_2000_MS + t as i64),
                    tx: Eid(1000 + t as i64),
                    added: true,
                }],
            }],
        }
    }

    #[tokio::test]
    async fn stops_promptly_on_cancellation() {
        let store = Arc::new(MemoryStore::new());
        let target = FakeTargetConnection::new();
        let cancel = Arc::new(AtomicBool::new(false));

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.store(true, Ordering::SeqCst);
        });

        let config = DriverConfig {
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let reason = run_continuous("db".into(), store, target, cancel, config, None)
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::Cancelled);
    }

    #[tokio::test]
    async fn restores_a_segment_that_lands_mid_run() {
        let store = Arc::new(MemoryStore::new());
        store.save("db", &segment_with_one_tx(1)).unwrap();
        let target = FakeTargetConnection::new();
        let cancel = Arc::new(AtomicBool::new(false));

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            cancel_clone.store(true, Ordering::SeqCst);
        });

        let config = DriverConfig {
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        let reason = run_continuous("db".into(), store, target, cancel, config, None)
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::Cancelled);
    }
}
