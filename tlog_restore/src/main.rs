//! CLI entry point: drives either a continuous restore loop, a single
//! restore pass, or the bulk-backup/repair operations over a config file
//! with flag overrides layered on top.
//!
//! The source/target database clients are external collaborators (out of
//! scope per the core library's design) — this binary wires the fakes in
//! `tlog_common::testing` as a stand-in. Swapping in a real client means
//! implementing [`tlog_common::collaborators::SourceLog`] /
//! [`tlog_common::collaborators::TargetConnection`] and constructing those
//! instead of [`FakeSourceLog`]/[`FakeTargetConnection`] below.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tlog_common::config::{LogLevel, RestoreConfig, SegmentStoreConfig};
use tlog_common::segment::{Segment, SegmentRange};
use tlog_common::testing::{FakeSourceLog, FakeTargetConnection};
use tlog_common::value::Keyword;
use tlog_consumer::consumer::{ConsumeOutcome, SegmentConsumer};
use tlog_producer::backup::SegmentProducer;
use tlog_replay::carryover::CarryoverBuffer;
use tlog_replay::filters::ReplayFilters;
use tlog_restore::driver::{self, DriverConfig};
use tlog_store::error::StoreResult;
use tlog_store::filesystem::FilesystemStore;
use tlog_store::memory::MemoryStore;
use tlog_store::store::SegmentStore;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

/// The two store backends this CLI knows how to open from a config file,
/// dispatched over rather than boxed as a trait object so the generic
/// producer/consumer/driver types stay `Sized`.
enum AnyStore {
    Memory(MemoryStore),
    Filesystem(FilesystemStore),
}

impl SegmentStore for AnyStore {
    fn save(&self, db: &str, segment: &Segment) -> StoreResult<()> {
        match self {
            AnyStore::Memory(s) => s.save(db, segment),
            AnyStore::Filesystem(s) => s.save(db, segment),
        }
    }

    fn list(&self, db: &str) -> StoreResult<Vec<SegmentRange>> {
        match self {
            AnyStore::Memory(s) => s.list(db),
            AnyStore::Filesystem(s) => s.list(db),
        }
    }

    fn load_from(&self, db: &str, start_t: u64) -> StoreResult<Segment> {
        match self {
            AnyStore::Memory(s) => s.load_from(db, start_t),
            AnyStore::Filesystem(s) => s.load_from(db, start_t),
        }
    }

    fn load_range(&self, db: &str, start_t: u64, end_t: u64) -> StoreResult<Segment> {
        match self {
            AnyStore::Memory(s) => s.load_range(db, start_t, end_t),
            AnyStore::Filesystem(s) => s.load_range(db, start_t, end_t),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "tlog_restore")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Incremental transaction-log replication driver")]
struct Cli {
    /// Path to the restore/backup configuration file (TOML).
    #[arg(short, long, default_value = "/etc/tlog/restore.toml")]
    config: PathBuf,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: TopCommand,
}

#[derive(Subcommand, Debug)]
enum TopCommand {
    /// Apply source transactions into the target database.
    Restore {
        #[command(subcommand)]
        action: RestoreAction,
    },
    /// Copy source transaction-log ranges into the segment store.
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Subcommand, Debug)]
enum RestoreAction {
    /// Run until cancelled (Ctrl+C), prefetching and replaying segments
    /// as they land in the store.
    Continuous(OverrideArgs),
    /// Run a single §4.5 pass and exit.
    Once(OverrideArgs),
}

#[derive(Subcommand, Debug)]
enum BackupAction {
    /// Partition the source log into segments and back each one up.
    Bulk {
        /// Defaults to the configured segment size when omitted.
        #[arg(long)]
        txns_per_segment: Option<u64>,
        #[arg(long, default_value_t = 0)]
        starting_segment: u64,
        #[arg(long)]
        parallel: bool,
    },
    /// Fill every gap in the store's segment sequence.
    Repair,
}

/// Flag overrides layered onto the loaded [`RestoreConfig`].
#[derive(Args, Debug)]
struct OverrideArgs {
    #[arg(long)]
    segment_size: Option<u64>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    #[arg(long)]
    prefetch_buffer: Option<usize>,
    #[arg(long)]
    max_backoff_ms: Option<u64>,
    /// Comma-separated `ns/name` attribute idents to drop during replay.
    #[arg(long, value_delimiter = ',')]
    blacklist: Vec<String>,
    #[arg(long)]
    no_verify: bool,
}

fn apply_overrides(mut cfg: RestoreConfig, overrides: &OverrideArgs) -> RestoreConfig {
    if let Some(v) = overrides.segment_size {
        cfg.segment_size = v;
    }
    if let Some(v) = overrides.poll_interval_ms {
        cfg.poll_interval_ms = v;
    }
    if let Some(v) = overrides.prefetch_buffer {
        cfg.prefetch_buffer = v;
    }
    if let Some(v) = overrides.max_backoff_ms {
        cfg.max_backoff_ms = v;
    }
    if !overrides.blacklist.is_empty() {
        cfg.blacklist = overrides.blacklist.clone();
    }
    if overrides.no_verify {
        cfg.verify = false;
    }
    cfg
}

fn parse_ident(raw: &str) -> Keyword {
    match raw.split_once('/') {
        Some((ns, name)) => Keyword::new(ns, name),
        None => Keyword::new("", raw),
    }
}

fn build_filters(cfg: &RestoreConfig) -> ReplayFilters {
    ReplayFilters::new().with_blacklist(cfg.blacklist.iter().map(|s| parse_ident(s)))
}

fn open_store(cfg: &SegmentStoreConfig) -> Result<Arc<AnyStore>, Box<dyn std::error::Error>> {
    match cfg {
        SegmentStoreConfig::Memory => Ok(Arc::new(AnyStore::Memory(MemoryStore::new()))),
        SegmentStoreConfig::Filesystem { directory } => {
            Ok(Arc::new(AnyStore::Filesystem(FilesystemStore::new(directory.clone())?)))
        }
        SegmentStoreConfig::ObjectStore { .. } => {
            Err("object-store backend requires a real client, not wired into this CLI".into())
        }
    }
}

fn setup_tracing(level: LogLevel, json: bool) {
    let level = match level {
        LogLevel::Trace => Level::TRACE,
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warn => Level::WARN,
        LogLevel::Error => Level::ERROR,
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let cfg = match tlog_common::config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(_) => {
            // No config on disk yet (first run, or a demo invocation):
            // fall back to in-memory defaults rather than refusing to start.
            RestoreConfig::default()
        }
    };
    setup_tracing(cfg.log_level, cli.json);

    if let Err(err) = run(cfg, cli.command).await {
        error!(%err, "tlog_restore exited with an error");
        std::process::exit(1);
    }
}

async fn run(cfg: RestoreConfig, command: TopCommand) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        TopCommand::Restore { action } => run_restore(cfg, action).await,
        TopCommand::Backup { action } => run_backup(cfg, action),
    }
}

async fn run_restore(cfg: RestoreConfig, action: RestoreAction) -> Result<(), Box<dyn std::error::Error>> {
    let overrides = match &action {
        RestoreAction::Continuous(o) | RestoreAction::Once(o) => o,
    };
    let cfg = apply_overrides(cfg, overrides);
    let store = open_store(&cfg.store)?;
    let filters = build_filters(&cfg);
    let target = FakeTargetConnection::new();

    match action {
        RestoreAction::Once(_) => {
            let mut cache = tlog_cache::cache::IdCache::new(tlog_cache::cache::DEFAULT_CAPACITY);
            let mut carryover = CarryoverBuffer::new();
            let mut target = target;
            let mut consumer = SegmentConsumer::new(&*store, &mut cache, &mut carryover).with_filters(&filters);
            let outcome = consumer.restore_segment(&cfg.target.db_name, &mut target)?;
            match &outcome {
                ConsumeOutcome::RestoredSegment { up_to_t } => {
                    info!(up_to_t, "restore complete");
                }
                ConsumeOutcome::NothingNewAvailable => {
                    info!("nothing new available");
                }
                ConsumeOutcome::TransactionFailed { last_good_t, reason } => {
                    error!(last_good_t, %reason, "transaction failed");
                    std::process::exit(2);
                }
                ConsumeOutcome::PartialSegment { desired_start, reached_t } => {
                    error!(desired_start, ?reached_t, "store has a gap; run backup repair");
                    std::process::exit(3);
                }
            }
            Ok(())
        }
        RestoreAction::Continuous(_) => {
            let cancel = Arc::new(AtomicBool::new(false));
            let cancel_for_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("received shutdown signal");
                    cancel_for_signal.store(true, Ordering::SeqCst);
                }
            });

            let driver_config = DriverConfig {
                poll_interval: Duration::from_millis(cfg.poll_interval_ms),
                initial_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_millis(cfg.max_backoff_ms),
                channel_capacity: cfg.prefetch_buffer,
            };

            let reason = driver::run_continuous(
                cfg.target.db_name.clone(),
                store,
                target,
                cancel,
                driver_config,
                Some(filters),
            )
            .await?;
            info!(?reason, "continuous restore stopped");
            Ok(())
        }
    }
}

fn run_backup(cfg: RestoreConfig, action: BackupAction) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store(&cfg.store)?;
    let source = FakeSourceLog::new(vec![]);
    let producer = SegmentProducer::new(&source, &*store);

    match action {
        BackupAction::Bulk { txns_per_segment, starting_segment, parallel } => {
            let txns_per_segment = txns_per_segment.unwrap_or(cfg.segment_size);
            let written = producer.backup_bulk(&cfg.source.db_name, txns_per_segment, starting_segment, parallel)?;
            info!(count = written.len(), "bulk backup complete");
        }
        BackupAction::Repair => {
            let filled = producer.repair(&cfg.source.db_name)?;
            info!(count = filled.len(), "gaps repaired");
        }
    }
    Ok(())
}
