//! Filesystem segment store: one file per segment, a regex-filtered
//! directory scan for `list`, and a sidecar file caching the newest range.

use crate::codec;
use crate::error::{StoreError, StoreResult};
use crate::store::SegmentStore;
use parking_lot::Mutex;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tlog_common::segment::{Segment, SegmentRange};
use tracing::{debug, warn};

fn segment_filename(db: &str, start_t: u64, end_t: u64) -> String {
    format!("{db}.{start_t}-{end_t}.seg")
}

fn last_sidecar_path(directory: &Path, db: &str) -> PathBuf {
    directory.join(format!("{db}.last"))
}

fn filename_pattern(db: &str) -> StoreResult<Regex> {
    Regex::new(&format!(
        r"^{}\.(\d+)-(\d+)\.seg$",
        regex::escape(db)
    ))
    .map_err(|e| StoreError::Configuration(e.to_string()))
}

/// A segment store backed by one file per segment under `directory`.
pub struct FilesystemStore {
    directory: PathBuf,
    /// Cached `(start_t, end_t)` of the newest segment per db, refreshed on
    /// every `save`; avoids a directory scan for the common "what's the
    /// tip?" query (mirrors the object-store backend's sidecar key, kept
    /// in-process here since the sidecar file is also written).
    last_hint: Mutex<std::collections::HashMap<String, SegmentRange>>,
}

impl FilesystemStore {
    pub fn new(directory: impl Into<PathBuf>) -> StoreResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            last_hint: Mutex::new(std::collections::HashMap::new()),
        })
    }

    fn segment_path(&self, db: &str, start_t: u64, end_t: u64) -> PathBuf {
        self.directory.join(segment_filename(db, start_t, end_t))
    }
}

impl SegmentStore for FilesystemStore {
    fn save(&self, db: &str, segment: &Segment) -> StoreResult<()> {
        let path = self.segment_path(db, segment.start_t, segment.end_t);
        let encoded = codec::encode(segment)?;

        // Write-then-rename for atomic publish: a reader never observes a
        // partially-written segment file.
        let tmp_path = path.with_extension("seg.tmp");
        fs::write(&tmp_path, &encoded)?;
        fs::rename(&tmp_path, &path)?;

        let range = segment.range();
        fs::write(
            last_sidecar_path(&self.directory, db),
            format!("{}:{}", range.start_t, range.end_t),
        )?;
        self.last_hint.lock().insert(db.to_string(), range);
        debug!(db, start_t = segment.start_t, end_t = segment.end_t, "saved segment");
        Ok(())
    }

    fn list(&self, db: &str) -> StoreResult<Vec<SegmentRange>> {
        let pattern = filename_pattern(db)?;
        let mut ranges = Vec::new();

        let entries = match fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ranges),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let Some(caps) = pattern.captures(&name) else {
                continue;
            };
            let start_t: u64 = caps[1].parse().map_err(|_| StoreError::BadFilename {
                name: name.clone(),
            })?;
            let end_t: u64 = caps[2].parse().map_err(|_| StoreError::BadFilename {
                name: name.clone(),
            })?;
            ranges.push(SegmentRange { start_t, end_t });
        }

        ranges.sort_by_key(|r| r.start_t);

        let mut prev_end: Option<u64> = None;
        for r in &ranges {
            if let Some(prev_end) = prev_end {
                if r.start_t <= prev_end {
                    warn!(db, start_t = r.start_t, prev_end, "overlapping segments detected");
                }
            }
            prev_end = Some(r.end_t);
        }

        Ok(ranges)
    }

    fn last(&self, db: &str) -> StoreResult<Option<SegmentRange>> {
        if let Some(range) = self.last_hint.lock().get(db).copied() {
            return Ok(Some(range));
        }
        let sidecar = last_sidecar_path(&self.directory, db);
        if let Ok(contents) = fs::read_to_string(&sidecar) {
            if let Some((start, end)) = contents.split_once(':') {
                if let (Ok(start_t), Ok(end_t)) = (start.parse(), end.parse()) {
                    let range = SegmentRange { start_t, end_t };
                    self.last_hint.lock().insert(db.to_string(), range);
                    return Ok(Some(range));
                }
            }
        }
        Ok(self.list(db)?.into_iter().next_back())
    }

    fn load_from(&self, db: &str, start_t: u64) -> StoreResult<Segment> {
        if start_t == 0 {
            let ranges = self.list(db)?;
            let first = ranges.first().ok_or_else(|| StoreError::NotFound {
                db: db.to_string(),
                start_t,
            })?;
            return self.load_range(db, first.start_t, first.end_t);
        }
        let ranges = self.list(db)?;
        let range = ranges
            .iter()
            .find(|r| r.start_t == start_t)
            .ok_or_else(|| StoreError::NotFound {
                db: db.to_string(),
                start_t,
            })?;
        self.load_range(db, range.start_t, range.end_t)
    }

    fn load_range(&self, db: &str, start_t: u64, end_t: u64) -> StoreResult<Segment> {
        let path = self.segment_path(db, start_t, end_t);
        let bytes = fs::read(&path).map_err(|_| StoreError::NotFound {
            db: db.to_string(),
            start_t,
        })?;
        codec::decode(&bytes)
    }
}
