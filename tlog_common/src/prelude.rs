//! Convenient re-exports: `use tlog_common::prelude::*;`.

pub use crate::collaborators::{
    Cardinality, CollabError, CollabResult, EntityRef, Op, OpValue, SourceLog, TargetConnection,
    TxReport,
};
pub use crate::config::{ConfigError, ConnectionConfig, LogLevel, RestoreConfig, SegmentStoreConfig};
pub use crate::datom::{Datom, TxEntry};
pub use crate::eid::{Eid, TargetEid, ENTITY_INDEX_BITS};
pub use crate::segment::{find_gaps, Gap, Segment, SegmentRange};
pub use crate::value::{Keyword, Value};
