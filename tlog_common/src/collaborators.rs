//! The external-collaborator seam: traits the replay engine, producer and
//! consumer drive against, with the concrete source/target database clients
//! left out of scope (§1). Test fakes live in [`crate::testing`].

use crate::datom::TxEntry;
use crate::eid::{Eid, TargetEid};
use crate::value::{Keyword, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// An error raised by a [`SourceLog`] or [`TargetConnection`] implementation.
/// `Transient` marks conditions worth retrying (throttling, a network
/// blip); everything else is surfaced to the caller as-is.
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("transient collaborator error: {0}")]
    Transient(String),
    #[error("collaborator error: {0}")]
    Other(String),
}

impl CollabError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CollabError::Transient(_))
    }
}

pub type CollabResult<T> = Result<T, CollabError>;

/// Cardinality of an attribute on the target, needed by replay step 5 to
/// decide whether a retract paired with an add on the same `(e,a)` is a
/// no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    One,
    Many,
}

/// Read side of the source's ordered transaction log, consumed by the
/// segment producer.
pub trait SourceLog: Send + Sync {
    /// Transactions with `t` in `[start, end)`, ordered by `t`. May return
    /// fewer than the full range implies if the log is sparse there.
    fn transactions_in(&self, start: u64, end: u64) -> CollabResult<Vec<TxEntry>>;

    /// The source EIDs that currently name reference-typed attributes.
    fn refs_snapshot(&self) -> CollabResult<HashSet<Eid>>;

    /// Source `EID -> ident` for base-schema attributes, as they stood
    /// before any user schema was installed.
    fn id_to_attr_snapshot(&self) -> CollabResult<HashMap<Eid, Keyword>>;

    /// The most recent `t` the source has logged, or `None` if the log is
    /// empty.
    fn latest_t(&self) -> CollabResult<Option<u64>>;
}

/// An entity reference inside an outgoing transaction op: either already
/// resolved to a target EID, a fresh tempid string awaiting assignment, or
/// the literal `"datomic.tx"` placeholder for the current transaction
/// entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Resolved(TargetEid),
    Tempid(String),
    TxEntity,
    /// Referenced by stable keyword name rather than an id — how base-schema
    /// attributes (`db/ident`, `db.install/attribute`, ...) and this crate's
    /// own bookkeeping attributes are always addressed, on both source and
    /// target, without ever going through the ID-resolution cache.
    Ident(Keyword),
}

impl EntityRef {
    pub fn tempid_for(source: Eid) -> Self {
        EntityRef::Tempid(source.0.to_string())
    }
}

/// The value side of an outgoing op: either a plain datom value or an
/// entity reference (itself possibly a tempid).
#[derive(Debug, Clone, PartialEq)]
pub enum OpValue {
    Value(Value),
    Ref(EntityRef),
}

/// One operation in an outgoing target transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Add {
        e: EntityRef,
        a: EntityRef,
        v: OpValue,
    },
    Retract {
        e: EntityRef,
        a: EntityRef,
        v: OpValue,
    },
    Cas {
        e: EntityRef,
        a: EntityRef,
        old: OpValue,
        new: OpValue,
    },
}

impl Op {
    /// Sort key used by replay step 5: all adds (and CAS, which must run
    /// first regardless) before all retracts.
    pub fn is_retract(&self) -> bool {
        matches!(self, Op::Retract { .. })
    }

    pub fn entity(&self) -> &EntityRef {
        match self {
            Op::Add { e, .. } | Op::Retract { e, .. } | Op::Cas { e, .. } => e,
        }
    }

    pub fn attr(&self) -> &EntityRef {
        match self {
            Op::Add { a, .. } | Op::Retract { a, .. } | Op::Cas { a, .. } => a,
        }
    }
}

/// The target's response to a successful `transact`: the concrete EIDs
/// assigned to each tempid that appeared in the op list.
#[derive(Debug, Clone, Default)]
pub struct TxReport {
    pub tempids: HashMap<String, TargetEid>,
}

/// Write side + schema introspection for the target database.
pub trait TargetConnection: Send + Sync {
    /// Submit an op list as one transaction. A large timeout is implied —
    /// callers should not add their own.
    fn transact(&self, ops: Vec<Op>) -> CollabResult<TxReport>;

    /// Probe the `original_id` reverse index for an exact source EID match,
    /// used by the cache's verification hook (§4.3).
    fn probe_original_id(&self, source_eid: Eid) -> CollabResult<Option<TargetEid>>;

    /// Install the `original_id`/`last_source_transaction` bookkeeping
    /// schema if it isn't present yet. Returns whether anything was
    /// installed.
    fn ensure_bookkeeping_schema(&mut self) -> CollabResult<bool>;

    /// The durable cursor: the highest source `t` successfully applied.
    fn read_last_source_transaction(&self) -> CollabResult<Option<u64>>;

    /// Ref-typed attributes currently known to the target, by target EID.
    fn target_refs(&self) -> CollabResult<HashSet<TargetEid>>;

    /// Cardinality of every attribute currently known to the target.
    fn attr_cardinalities(&self) -> CollabResult<HashMap<TargetEid, Cardinality>>;

    /// `true` if `attr` is a composite-tuple-definition attribute (its
    /// value is auto-derived by the target from other attributes).
    fn is_composite_tuple_def(&self, attr: TargetEid) -> CollabResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_distinguished() {
        assert!(CollabError::Transient("throttled".into()).is_transient());
        assert!(!CollabError::Other("schema missing".into()).is_transient());
    }

    #[test]
    fn op_sort_classification() {
        let add = Op::Add {
            e: EntityRef::Resolved(TargetEid(1)),
            a: EntityRef::Resolved(TargetEid(2)),
            v: OpValue::Value(Value::Bool(true)),
        };
        let retract = Op::Retract {
            e: EntityRef::Resolved(TargetEid(1)),
            a: EntityRef::Resolved(TargetEid(2)),
            v: OpValue::Value(Value::Bool(true)),
        };
        assert!(!add.is_retract());
        assert!(retract.is_retract());
    }
}
