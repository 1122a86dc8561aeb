//! In-memory fakes for [`crate::collaborators::SourceLog`] and
//! [`crate::collaborators::TargetConnection`], shared by every crate's test
//! suite the way `evo_common::hal::driver::HalDriver` gets a fake driver in
//! the HAL test suite.

use crate::collaborators::{
    Cardinality, CollabError, CollabResult, EntityRef, Op, OpValue, SourceLog, TargetConnection,
    TxReport,
};
use crate::datom::TxEntry;
use crate::eid::{Eid, TargetEid};
use crate::value::{Keyword, Value};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};

/// A canned source transaction log plus its schema-snapshot side tables.
pub struct FakeSourceLog {
    pub entries: Vec<TxEntry>,
    pub refs: HashSet<Eid>,
    pub id_to_attr: HashMap<Eid, Keyword>,
}

impl FakeSourceLog {
    pub fn new(entries: Vec<TxEntry>) -> Self {
        Self {
            entries,
            refs: HashSet::new(),
            id_to_attr: HashMap::new(),
        }
    }

    pub fn with_refs(mut self, refs: HashSet<Eid>) -> Self {
        self.refs = refs;
        self
    }

    pub fn with_id_to_attr(mut self, map: HashMap<Eid, Keyword>) -> Self {
        self.id_to_attr = map;
        self
    }
}

impl SourceLog for FakeSourceLog {
    fn transactions_in(&self, start: u64, end: u64) -> CollabResult<Vec<TxEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.t >= start && e.t < end)
            .cloned()
            .collect())
    }

    fn refs_snapshot(&self) -> CollabResult<HashSet<Eid>> {
        Ok(self.refs.clone())
    }

    fn id_to_attr_snapshot(&self) -> CollabResult<HashMap<Eid, Keyword>> {
        Ok(self.id_to_attr.clone())
    }

    fn latest_t(&self) -> CollabResult<Option<u64>> {
        Ok(self.entries.iter().map(|e| e.t).max())
    }
}

#[derive(Debug, Clone)]
struct AttrMeta {
    cardinality: Cardinality,
    is_ref: bool,
    is_composite_tuple_def: bool,
}

struct TargetState {
    next_eid: AtomicI64,
    /// `(entity, attr-ident) -> values`. Cardinality-one attributes hold at
    /// most one value; cardinality-many hold a set.
    datoms: HashMap<(TargetEid, String), Vec<Value>>,
    /// ident name -> target eid, for attributes that have been allocated one
    /// (built-ins are pre-seeded; user attributes get one on first install).
    attr_eids: HashMap<String, TargetEid>,
    attr_meta: HashMap<String, AttrMeta>,
    original_id: HashMap<Eid, TargetEid>,
    bookkeeping_installed: bool,
    last_source_transaction: Option<u64>,
}

/// A minimal in-memory stand-in for the target database: enough datom-store
/// semantics (cardinality, CAS, original_id reverse index) to exercise the
/// replay engine end to end without a real target client.
pub struct FakeTargetConnection {
    state: Mutex<TargetState>,
}

impl Default for FakeTargetConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTargetConnection {
    pub fn new() -> Self {
        let mut attr_eids = HashMap::new();
        let mut attr_meta = HashMap::new();
        for (i, name) in [
            "db/ident",
            "db/valueType",
            "db/cardinality",
            "db.install/attribute",
        ]
        .iter()
        .enumerate()
        {
            attr_eids.insert((*name).to_string(), TargetEid(10 + i as i64));
            attr_meta.insert(
                (*name).to_string(),
                AttrMeta {
                    cardinality: Cardinality::One,
                    is_ref: name.starts_with("db.install"),
                    is_composite_tuple_def: false,
                },
            );
        }
        Self {
            state: Mutex::new(TargetState {
                next_eid: AtomicI64::new(1000),
                datoms: HashMap::new(),
                attr_eids,
                attr_meta,
                original_id: HashMap::new(),
                bookkeeping_installed: false,
                last_source_transaction: None,
            }),
        }
    }

    /// Register a user attribute ident with explicit cardinality/ref-ness,
    /// as if an earlier transaction had installed it. Returns the allocated
    /// target eid.
    pub fn register_attribute(
        &self,
        ident: &str,
        cardinality: Cardinality,
        is_ref: bool,
    ) -> TargetEid {
        let mut state = self.state.lock();
        let eid = TargetEid(state.next_eid.fetch_add(1, Ordering::SeqCst));
        state.attr_eids.insert(ident.to_string(), eid);
        state.attr_meta.insert(
            ident.to_string(),
            AttrMeta {
                cardinality,
                is_ref,
                is_composite_tuple_def: false,
            },
        );
        eid
    }

    pub fn mark_composite_tuple_def(&self, ident: &str) {
        let mut state = self.state.lock();
        if let Some(meta) = state.attr_meta.get_mut(ident) {
            meta.is_composite_tuple_def = true;
        }
    }

    /// Read back a cardinality-one scalar value for `(entity, attr)`.
    pub fn value_of(&self, entity: TargetEid, attr: &str) -> Option<Value> {
        let state = self.state.lock();
        state
            .datoms
            .get(&(entity, attr.to_string()))
            .and_then(|vs| vs.first().cloned())
    }

    pub fn original_id_of(&self, target: TargetEid) -> Option<Eid> {
        let state = self.state.lock();
        state
            .original_id
            .iter()
            .find(|(_, v)| **v == target)
            .map(|(k, _)| *k)
    }

    fn resolve_attr_ident(state: &TargetState, ident: &Keyword) -> Option<TargetEid> {
        state.attr_eids.get(&ident.as_str()).copied()
    }

    fn resolve_ref(
        state: &mut TargetState,
        tempids: &mut HashMap<String, TargetEid>,
        tx_eid: TargetEid,
        r: &EntityRef,
    ) -> Result<TargetEid, CollabError> {
        match r {
            EntityRef::Resolved(eid) => Ok(*eid),
            EntityRef::TxEntity => Ok(tx_eid),
            EntityRef::Tempid(t) => {
                if let Some(eid) = tempids.get(t) {
                    return Ok(*eid);
                }
                let eid = TargetEid(state.next_eid.fetch_add(1, Ordering::SeqCst));
                tempids.insert(t.clone(), eid);
                Ok(eid)
            }
            EntityRef::Ident(kw) => Self::resolve_attr_ident(state, kw)
                .ok_or_else(|| CollabError::Other(format!("unknown ident {kw}"))),
        }
    }

    fn resolve_value(
        state: &mut TargetState,
        tempids: &mut HashMap<String, TargetEid>,
        tx_eid: TargetEid,
        v: &OpValue,
    ) -> Result<Value, CollabError> {
        match v {
            OpValue::Value(val) => Ok(val.clone()),
            OpValue::Ref(r) => {
                let eid = Self::resolve_ref(state, tempids, tx_eid, r)?;
                Ok(Value::Integer(eid.0))
            }
        }
    }

    fn attr_key(r: &EntityRef, state: &TargetState) -> String {
        match r {
            EntityRef::Ident(kw) => kw.as_str(),
            EntityRef::Resolved(eid) => state
                .attr_eids
                .iter()
                .find(|(_, v)| **v == *eid)
                .map(|(k, _)| k.clone())
                .unwrap_or_else(|| format!("#{}", eid.0)),
            _ => "#unresolved".to_string(),
        }
    }
}

impl TargetConnection for FakeTargetConnection {
    fn transact(&self, ops: Vec<Op>) -> CollabResult<TxReport> {
        let mut state = self.state.lock();
        let tx_eid = TargetEid(state.next_eid.fetch_add(1, Ordering::SeqCst));
        let mut tempids: HashMap<String, TargetEid> = HashMap::new();

        for op in &ops {
            if let Op::Cas { e, a, old, new: _ } = op {
                let eid = Self::resolve_ref(&mut state, &mut tempids, tx_eid, e)?;
                let key = Self::attr_key(a, &state);
                let current = state
                    .datoms
                    .get(&(eid, key.clone()))
                    .and_then(|vs| vs.first().cloned());
                let expected = Self::resolve_value(&mut state, &mut tempids, tx_eid, old)?;
                if current.as_ref() != Some(&expected) {
                    return Err(CollabError::Other(format!(
                        "CAS mismatch on {key}: expected {expected:?}, found {current:?}"
                    )));
                }
            }
        }

        for op in ops {
            match op {
                Op::Cas { e, a, new, .. } => {
                    let eid = Self::resolve_ref(&mut state, &mut tempids, tx_eid, &e)?;
                    let key = Self::attr_key(&a, &state);
                    let value = Self::resolve_value(&mut state, &mut tempids, tx_eid, &new)?;
                    if key == "last_source_transaction" {
                        if let Value::Integer(t) = &value {
                            state.last_source_transaction = Some(*t as u64);
                        }
                    }
                    state.datoms.insert((eid, key), vec![value]);
                }
                Op::Add { e, a, v } => {
                    let eid = Self::resolve_ref(&mut state, &mut tempids, tx_eid, &e)?;
                    let key = Self::attr_key(&a, &state);
                    let value = Self::resolve_value(&mut state, &mut tempids, tx_eid, &v)?;
                    let cardinality = state
                        .attr_meta
                        .get(&key)
                        .map(|m| m.cardinality)
                        .unwrap_or(Cardinality::One);
                    if key == "original_id" {
                        if let Value::Integer(src) = &value {
                            state.original_id.insert(Eid(*src), eid);
                        }
                    }
                    if key == "last_source_transaction" {
                        if let Value::Integer(t) = &value {
                            state.last_source_transaction = Some(*t as u64);
                        }
                    }
                    let entry = state.datoms.entry((eid, key)).or_default();
                    match cardinality {
                        Cardinality::One => *entry = vec![value],
                        Cardinality::Many => {
                            if !entry.contains(&value) {
                                entry.push(value);
                            }
                        }
                    }
                }
                Op::Retract { e, a, v } => {
                    let eid = Self::resolve_ref(&mut state, &mut tempids, tx_eid, &e)?;
                    let key = Self::attr_key(&a, &state);
                    let value = Self::resolve_value(&mut state, &mut tempids, tx_eid, &v)?;
                    if let Some(entry) = state.datoms.get_mut(&(eid, key)) {
                        entry.retain(|existing| existing != &value);
                    }
                }
            }
        }

        Ok(TxReport { tempids })
    }

    fn probe_original_id(&self, source_eid: Eid) -> CollabResult<Option<TargetEid>> {
        Ok(self.state.lock().original_id.get(&source_eid).copied())
    }

    fn ensure_bookkeeping_schema(&mut self) -> CollabResult<bool> {
        let mut state = self.state.lock();
        if state.bookkeeping_installed {
            return Ok(false);
        }
        for (i, name) in ["original_id", "last_source_transaction"]
            .iter()
            .enumerate()
        {
            let eid = TargetEid(state.next_eid.fetch_add(1, Ordering::SeqCst));
            state.attr_eids.insert((*name).to_string(), eid);
            state.attr_meta.insert(
                (*name).to_string(),
                AttrMeta {
                    cardinality: Cardinality::One,
                    is_ref: false,
                    is_composite_tuple_def: false,
                },
            );
            let _ = i;
        }
        // The bookkeeping entity starts at cursor 0 so the very first
        // advance-CAS (`0 -> t`) has something to compare against.
        let cursor_eid = state.attr_eids["last_source_transaction"];
        state.datoms.insert(
            (cursor_eid, "last_source_transaction".to_string()),
            vec![Value::Integer(0)],
        );
        state.last_source_transaction = Some(0);
        state.bookkeeping_installed = true;
        Ok(true)
    }

    fn read_last_source_transaction(&self) -> CollabResult<Option<u64>> {
        Ok(self.state.lock().last_source_transaction)
    }

    fn target_refs(&self) -> CollabResult<HashSet<TargetEid>> {
        let state = self.state.lock();
        Ok(state
            .attr_meta
            .iter()
            .filter(|(_, m)| m.is_ref)
            .filter_map(|(name, _)| state.attr_eids.get(name).copied())
            .collect())
    }

    fn attr_cardinalities(&self) -> CollabResult<HashMap<TargetEid, Cardinality>> {
        let state = self.state.lock();
        Ok(state
            .attr_meta
            .iter()
            .filter_map(|(name, meta)| {
                state
                    .attr_eids
                    .get(name)
                    .map(|eid| (*eid, meta.cardinality))
            })
            .collect())
    }

    fn is_composite_tuple_def(&self, attr: TargetEid) -> CollabResult<bool> {
        let state = self.state.lock();
        Ok(state
            .attr_meta
            .iter()
            .any(|(name, meta)| state.attr_eids.get(name) == Some(&attr) && meta.is_composite_tuple_def))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transact_assigns_tempids_and_stamps_original_id() {
        let mut target = FakeTargetConnection::new();
        target.ensure_bookkeeping_schema().unwrap();
        target.register_attribute("person/name", Cardinality::One, false);

        let report = target
            .transact(vec![
                Op::Add {
                    e: EntityRef::tempid_for(Eid(5000)),
                    a: EntityRef::Ident(Keyword::new("", "original_id")),
                    v: OpValue::Value(Value::Integer(5000)),
                },
                Op::Add {
                    e: EntityRef::tempid_for(Eid(5000)),
                    a: EntityRef::Ident(Keyword::new("person", "name")),
                    v: OpValue::Value(Value::Str("Bob".into())),
                },
            ])
            .unwrap();

        let new_eid = *report.tempids.get("5000").unwrap();
        assert_eq!(target.original_id_of(new_eid), Some(Eid(5000)));
        assert_eq!(
            target.value_of(new_eid, "person/name"),
            Some(Value::Str("Bob".into()))
        );
    }

    #[test]
    fn cas_mismatch_is_rejected() {
        let target = FakeTargetConnection::new();
        let err = target
            .transact(vec![Op::Cas {
                e: EntityRef::Ident(Keyword::new("", "last_source_transaction")),
                a: EntityRef::Ident(Keyword::new("", "last_source_transaction")),
                old: OpValue::Value(Value::Integer(5)),
                new: OpValue::Value(Value::Integer(6)),
            }])
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
