//! Cross-transaction carryover for composite-tuple attribute installations
//! (§4.4 "Cross-transaction carryover"): the schema datoms that define a
//! tuple attribute stay in the installing transaction, but any *other*
//! entity's reference to that not-yet-installed attribute is deferred out
//! of it and reinjected at the head of the next one.

use std::collections::HashMap;
use tlog_common::datom::Datom;
use tlog_common::eid::Eid;
use tlog_common::value::{Keyword, Value};

fn tuple_value_type_ident() -> Keyword {
    Keyword::new("db.type", "tuple")
}

fn value_type_ident() -> Keyword {
    Keyword::new("db", "valueType")
}

/// Per-source-database deferred-datom storage. Single-writer (the replay
/// engine), so a plain owned map suffices — callers that need it shared
/// across async tasks wrap it in their own mutex.
#[derive(Default)]
pub struct CarryoverBuffer {
    pending: HashMap<String, Vec<Datom>>,
}

impl CarryoverBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` if `db` has a deferred payload waiting for the next transaction.
    pub fn has_pending(&self, db: &str) -> bool {
        self.pending.get(db).is_some_and(|v| !v.is_empty())
    }

    /// Remove and return any payload deferred for `db`.
    pub fn take(&mut self, db: &str) -> Vec<Datom> {
        self.pending.remove(db).unwrap_or_default()
    }

    fn set(&mut self, db: &str, datoms: Vec<Datom>) {
        if datoms.is_empty() {
            self.pending.remove(db);
        } else {
            self.pending.insert(db.to_string(), datoms);
        }
    }

    /// Entities whose `db/valueType` is `db.type/tuple`, asserted in this
    /// transaction's datoms.
    fn tuple_definition_entities(datoms: &[Datom], id_to_attr: &HashMap<Eid, Keyword>) -> Vec<Eid> {
        let value_type = value_type_ident();
        datoms
            .iter()
            .filter(|d| d.added)
            .filter(|d| id_to_attr.get(&d.a).is_some_and(|a| *a == value_type))
            .filter(|d| matches!(&d.v, Value::Keyword(k) if *k == tuple_value_type_ident()))
            .map(|d| d.e)
            .collect()
    }

    /// Partition `datoms` into `(data_to_keep, data_for_next)` per §4.4.
    /// `tx_eid` is rewritten to `next_tx_eid` on every deferred datom.
    /// Returns an error message if `db` already has a pending payload,
    /// since nested/overlapping installations are explicitly unspecified
    /// (§9 "open questions") and must surface as a hard failure rather than
    /// silently overwrite or merge.
    pub fn partition(
        &mut self,
        db: &str,
        datoms: Vec<Datom>,
        id_to_attr: &HashMap<Eid, Keyword>,
        next_tx_eid: Eid,
    ) -> Result<Vec<Datom>, String> {
        let tuple_entities = Self::tuple_definition_entities(&datoms, id_to_attr);
        if tuple_entities.is_empty() {
            return Ok(datoms);
        }
        if self.has_pending(db) {
            return Err(format!(
                "db '{db}' already has a carryover payload pending; nested composite-tuple installs are not supported"
            ));
        }

        // The tuple-definition entity's own schema datoms (e == the new
        // attribute) stay in this transaction; only *other* entities'
        // references to the not-yet-installed attribute get deferred.
        let mentions_tuple_entity = |d: &Datom| {
            if tuple_entities.contains(&d.e) {
                return false;
            }
            tuple_entities.contains(&d.a)
                || matches!(&d.v, Value::Integer(v) if tuple_entities.contains(&Eid(*v)))
        };

        let mut keep = Vec::with_capacity(datoms.len());
        let mut deferred = Vec::new();
        for d in datoms {
            if mentions_tuple_entity(&d) {
                let mut d = d;
                d.tx = next_tx_eid;
                deferred.push(d);
            } else {
                keep.push(d);
            }
        }

        self.set(db, deferred);
        Ok(keep)
    }

    /// Prepend any payload deferred for `db` onto `datoms` for the next
    /// transaction, consuming it.
    pub fn apply_pending(&mut self, db: &str, mut datoms: Vec<Datom>) -> Vec<Datom> {
        let mut pending = self.take(db);
        if pending.is_empty() {
            return datoms;
        }
        pending.append(&mut datoms);
        pending
    }
}
