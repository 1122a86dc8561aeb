//! The per-transaction replay engine (§4.4): translates one source
//! [`TxEntry`] into a target op list, submits it, and folds the result back
//! into the ID-resolution cache.

use crate::carryover::CarryoverBuffer;
use crate::error::{ReplayError, ReplayResult};
use crate::filters::ReplayFilters;
use std::collections::{HashMap, HashSet};
use tlog_cache::cache::IdCache;
use tlog_common::collaborators::{
    Cardinality, EntityRef, Op, OpValue, TargetConnection, TxReport,
};
use tlog_common::datom::{Datom, TxEntry};
use tlog_common::eid::{Eid, TargetEid};
use tlog_common::value::{Keyword, Value};
use tracing::{debug, info, instrument, warn};

/// 2000-01-01T00:00:00Z in epoch milliseconds: the cutoff below which a
/// transaction's own instant is treated as absent/pre-epoch noise.
pub const EPOCH_2000_MS: i64 = 946_684_800_000;

/// One day in milliseconds, folded into the synthetic instant assigned to
/// empty transactions so it never collides with a genuine `tx_instant`.
const ONE_DAY_MS: i64 = 86_400_000;

fn original_id_ident() -> Keyword {
    Keyword::new("", "original_id")
}

fn last_source_transaction_ident() -> Keyword {
    Keyword::new("", "last_source_transaction")
}

fn tx_instant_ident() -> Keyword {
    Keyword::new("db", "txInstant")
}

fn install_attribute_ident() -> Keyword {
    Keyword::new("db.install", "attribute")
}

/// Everything the engine needs about the source schema and the target's
/// attribute metadata that doesn't change within a segment: which source
/// EIDs are base-schema attribute idents, which are ref-typed, and the
/// target's current attribute cardinalities. Refreshed by the caller (the
/// consumer) at segment entry and whenever a schema-install op commits
/// (§4.5 step 6).
#[derive(Clone, Default)]
pub struct SchemaSnapshot {
    pub id_to_attr: HashMap<Eid, Keyword>,
    pub refs: HashSet<Eid>,
    pub target_cardinalities: HashMap<TargetEid, Cardinality>,
}

/// Outcome of successfully replaying one transaction.
pub struct ReplayOutcome {
    pub applied_t: u64,
    pub report: TxReport,
}

/// An op not yet finalized: carries the attribute's keyword (when known)
/// alongside its `Op` representation so filtering/pruning/de-noop can work
/// against stable attribute names instead of re-deriving them.
#[derive(Clone)]
struct PendingOp {
    e: EntityRef,
    a: EntityRef,
    a_ident: Option<Keyword>,
    v: OpValue,
    is_retract: bool,
}

impl PendingOp {
    fn into_op(self) -> Op {
        if self.is_retract {
            Op::Retract {
                e: self.e,
                a: self.a,
                v: self.v,
            }
        } else {
            Op::Add {
                e: self.e,
                a: self.a,
                v: self.v,
            }
        }
    }
}

/// Drives one source transaction through to the target. Owns nothing long
/// lived itself; the cache and carryover buffer are passed in so the caller
/// controls their lifetime (per-database, shared across segments).
pub struct ReplayEngine<'a> {
    pub cache: &'a mut IdCache,
    pub carryover: &'a mut CarryoverBuffer,
    pub filters: Option<&'a ReplayFilters>,
}

impl<'a> ReplayEngine<'a> {
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

    fn is_blacklisted(&self, attr: &Keyword) -> bool {
        self.filters.is_some_and(|f| f.is_blacklisted(attr))
    }

    fn rewrite(&self, attr: &Keyword, value: Value) -> Value {
        match self.filters {
            Some(f) => f.rewrite(attr, value),
            None => value,
        }
    }

    /// Resolve a source entity id to a target reference: by stable keyword
    /// if it names a base-schema attribute, else via the cache, falling
    /// back to a deterministic tempid string (the source EID itself) for
    /// anything not yet mapped.
    fn resolve_entity(
        &mut self,
        schema: &SchemaSnapshot,
        target: &dyn TargetConnection,
        e: Eid,
    ) -> ReplayResult<EntityRef> {
        if let Some(ident) = schema.id_to_attr.get(&e) {
            return Ok(EntityRef::Ident(ident.clone()));
        }
        if let Some(mapped) = self.cache.lookup(e) {
            return Ok(EntityRef::Resolved(mapped));
        }
        if self.cache.is_new(e) {
            self.cache.verify_new(e, target)?;
        }
        Ok(EntityRef::tempid_for(e))
    }

    fn value_is_ref(&self, schema: &SchemaSnapshot, a: Eid, v: &Value, tx_eid: Eid) -> bool {
        if v.as_integer() == Some(tx_eid.0) {
            return true;
        }
        let is_base_schema_attr = schema
            .id_to_attr
            .get(&a)
            .is_some_and(|ident| ident.is_base_schema());
        if is_base_schema_attr && v.as_integer().is_some() {
            return true;
        }
        schema.refs.contains(&a)
    }

    /// Build the local `keyword -> source entity` forward-reference map
    /// from datoms asserting `db/ident` this transaction (§4.4 step 3's
    /// "intra-transaction ident forward references").
    fn ident_forward_refs(datoms: &[Datom], schema: &SchemaSnapshot) -> HashMap<Keyword, Eid> {
        let ident_attr = Keyword::new("db", "ident");
        let mut map = HashMap::new();
        for d in datoms {
            if !d.added {
                continue;
            }
            let Some(attr_ident) = schema.id_to_attr.get(&d.a) else {
                continue;
            };
            if *attr_ident != ident_attr {
                continue;
            }
            if let Value::Keyword(k) = &d.v {
                map.insert(k.clone(), d.e);
            }
        }
        map
    }

    fn substitute_tuple_forward_refs(v: &Value, forward_refs: &HashMap<Keyword, Eid>) -> Value {
        match v {
            Value::Tuple(items) => Value::Tuple(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Keyword(k) => forward_refs
                            .get(k)
                            .map(|e| Value::Integer(e.0))
                            .unwrap_or_else(|| item.clone()),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Replay a single transaction. `prev_t` is the cursor value the
    /// advance-CAS expects to find on the target (`0` for the first
    /// transaction ever applied to this database).
    #[instrument(skip(self, target, tx, schema), fields(t = tx.t))]
    pub fn replay(
        &mut self,
        db: &str,
        target: &dyn TargetConnection,
        schema: &SchemaSnapshot,
        tx: &TxEntry,
        prev_t: u64,
    ) -> ReplayResult<ReplayOutcome> {
        let is_empty = match tx.tx_instant() {
            Some(instant) if instant >= EPOCH_2000_MS => false,
            _ => true,
        };

        let ops = if is_empty {
            self.build_empty_transaction_ops(prev_t, tx.t)
        } else {
            self.build_normal_transaction_ops(db, target, schema, tx, prev_t)?
        };

        if ops.is_empty() {
            return Err(ReplayError::Structural(format!(
                "transaction t={} produced an empty op list after filtering",
                tx.t
            )));
        }

        let report = target
            .transact(ops)
            .map_err(|e| ReplayError::TransactionFailed(e.to_string()))?;

        for (tempid, new_eid) in &report.tempids {
            if let Ok(source) = tempid.parse::<i64>() {
                self.cache.store(Eid(source), *new_eid);
            }
        }

        info!(t = tx.t, entities = report.tempids.len(), "transaction replayed");
        Ok(ReplayOutcome {
            applied_t: tx.t,
            report,
        })
    }

    fn build_empty_transaction_ops(&self, prev_t: u64, t: u64) -> Vec<Op> {
        let synthetic_instant = ONE_DAY_MS + t as i64;
        vec![
            Op::Cas {
                e: EntityRef::Ident(last_source_transaction_ident()),
                a: EntityRef::Ident(last_source_transaction_ident()),
                old: OpValue::Value(Value::Integer(prev_t as i64)),
                new: OpValue::Value(Value::Integer(t as i64)),
            },
            Op::Add {
                e: EntityRef::TxEntity,
                a: EntityRef::Ident(tx_instant_ident()),
                v: OpValue::Value(Value::Instant(synthetic_instant)),
            },
        ]
    }

    fn build_normal_transaction_ops(
        &mut self,
        db: &str,
        target: &dyn TargetConnection,
        schema: &SchemaSnapshot,
        tx: &TxEntry,
        prev_t: u64,
    ) -> ReplayResult<Vec<Op>> {
        let next_tx_eid = Eid(tx.tx_eid.0 + 1);
        let data = self
            .carryover
            .apply_pending(db, tx.data.clone());
        let data = self
            .carryover
            .partition(db, data, &schema.id_to_attr, next_tx_eid)
            .map_err(ReplayError::Invariant)?;

        // Step 1: advance CAS, built directly as the final `Op::Cas` (no
        // pruning/de-noop step applies to it).
        let advance_cas = Op::Cas {
            e: EntityRef::Ident(last_source_transaction_ident()),
            a: EntityRef::Ident(last_source_transaction_ident()),
            old: OpValue::Value(Value::Integer(prev_t as i64)),
            new: OpValue::Value(Value::Integer(tx.t as i64)),
        };

        let mut ops: Vec<PendingOp> = Vec::new();

        // Step 2: bookkeeping asserts for every unique entity, plus the tx entity.
        let mut seen_entities = HashSet::new();
        for d in &data {
            if d.e == tx.tx_eid || !seen_entities.insert(d.e) {
                continue;
            }
            let resolved = self.resolve_entity(schema, target, d.e)?;
            if let EntityRef::Tempid(_) = &resolved {
                ops.push(PendingOp {
                    e: resolved.clone(),
                    a: EntityRef::Ident(original_id_ident()),
                    a_ident: Some(original_id_ident()),
                    v: OpValue::Value(Value::Integer(d.e.0)),
                    is_retract: false,
                });
            }
        }
        ops.push(PendingOp {
            e: EntityRef::TxEntity,
            a: EntityRef::Ident(original_id_ident()),
            a_ident: Some(original_id_ident()),
            v: OpValue::Value(Value::Integer(tx.tx_eid.0)),
            is_retract: false,
        });

        // Step 3: data ops.
        let forward_refs = Self::ident_forward_refs(&data, schema);
        for d in &data {
            let e_ref = if d.e == tx.tx_eid {
                EntityRef::TxEntity
            } else {
                self.resolve_entity(schema, target, d.e)?
            };

            let a_ident = schema.id_to_attr.get(&d.a).cloned();
            let a_ref = match &a_ident {
                Some(ident) => EntityRef::Ident(ident.clone()),
                None => self.resolve_entity(schema, target, d.a)?,
            };

            let substituted = Self::substitute_tuple_forward_refs(&d.v, &forward_refs);
            let is_install_attribute = a_ident.as_ref() == Some(&install_attribute_ident());

            let v_op = if is_install_attribute {
                OpValue::Value(Value::Str(
                    substituted.as_integer().map(|i| i.to_string()).unwrap_or_default(),
                ))
            } else if self.value_is_ref(schema, d.a, &substituted, tx.tx_eid) {
                let ref_eid = substituted
                    .as_integer()
                    .map(Eid)
                    .ok_or_else(|| {
                        ReplayError::Structural(format!(
                            "attribute {:?} classified as ref but value is not integral",
                            a_ident
                        ))
                    })?;
                let resolved_ref = if ref_eid == tx.tx_eid {
                    EntityRef::TxEntity
                } else {
                    self.resolve_entity(schema, target, ref_eid)?
                };
                OpValue::Ref(resolved_ref)
            } else {
                OpValue::Value(substituted)
            };

            ops.push(PendingOp {
                e: e_ref,
                a: a_ref,
                a_ident,
                v: v_op,
                is_retract: !d.added,
            });
        }

        // Step 4: pruning.
        let entities_in_tx: HashSet<String> = data
            .iter()
            .filter_map(|d| match self.cache.lookup(d.e) {
                Some(_) => None,
                None => Some(d.e.0.to_string()),
            })
            .collect();

        let mut pruned = Vec::with_capacity(ops.len());
        for op in ops {
            if let Some(ident) = &op.a_ident {
                if let EntityRef::Resolved(target_eid) = &op.a {
                    if target
                        .is_composite_tuple_def(*target_eid)
                        .unwrap_or(false)
                    {
                        debug!(attr = %ident, "dropping composite-tuple-derived op");
                        continue;
                    }
                }
            }
            if let OpValue::Ref(EntityRef::Tempid(t)) = &op.v {
                if !entities_in_tx.contains(t) {
                    debug!(tempid = %t, "dropping dangling tempid reference");
                    continue;
                }
            }
            pruned.push(op);
        }

        // Step 5: sort adds before retracts, then de-noop and filter.
        pruned.sort_by_key(|op| op.is_retract);

        let mut asserted: HashSet<(String, String)> = HashSet::new();
        let mut finalized = Vec::with_capacity(pruned.len());
        for op in pruned {
            let Some(ident) = op.a_ident.clone() else {
                finalized.push(op);
                continue;
            };
            if self.is_blacklisted(&ident) {
                continue;
            }

            let entity_key = entity_ref_key(&op.e);
            let pair = (entity_key, ident.as_str());
            let cardinality = match &op.a {
                EntityRef::Resolved(eid) => schema
                    .target_cardinalities
                    .get(eid)
                    .copied()
                    .unwrap_or(Cardinality::One),
                _ => Cardinality::One,
            };

            if op.is_retract && cardinality == Cardinality::One && asserted.contains(&pair) {
                debug!(attr = %ident, "dropping cardinality-one retract that collides with an add this transaction");
                continue;
            }
            if !op.is_retract {
                asserted.insert(pair);
            }

            let op = if !op.is_retract {
                let mut op = op;
                if let OpValue::Value(v) = op.v {
                    op.v = OpValue::Value(self.rewrite(&ident, v));
                }
                op
            } else {
                op
            };

            finalized.push(op);
        }

        let mut result = Vec::with_capacity(finalized.len() + 1);
        result.push(advance_cas);
        result.extend(finalized.into_iter().map(PendingOp::into_op));

        if result.len() <= 1 {
            warn!(t = tx.t, "transaction reduced to only the advance CAS after filtering");
        }

        Ok(result)
    }
}

fn entity_ref_key(e: &EntityRef) -> String {
    match e {
        EntityRef::Resolved(eid) => format!("r{}", eid.0),
        EntityRef::Tempid(t) => format!("t{t}"),
        EntityRef::TxEntity => "tx".to_string(),
        EntityRef::Ident(k) => format!("i{}", k.as_str()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tlog_common::testing::FakeTargetConnection;

    fn schema_with_person_name(target: &FakeTargetConnection) -> SchemaSnapshot {
        target.register_attribute("person/name", Cardinality::One, false);
        SchemaSnapshot::default()
    }

    #[test]
    fn empty_transaction_emits_cas_and_synthetic_instant() {
        let mut cache = IdCache::new(16);
        let mut carryover = CarryoverBuffer::new();
        let mut engine = ReplayEngine::new(&mut cache, &mut carryover);
        let ops = engine.build_empty_transaction_ops(5, 6);
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], Op::Cas { .. }));
    }

    #[test]
    fn normal_transaction_assigns_tempid_and_stamps_original_id() {
        let mut target = FakeTargetConnection::new();
        target.ensure_bookkeeping_schema().unwrap();
        let schema = schema_with_person_name(&target);

        let mut cache = IdCache::new(16);
        let mut carryover = CarryoverBuffer::new();
        let mut engine = ReplayEngine::new(&mut cache, &mut carryover);

        let tx = TxEntry {
            t: 1,
            tx_eid: Eid(1000),
            data: vec![
                Datom {
                    e: Eid(1000),
                    a: Eid(900),
                    v: Value::Instant(EPOCH_2000_MS + 1),
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
        };

        let mut id_to_attr = HashMap::new();
        id_to_attr.insert(Eid(900), Keyword::new("db", "txInstant"));
        id_to_attr.insert(Eid(901), Keyword::new("person", "name"));
        let schema = SchemaSnapshot {
            id_to_attr,
            refs: schema.refs,
            target_cardinalities: HashMap::new(),
        };

        let outcome = engine.replay("db", &target, &schema, &tx, 0).unwrap();
        assert_eq!(outcome.applied_t, 1);
        assert_eq!(outcome.report.tempids.len(), 1);

        let new_eid = *outcome.report.tempids.get("5000").unwrap();
        assert_eq!(target.original_id_of(new_eid), Some(Eid(5000)));
        assert_eq!(cache.lookup(Eid(5000)), Some(new_eid));
    }

    #[test]
    fn blacklisted_attribute_is_dropped() {
        let mut target = FakeTargetConnection::new();
        target.ensure_bookkeeping_schema().unwrap();
        target.register_attribute("person/ssn", Cardinality::One, false);

        let mut id_to_attr = HashMap::new();
        id_to_attr.insert(Eid(901), Keyword::new("person", "ssn"));
        let schema = SchemaSnapshot {
            id_to_attr,
            refs: HashSet::new(),
            target_cardinalities: HashMap::new(),
        };

        let tx = TxEntry {
            t: 1,
            tx_eid: Eid(1000),
            data: vec![Datom {
                e: Eid(5000),
                a: Eid(901),
                v: Value::Str("000-00-0000".into()),
                tx: Eid(1000),
                added: true,
            }],
        };

        let filters = ReplayFilters::new().with_blacklist([Keyword::new("person", "ssn")]);
        let mut cache = IdCache::new(16);
        let mut carryover = CarryoverBuffer::new();
        let mut engine = ReplayEngine::new(&mut cache, &mut carryover).with_filters(&filters);

        let outcome = engine.replay("db", &target, &schema, &tx, 0).unwrap();
        // Only the advance CAS and the tx-entity/original_id bookkeeping
        // assert should remain; the ssn datom itself is dropped.
        assert!(outcome.report.tempids.is_empty() || outcome.report.tempids.len() <= 1);
    }
}
