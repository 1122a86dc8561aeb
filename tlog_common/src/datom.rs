//! Datoms and the transaction-log entries that group them.

use crate::eid::Eid;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A single fact as it appears in the source's transaction log:
/// `(e, a, v, tx, added)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datom {
    pub e: Eid,
    pub a: Eid,
    pub v: Value,
    pub tx: Eid,
    pub added: bool,
}

/// One entry in the source's ordered transaction log: the monotonic log
/// position `t` and the datoms asserted/retracted by that transaction
/// (including the transaction entity's own datoms, e.g. its `tx_instant`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxEntry {
    pub t: u64,
    pub tx_eid: Eid,
    pub data: Vec<Datom>,
}

impl TxEntry {
    /// The instant recorded on the transaction entity itself, i.e. the
    /// datom where `e == tx_eid` and the value is an [`Value::Instant`].
    pub fn tx_instant(&self) -> Option<i64> {
        self.data
            .iter()
            .find(|d| d.e == self.tx_eid && d.v.as_instant().is_some())
            .and_then(|d| d.v.as_instant())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn datom(e: i64, a: i64, v: Value, tx: i64) -> Datom {
        Datom {
            e: Eid(e),
            a: Eid(a),
            v,
            tx: Eid(tx),
            added: true,
        }
    }

    #[test]
    fn tx_instant_reads_off_the_tx_entity_datom() {
        let entry = TxEntry {
            t: 7,
            tx_eid: Eid(1000),
            data: vec![
                datom(1000, 50, Value::Instant(946_684_800_000), 1000),
                datom(2000, 64, Value::Str("Bob".into()), 1000),
            ],
        };
        assert_eq!(entry.tx_instant(), Some(946_684_800_000));
    }

    #[test]
    fn missing_tx_instant_is_none() {
        let entry = TxEntry {
            t: 7,
            tx_eid: Eid(1000),
            data: vec![datom(2000, 64, Value::Str("Bob".into()), 1000)],
        };
        assert_eq!(entry.tx_instant(), None);
    }

    #[test]
    fn a_non_instant_datom_on_the_tx_entity_does_not_shadow_its_instant() {
        let entry = TxEntry {
            t: 7,
            tx_eid: Eid(1000),
            data: vec![
                // e.g. a `tx/source` annotation on the tx entity, ordered
                // before its `tx_instant` datom.
                datom(1000, 77, Value::Str("import-job".into()), 1000),
                datom(1000, 50, Value::Instant(946_684_800_000), 1000),
            ],
        };
        assert_eq!(entry.tx_instant(), Some(946_684_800_000));
    }
}
