//! The typed value union carried by datoms.

use serde::{Deserialize, Serialize};

/// A namespaced keyword identifier, e.g. `person/name` as `(person, name)`.
///
/// Keywords flow through replay unchanged unless they are the value of a
/// reference attribute, in which case they name an entity and must be
/// resolved like any other ref value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Keyword {
    pub namespace: String,
    pub name: String,
}

impl Keyword {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `true` for idents in the database's own base-schema namespace
    /// (`db`, `db.install`, `db.type`, ...), used by the replay engine to
    /// decide whether an integral value of such an attribute is secretly an
    /// entity reference.
    pub fn is_base_schema(&self) -> bool {
        self.namespace == "db" || self.namespace.starts_with("db.")
    }

    /// Idents without a namespace (the bookkeeping attributes `original_id`
    /// and `last_source_transaction` are conventionally namespace-less)
    /// render as just their name.
    pub fn as_str(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

impl std::fmt::Display for Keyword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A datom value, tagged by the variants the source's transaction log can
/// actually produce. `Integer` doubles as the carrier for entity references
/// (see §9 of the design notes) — callers that hold attribute metadata
/// decide whether to reinterpret it as an [`crate::eid::Eid`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Integer(i64),
    Str(String),
    Bool(bool),
    /// Epoch milliseconds.
    Instant(i64),
    /// 128-bit UUID.
    Uuid(u128),
    Keyword(Keyword),
    Decimal(f64),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&Keyword> {
        match self {
            Value::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn as_instant(&self) -> Option<i64> {
        match self {
            Value::Instant(ms) => Some(*ms),
            _ => None,
        }
    }

    pub fn as_tuple(&self) -> Option<&[Value]> {
        match self {
            Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// The UUID variant as a proper [`uuid::Uuid`], for callers that need
    /// its canonical hyphenated string form rather than the raw `u128`.
    pub fn as_uuid(&self) -> Option<uuid::Uuid> {
        match self {
            Value::Uuid(bits) => Some(uuid::Uuid::from_u128(*bits)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_schema_detection() {
        assert!(Keyword::new("db", "ident").is_base_schema());
        assert!(Keyword::new("db.install", "attribute").is_base_schema());
        assert!(!Keyword::new("person", "name").is_base_schema());
    }

    #[test]
    fn keyword_display() {
        assert_eq!(Keyword::new("person", "name").as_str(), "person/name");
    }

    #[test]
    fn uuid_value_round_trips_through_the_canonical_form() {
        let id = uuid::Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let value = Value::Uuid(id.as_u128());
        assert_eq!(value.as_uuid(), Some(id));
    }
}
