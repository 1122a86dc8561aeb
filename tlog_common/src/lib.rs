//! Shared data model, configuration, and collaborator traits for mirroring
//! a transactional, immutable-history database's transaction log into a
//! fresh target instance.
//!
//! # Module Structure
//!
//! - [`eid`] - source/target entity identifiers
//! - [`value`] - the typed value union and keyword idents
//! - [`datom`] - datoms and transaction-log entries
//! - [`segment`] - the durable segment payload and gap detection
//! - [`collaborators`] - the `SourceLog`/`TargetConnection` seam
//! - [`config`] - TOML-backed configuration for restore/backup drivers
//! - [`testing`] - in-memory fakes for the above, shared across crates
//! - [`prelude`] - common re-exports

pub mod collaborators;
pub mod config;
pub mod datom;
pub mod eid;
pub mod prelude;
pub mod segment;
pub mod testing;
pub mod value;
