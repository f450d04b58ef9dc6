//! MySQL domain types shared by the migration crates.
//!
//! Table and column identities, unique keys, the shared-column mapping between an original
//! table and its shadow, binlog positions and server version helpers. Live server probes
//! (binlog position, load and lag) are available behind the `sqlx` feature.

#[cfg(feature = "sqlx")]
pub mod probe;
pub mod types;
pub mod version;
