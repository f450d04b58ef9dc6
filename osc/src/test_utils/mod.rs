//! Utilities for testing migrations without a MySQL server.
//!
//! - [`schema`] builds table schemas, unique keys and migration configurations.
//! - [`table`] creates the original and the shadow table in a
//!   [`MemoryStore`](crate::store::database::MemoryStore).
//! - [`source`] simulates the application writing to the original table and the binlog
//!   stream those writes produce.
//! - [`notify`] waits for migration state changes with a timeout, so failing tests do not hang.

pub mod notify;
pub mod schema;
pub mod source;
pub mod table;
