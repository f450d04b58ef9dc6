//! Storage abstractions.
//!
//! [`database`] is the database holding the migrated tables, [`state`] is where migration
//! progress is persisted for resumption.

pub mod database;
pub mod state;
