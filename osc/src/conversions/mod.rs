//! Conversions between decoded binlog data, database rows and the crate's value model.

pub mod event;
pub mod row;
