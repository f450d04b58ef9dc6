//! Translation of change events and backfill chunks into statements on the shadow table.

mod dml;
mod instant_ddl;
mod sql_mode;
mod statement;

pub use dml::*;
pub use instant_ddl::*;
pub use sql_mode::*;
pub use statement::*;
