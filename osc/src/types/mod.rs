mod cell;
mod event;
mod table_row;

pub use cell::*;
pub use event::*;
pub use table_row::*;

pub use osc_mysql::types::{
    BinlogPosition, ColumnList, ColumnSchema, SharedColumn, SharedColumns, TableName,
    TableSchema, UniqueKey,
};

/// Identifier of a migration, used in logs and persisted progress.
pub type MigrationId = u64;
