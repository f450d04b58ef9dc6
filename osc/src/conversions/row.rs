use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySql, MySqlArguments, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Row, TypeInfo};

use crate::applier::Statement;
use crate::error::MigrationResult;
use crate::types::{Cell, TableRow};

/// Builds a query from `statement` with its parameters bound in order.
pub fn bind_statement(statement: &Statement) -> Query<'_, MySql, MySqlArguments> {
    statement
        .args
        .iter()
        .fold(sqlx::query(&statement.query), bind_cell)
}

fn bind_cell<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    cell: &Cell,
) -> Query<'q, MySql, MySqlArguments> {
    match cell {
        Cell::Null => query.bind(None::<String>),
        Cell::Bool(value) => query.bind(*value),
        Cell::I64(value) => query.bind(*value),
        Cell::U64(value) => query.bind(*value),
        Cell::F64(value) => query.bind(*value),
        Cell::Decimal(value) => query.bind(value.clone()),
        Cell::String(value) => query.bind(value.clone()),
        Cell::Bytes(value) => query.bind(value.clone()),
        Cell::Date(value) => query.bind(*value),
        Cell::Time(value) => query.bind(*value),
        Cell::DateTime(value) => query.bind(*value),
        Cell::Timestamp(value) => query.bind(*value),
    }
}

/// Decodes every column of `row` into a [`TableRow`], in select order.
pub fn decode_row(row: &MySqlRow) -> MigrationResult<TableRow> {
    let values = row
        .columns()
        .iter()
        .map(|column| decode_cell(row, column.ordinal(), column.type_info().name()))
        .collect::<MigrationResult<Vec<_>>>()?;

    Ok(TableRow::new(values))
}

fn decode_cell(row: &MySqlRow, index: usize, type_name: &str) -> MigrationResult<Cell> {
    let cell = match type_name {
        name if name.ends_with("UNSIGNED") => row.try_get::<Option<u64>, _>(index)?.map(Cell::U64),
        "BOOLEAN" => row.try_get::<Option<bool>, _>(index)?.map(Cell::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            row.try_get::<Option<i64>, _>(index)?.map(Cell::I64)
        }
        "YEAR" => row
            .try_get::<Option<u16>, _>(index)?
            .map(|year| Cell::U64(year as u64)),
        "FLOAT" => row
            .try_get::<Option<f32>, _>(index)?
            .map(|value| Cell::F64(value as f64)),
        "DOUBLE" => row.try_get::<Option<f64>, _>(index)?.map(Cell::F64),
        "DECIMAL" => row
            .try_get::<Option<BigDecimal>, _>(index)?
            .map(Cell::Decimal),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.map(Cell::Date),
        "TIME" => row.try_get::<Option<NaiveTime>, _>(index)?.map(Cell::Time),
        "DATETIME" => row
            .try_get::<Option<NaiveDateTime>, _>(index)?
            .map(Cell::DateTime),
        "TIMESTAMP" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(Cell::Timestamp),
        "CHAR" | "VARCHAR" | "TINYTEXT" | "TEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET"
        | "JSON" => row.try_get::<Option<String>, _>(index)?.map(Cell::String),
        _ => row.try_get::<Option<Vec<u8>>, _>(index)?.map(Cell::Bytes),
    };

    Ok(cell.unwrap_or(Cell::Null))
}
