use crate::migration::MigrationTables;
use crate::store::database::MemoryStore;
use crate::test_utils::schema::{shadow_schema, test_schema, test_unique_key};
use crate::types::{Cell, TableName, TableRow};

/// A row of [`test_schema`](crate::test_utils::schema::test_schema).
pub fn user_row(id: i64, name: &str, age: i64) -> TableRow {
    TableRow::new(vec![
        Cell::I64(id),
        Cell::String(name.to_string()),
        Cell::I64(age),
    ])
}

/// The tables of a migration of `database.table` with the test schema.
pub fn migration_tables(database: &str, table: &str) -> MigrationTables {
    MigrationTables {
        original: test_schema(database, table),
        shadow: shadow_schema(database, table),
        unique_key: Some(test_unique_key()),
    }
}

/// Creates the original table and its empty shadow table in `store`.
///
/// # Panics
///
/// Panics if either table already exists.
pub async fn create_tables(store: &MemoryStore, database: &str, table: &str) -> (TableName, TableName) {
    let tables = migration_tables(database, table);
    let key = test_unique_key().columns;

    store.create_table(&tables.original, &key).await.unwrap();
    store.create_table(&tables.shadow, &key).await.unwrap();

    (tables.original.name, tables.shadow.name)
}

/// Loads `count` rows with ids `1..=count` into `table`.
pub async fn load_users(store: &MemoryStore, table: &TableName, count: i64) -> Vec<TableRow> {
    let rows: Vec<_> = (1..=count)
        .map(|id| user_row(id, &format!("user {id}"), 20 + id % 50))
        .collect();
    store.load_rows(table, rows.clone()).await.unwrap();

    rows
}
