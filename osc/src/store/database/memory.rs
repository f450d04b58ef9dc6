use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::num::NonZeroI32;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tracing::debug;

use crate::applier::{KeyBound, Predicate, Statement, StatementKind};
use crate::bail;
use crate::error::{ErrorKind, MigrationResult};
use crate::migration_error;
use crate::store::database::MigrationStore;
use crate::types::{
    BinlogPosition, Cell, ChangeEvent, ColumnList, DeleteEvent, InsertEvent, PositionedEvent,
    TableName, TableRow, TableSchema, UpdateEvent,
};

/// Bytes the binlog grows by for every simulated transaction.
const EVENT_SIZE: u64 = 100;

/// A table kept in memory, with rows ordered by its unique key.
#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<String>,
    key_positions: Vec<usize>,
    rows: BTreeMap<Vec<Cell>, Vec<Cell>>,
}

impl MemoryTable {
    fn new(schema: &TableSchema, key: &ColumnList) -> MigrationResult<Self> {
        let columns = schema.column_names();
        let key_positions = key
            .iter()
            .map(|name| {
                schema.column_index(name).ok_or_else(|| {
                    migration_error!(
                        ErrorKind::InvalidUniqueKey,
                        "Unique key column does not exist",
                        name
                    )
                })
            })
            .collect::<MigrationResult<Vec<_>>>()?;

        Ok(Self {
            columns,
            key_positions,
            rows: BTreeMap::new(),
        })
    }

    fn position(&self, column: &str) -> MigrationResult<usize> {
        self.columns
            .iter()
            .position(|name| name.eq_ignore_ascii_case(column))
            .ok_or_else(|| migration_error!(ErrorKind::SourceSchemaError, "Unknown column", column))
    }

    fn positions<'a>(
        &self,
        columns: impl Iterator<Item = &'a str>,
    ) -> MigrationResult<Vec<usize>> {
        columns.map(|column| self.position(column)).collect()
    }

    fn key_of(&self, row: &[Cell]) -> Vec<Cell> {
        self.key_positions
            .iter()
            .map(|position| row[*position].clone())
            .collect()
    }

    fn project(row: &[Cell], positions: &[usize]) -> TableRow {
        TableRow::new(positions.iter().map(|position| row[*position].clone()).collect())
    }

    fn check_key(&self, key: &ColumnList) -> MigrationResult<Vec<usize>> {
        let positions = self.positions(key.iter())?;
        if positions != self.key_positions {
            bail!(
                ErrorKind::InvalidState,
                "Memory tables only order rows by their own unique key"
            );
        }

        Ok(positions)
    }

    /// Keys of the rows matching every predicate.
    fn matching_keys(&self, predicates: &[(usize, bool)], values: &[Cell]) -> Vec<Vec<Cell>> {
        let lookup: Option<Vec<Cell>> = self
            .key_positions
            .iter()
            .map(|key_position| {
                predicates
                    .iter()
                    .position(|(position, _)| position == key_position)
                    .map(|index| values[index].clone())
            })
            .collect();

        let candidates: Box<dyn Iterator<Item = (&Vec<Cell>, &Vec<Cell>)>> = match lookup {
            Some(key) => Box::new(self.rows.get_key_value(&key).into_iter()),
            None => Box::new(self.rows.iter()),
        };

        candidates
            .filter(|(_, row)| {
                predicates
                    .iter()
                    .zip(values)
                    .all(|((position, null_safe), value)| {
                        compare(&row[*position], value, *null_safe)
                    })
            })
            .map(|(key, _)| key.clone())
            .collect()
    }
}

/// Order of unique-key values in the chunk and key bound selects of a [`MemoryStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum KeyCollation {
    /// Values compare like [`Cell`]s.
    #[default]
    Binary,
    /// Strings compare ignoring ASCII case, like MySQL's default `_ci` collations.
    CaseInsensitive,
}

impl KeyCollation {
    fn compare(self, left: &[Cell], right: &[Cell]) -> Ordering {
        match self {
            KeyCollation::Binary => left.cmp(right),
            KeyCollation::CaseInsensitive => left
                .iter()
                .zip(right)
                .map(|pair| match pair {
                    (Cell::String(l), Cell::String(r)) => {
                        l.to_ascii_lowercase().cmp(&r.to_ascii_lowercase())
                    }
                    (l, r) => l.cmp(r),
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| left.len().cmp(&right.len())),
        }
    }
}

/// SQL equality: `=` never matches NULL, `<=>` treats two NULLs as equal.
fn compare(value: &Cell, expected: &Cell, null_safe: bool) -> bool {
    if !null_safe && (value.is_null() || expected.is_null()) {
        return false;
    }

    value == expected
}

#[derive(Debug)]
struct Inner {
    tables: HashMap<TableName, MemoryTable>,
    position: BinlogPosition,
    server_version: Option<NonZeroI32>,
    locked_tables: Vec<TableName>,
    lock_unavailable: bool,
    reject_instant_ddl: bool,
    applied_ddl: Vec<String>,
    injected_failures: VecDeque<ErrorKind>,
    key_collation: KeyCollation,
}

impl Inner {
    fn table(&self, name: &TableName) -> MigrationResult<&MemoryTable> {
        self.tables.get(name).ok_or_else(|| {
            migration_error!(ErrorKind::SourceSchemaError, "Table does not exist", name)
        })
    }

    fn table_mut(&mut self, name: &TableName) -> MigrationResult<&mut MemoryTable> {
        self.tables.get_mut(name).ok_or_else(|| {
            migration_error!(ErrorKind::SourceSchemaError, "Table does not exist", name)
        })
    }

    fn advance_position(&mut self) -> BinlogPosition {
        self.position.position += EVENT_SIZE;
        self.position
    }

    fn take_injected_failure(&mut self) -> MigrationResult<()> {
        if let Some(kind) = self.injected_failures.pop_front() {
            bail!(kind, "Injected store failure");
        }

        Ok(())
    }

    /// Applies `statements` atomically, restoring the touched tables on failure.
    fn apply_group(&mut self, statements: &[Statement]) -> MigrationResult<u64> {
        let touched: Vec<TableName> = statements
            .iter()
            .filter_map(|statement| match &statement.kind {
                StatementKind::Replace { table, .. }
                | StatementKind::Delete { table, .. }
                | StatementKind::Update { table, .. } => Some(table.clone()),
                _ => None,
            })
            .collect();
        let snapshot: Vec<(TableName, MemoryTable)> = touched
            .iter()
            .filter_map(|name| self.tables.get(name).map(|table| (name.clone(), table.clone())))
            .collect();

        let mut affected = 0;
        for statement in statements {
            match self.apply(statement) {
                Ok(rows) => affected += rows,
                Err(err) => {
                    for (name, table) in snapshot {
                        self.tables.insert(name, table);
                    }

                    return Err(err);
                }
            }
        }

        Ok(affected)
    }

    fn apply(&mut self, statement: &Statement) -> MigrationResult<u64> {
        match &statement.kind {
            StatementKind::SessionMode => Ok(0),
            StatementKind::Replace {
                table,
                columns,
                rows,
            } => {
                let table = self.table_mut(table)?;
                let positions = table.positions(columns.iter())?;
                if statement.args.len() != positions.len() * rows {
                    bail!(
                        ErrorKind::InvalidData,
                        "Replace parameters do not match its columns"
                    );
                }

                for values in statement.args.chunks(positions.len()) {
                    let mut row = vec![Cell::Null; table.columns.len()];
                    for (position, value) in positions.iter().zip(values) {
                        row[*position] = value.clone();
                    }

                    let key = table.key_of(&row);
                    table.rows.insert(key, row);
                }

                Ok(*rows as u64)
            }
            StatementKind::Delete { table, predicates } => {
                let table = self.table_mut(table)?;
                let predicates = resolve_predicates(table, predicates)?;
                let keys = table.matching_keys(&predicates, &statement.args);

                for key in &keys {
                    table.rows.remove(key);
                }

                Ok(keys.len() as u64)
            }
            StatementKind::Update {
                table,
                columns,
                predicates,
            } => {
                let table = self.table_mut(table)?;
                let positions = table.positions(columns.iter())?;
                let predicates = resolve_predicates(table, predicates)?;
                let (new_values, filter_values) = statement.args.split_at(positions.len());
                let keys = table.matching_keys(&predicates, filter_values);

                for key in &keys {
                    let Some(mut row) = table.rows.remove(key) else {
                        continue;
                    };
                    for (position, value) in positions.iter().zip(new_values) {
                        row[*position] = value.clone();
                    }

                    let new_key = table.key_of(&row);
                    if table.rows.contains_key(&new_key) {
                        bail!(ErrorKind::QueryFailed, "Duplicate entry for unique key");
                    }
                    table.rows.insert(new_key, row);
                }

                Ok(keys.len() as u64)
            }
            StatementKind::InstantDdl { alter, .. } => {
                if self.reject_instant_ddl {
                    bail!(
                        ErrorKind::InstantDdlRejected,
                        "ALGORITHM=INSTANT is not supported for this operation",
                        alter
                    );
                }

                self.applied_ddl.push(statement.query.clone());
                Ok(0)
            }
            StatementKind::SelectChunk { .. } | StatementKind::SelectKeyBound { .. } => {
                bail!(ErrorKind::InvalidState, "Selects cannot be executed as writes")
            }
            StatementKind::LockTables { .. }
            | StatementKind::RenameTables { .. }
            | StatementKind::UnlockTables => {
                bail!(
                    ErrorKind::InvalidState,
                    "Table locks are managed by the cut-over session"
                )
            }
        }
    }

    fn select(&self, statement: &Statement) -> MigrationResult<Vec<TableRow>> {
        match &statement.kind {
            StatementKind::SelectChunk {
                table,
                columns,
                key,
                include_lower,
                limit,
            } => {
                let table = self.table(table)?;
                table.check_key(key)?;
                let positions = table.positions(columns.iter())?;
                if statement.args.len() != key.len() * 2 {
                    bail!(
                        ErrorKind::InvalidData,
                        "Chunk bounds do not match the unique key"
                    );
                }

                let (lower, upper) = statement.args.split_at(key.len());
                let collation = self.key_collation;
                let bounds = collation.compare(lower, upper);
                if bounds.is_gt() || (bounds.is_eq() && !include_lower) {
                    return Ok(vec![]);
                }

                if collation == KeyCollation::Binary {
                    let lower = if *include_lower {
                        Bound::Included(lower.to_vec())
                    } else {
                        Bound::Excluded(lower.to_vec())
                    };

                    return Ok(table
                        .rows
                        .range((lower, Bound::Included(upper.to_vec())))
                        .take(*limit)
                        .map(|(_, row)| MemoryTable::project(row, &positions))
                        .collect());
                }

                let mut in_range: Vec<_> = table
                    .rows
                    .iter()
                    .filter(|(key, _)| {
                        let from_lower = collation.compare(key, lower);
                        (from_lower.is_gt() || (*include_lower && from_lower.is_eq()))
                            && collation.compare(key, upper).is_le()
                    })
                    .collect();
                in_range.sort_by(|(left, _), (right, _)| collation.compare(left, right));

                Ok(in_range
                    .into_iter()
                    .take(*limit)
                    .map(|(_, row)| MemoryTable::project(row, &positions))
                    .collect())
            }
            StatementKind::SelectKeyBound { table, key, bound } => {
                let table = self.table(table)?;
                let positions = table.check_key(key)?;
                let collation = self.key_collation;
                let keyed = table.rows.iter();
                let row = match bound {
                    KeyBound::Min => keyed.min_by(|(l, _), (r, _)| collation.compare(l, r)),
                    KeyBound::Max => keyed.max_by(|(l, _), (r, _)| collation.compare(l, r)),
                }
                .map(|(_, row)| row);

                Ok(row
                    .map(|row| MemoryTable::project(row, &positions))
                    .into_iter()
                    .collect())
            }
            _ => bail!(ErrorKind::InvalidState, "Statement does not return rows"),
        }
    }
}

fn resolve_predicates(
    table: &MemoryTable,
    predicates: &[Predicate],
) -> MigrationResult<Vec<(usize, bool)>> {
    predicates
        .iter()
        .map(|predicate| Ok((table.position(&predicate.column)?, predicate.null_safe)))
        .collect()
}

/// In-memory database that interprets the statements built by the applier.
///
/// Besides the [`MigrationStore`] operations it simulates the application writing to the
/// original table: those writes advance the binlog position, produce the matching change
/// event and wait while the table is locked by the cut-over.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    locked_tx: Arc<watch::Sender<bool>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let inner = Inner {
            tables: HashMap::new(),
            position: BinlogPosition::new(1, 4),
            server_version: NonZeroI32::new(80035),
            locked_tables: vec![],
            lock_unavailable: false,
            reject_instant_ddl: false,
            applied_ddl: vec![],
            injected_failures: VecDeque::new(),
            key_collation: KeyCollation::default(),
        };
        let (locked_tx, _) = watch::channel(false);

        Self {
            inner: Arc::new(Mutex::new(inner)),
            locked_tx: Arc::new(locked_tx),
        }
    }

    /// Creates an empty table keyed by `key`.
    pub async fn create_table(&self, schema: &TableSchema, key: &ColumnList) -> MigrationResult<()> {
        let table = MemoryTable::new(schema, key)?;
        let mut inner = self.inner.lock().await;

        if inner.tables.contains_key(&schema.name) {
            bail!(
                ErrorKind::QueryFailed,
                "Table already exists",
                schema.name.to_string()
            );
        }
        inner.tables.insert(schema.name.clone(), table);

        Ok(())
    }

    /// Loads rows without producing change events.
    pub async fn load_rows(&self, table: &TableName, rows: Vec<TableRow>) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        let table = inner.table_mut(table)?;

        for row in rows {
            let values = row.into_values();
            let key = table.key_of(&values);
            table.rows.insert(key, values);
        }

        Ok(())
    }

    /// Returns the rows of `table` ordered by its key.
    pub async fn rows(&self, table: &TableName) -> MigrationResult<Vec<TableRow>> {
        let inner = self.inner.lock().await;
        let table = inner.table(table)?;

        Ok(table.rows.values().cloned().map(TableRow::new).collect())
    }

    pub async fn has_table(&self, table: &TableName) -> bool {
        self.inner.lock().await.tables.contains_key(table)
    }

    pub async fn is_locked(&self) -> bool {
        !self.inner.lock().await.locked_tables.is_empty()
    }

    /// Makes every lock attempt wait for its timeout and fail.
    pub async fn set_lock_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.lock_unavailable = unavailable;
    }

    /// Makes the server reject instant alterations.
    pub async fn set_reject_instant_ddl(&self, reject: bool) {
        self.inner.lock().await.reject_instant_ddl = reject;
    }

    /// Changes how chunk and key bound selects order unique-key values. Stored rows keep their
    /// binary order.
    pub async fn set_key_collation(&self, collation: KeyCollation) {
        self.inner.lock().await.key_collation = collation;
    }

    pub async fn set_server_version(&self, version: Option<NonZeroI32>) {
        self.inner.lock().await.server_version = version;
    }

    /// Instant alterations executed so far.
    pub async fn applied_ddl(&self) -> Vec<String> {
        self.inner.lock().await.applied_ddl.clone()
    }

    /// Makes the next `count` write groups fail with `kind` without applying them.
    pub async fn inject_failures(&self, kind: ErrorKind, count: usize) {
        let mut inner = self.inner.lock().await;
        inner.injected_failures.extend(std::iter::repeat_n(kind, count));
    }

    /// Records a transaction that touches no migrated table.
    pub async fn advance_position(&self) -> BinlogPosition {
        self.inner.lock().await.advance_position()
    }

    /// Inserts a row into `table` as the application would.
    pub async fn source_insert(
        &self,
        table: &TableName,
        row: TableRow,
    ) -> MigrationResult<PositionedEvent> {
        let event = self
            .source_write(table, |memory_table| {
                let key = memory_table.key_of(row.values());
                if memory_table.rows.contains_key(&key) {
                    bail!(ErrorKind::QueryFailed, "Duplicate entry for unique key");
                }
                memory_table.rows.insert(key, row.values().to_vec());

                Ok(Some(ChangeEvent::Insert(InsertEvent {
                    table: table.clone(),
                    new_row: row,
                })))
            })
            .await?;

        event.ok_or_else(|| migration_error!(ErrorKind::InvalidState, "Insert produced no event"))
    }

    /// Replaces the row with unique key `key`. Returns `None` when no such row exists.
    pub async fn source_update(
        &self,
        table: &TableName,
        key: &[Cell],
        new_row: TableRow,
    ) -> MigrationResult<Option<PositionedEvent>> {
        self.source_write(table, |memory_table| {
            let Some(old_values) = memory_table.rows.remove(key) else {
                return Ok(None);
            };

            let new_key = memory_table.key_of(new_row.values());
            if new_key != key && memory_table.rows.contains_key(&new_key) {
                memory_table.rows.insert(key.to_vec(), old_values);
                bail!(ErrorKind::QueryFailed, "Duplicate entry for unique key");
            }
            memory_table.rows.insert(new_key, new_row.values().to_vec());

            Ok(Some(ChangeEvent::Update(UpdateEvent {
                table: table.clone(),
                old_row: TableRow::new(old_values),
                new_row,
            })))
        })
        .await
    }

    /// Deletes the row with unique key `key`. Returns `None` when no such row exists.
    pub async fn source_delete(
        &self,
        table: &TableName,
        key: &[Cell],
    ) -> MigrationResult<Option<PositionedEvent>> {
        self.source_write(table, |memory_table| {
            Ok(memory_table.rows.remove(key).map(|old_values| {
                ChangeEvent::Delete(DeleteEvent {
                    table: table.clone(),
                    old_row: TableRow::new(old_values),
                })
            }))
        })
        .await
    }

    async fn source_write<F>(
        &self,
        table: &TableName,
        write: F,
    ) -> MigrationResult<Option<PositionedEvent>>
    where
        F: FnOnce(&mut MemoryTable) -> MigrationResult<Option<ChangeEvent>>,
    {
        loop {
            let mut locked_rx = self.locked_tx.subscribe();

            {
                let mut inner = self.inner.lock().await;
                if !inner.locked_tables.contains(table) {
                    let Some(event) = write(inner.table_mut(table)?)? else {
                        return Ok(None);
                    };
                    let position = inner.advance_position();

                    return Ok(Some(PositionedEvent::single(position, event)));
                }
            }

            // The sender lives as long as the store.
            let _ = locked_rx.wait_for(|locked| !locked).await;
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MigrationStore for MemoryStore {
    async fn execute(&self, statements: &[Statement]) -> MigrationResult<u64> {
        let mut inner = self.inner.lock().await;
        inner.take_injected_failure()?;

        inner.apply_group(statements)
    }

    async fn query_rows(&self, statement: &Statement) -> MigrationResult<Vec<TableRow>> {
        let inner = self.inner.lock().await;

        inner.select(statement)
    }

    async fn copy_chunk<F>(&self, select: &Statement, build: F) -> MigrationResult<Vec<TableRow>>
    where
        F: FnOnce(&[TableRow]) -> Vec<Statement> + Send,
    {
        let mut inner = self.inner.lock().await;
        inner.take_injected_failure()?;

        let rows = inner.select(select)?;
        let statements = build(&rows);
        inner.apply_group(&statements)?;

        Ok(rows)
    }

    async fn current_position(&self) -> MigrationResult<BinlogPosition> {
        Ok(self.inner.lock().await.position)
    }

    async fn server_version(&self) -> MigrationResult<Option<NonZeroI32>> {
        Ok(self.inner.lock().await.server_version)
    }

    async fn lock_tables(&self, lock: &Statement, timeout: Duration) -> MigrationResult<()> {
        let StatementKind::LockTables { tables } = &lock.kind else {
            bail!(ErrorKind::InvalidState, "Expected a lock statement");
        };

        let mut inner = self.inner.lock().await;
        if !inner.locked_tables.is_empty() {
            bail!(ErrorKind::InvalidState, "Tables are already locked");
        }

        if inner.lock_unavailable {
            drop(inner);
            tokio::time::sleep(timeout).await;

            bail!(
                ErrorKind::CutOverLockTimeout,
                "Table locks were not granted in time",
                format!("waited {timeout:?}")
            );
        }

        for table in tables {
            inner.table(table)?;
        }
        inner.locked_tables = tables.clone();
        self.locked_tx.send_replace(true);

        debug!(tables = ?tables, "memory tables locked");

        Ok(())
    }

    async fn swap_tables(&self, rename: &Statement) -> MigrationResult<()> {
        let StatementKind::RenameTables { renames } = &rename.kind else {
            bail!(ErrorKind::InvalidState, "Expected a rename statement");
        };

        let mut inner = self.inner.lock().await;
        if inner.locked_tables.is_empty() {
            bail!(ErrorKind::InvalidState, "Tables must be locked before the swap");
        }

        // Validate the whole rename before touching anything, it applies atomically.
        let mut names: Vec<TableName> = inner.tables.keys().cloned().collect();
        for (from, to) in renames {
            let Some(index) = names.iter().position(|name| name == from) else {
                bail!(
                    ErrorKind::SourceSchemaError,
                    "Table to rename does not exist",
                    from.to_string()
                );
            };
            if names.contains(to) {
                bail!(
                    ErrorKind::QueryFailed,
                    "Rename target already exists",
                    to.to_string()
                );
            }
            names[index] = to.clone();
        }

        for (from, to) in renames {
            if let Some(table) = inner.tables.remove(from) {
                inner.tables.insert(to.clone(), table);
            }
        }

        Ok(())
    }

    async fn unlock_tables(&self, _unlock: &Statement) -> MigrationResult<()> {
        let mut inner = self.inner.lock().await;
        inner.locked_tables.clear();
        self.locked_tx.send_replace(false);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnSchema;

    fn schema(name: &str) -> TableSchema {
        TableSchema::new(
            TableName::new("test", name),
            vec![
                ColumnSchema::new("id", "bigint", false),
                ColumnSchema::new("name", "varchar(255)", true),
            ],
        )
    }

    fn key() -> ColumnList {
        ColumnList::new(["id"])
    }

    fn row(id: i64, name: Option<&str>) -> TableRow {
        TableRow::new(vec![Cell::I64(id), Cell::from(name)])
    }

    fn replace(table: &str, rows: &[TableRow]) -> Statement {
        Statement::new(
            String::new(),
            rows.iter().flat_map(|row| row.values().to_vec()).collect(),
            StatementKind::Replace {
                table: TableName::new("test", table),
                columns: ColumnList::new(["id", "name"]),
                rows: rows.len(),
            },
        )
    }

    fn delete(table: &str, values: Vec<Cell>) -> Statement {
        Statement::new(
            String::new(),
            values,
            StatementKind::Delete {
                table: TableName::new("test", table),
                predicates: vec![
                    Predicate {
                        column: "id".to_string(),
                        null_safe: false,
                    },
                    Predicate {
                        column: "name".to_string(),
                        null_safe: true,
                    },
                ],
            },
        )
    }

    async fn store_with_table() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_table(&schema("t"), &key()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn replace_is_idempotent() {
        let store = store_with_table().await;
        let statement = replace("t", &[row(1, Some("a"))]);

        store.execute(&[statement.clone()]).await.unwrap();
        store.execute(&[statement]).await.unwrap();

        let rows = store.rows(&TableName::new("test", "t")).await.unwrap();
        assert_eq!(rows, vec![row(1, Some("a"))]);
    }

    #[tokio::test]
    async fn delete_matches_null_safely() {
        let store = store_with_table().await;
        store.execute(&[replace("t", &[row(1, None)])]).await.unwrap();

        let affected = store
            .execute(&[delete("t", vec![Cell::I64(1), Cell::Null])])
            .await
            .unwrap();

        assert_eq!(affected, 1);
        assert!(store.rows(&TableName::new("test", "t")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_group_leaves_tables_untouched() {
        let store = store_with_table().await;
        let bad = Statement::new(
            String::new(),
            vec![Cell::I64(2)],
            StatementKind::Replace {
                table: TableName::new("test", "t"),
                columns: ColumnList::new(["id", "missing"]),
                rows: 1,
            },
        );

        let err = store
            .execute(&[replace("t", &[row(1, Some("a"))]), bad])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SourceSchemaError);
        assert!(store.rows(&TableName::new("test", "t")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn source_writes_advance_the_position() {
        let store = store_with_table().await;
        let table = TableName::new("test", "t");
        let start = store.current_position().await.unwrap();

        let inserted = store.source_insert(&table, row(1, Some("a"))).await.unwrap();
        let updated = store
            .source_update(&table, &[Cell::I64(1)], row(1, Some("b")))
            .await
            .unwrap()
            .unwrap();
        let missing = store.source_delete(&table, &[Cell::I64(9)]).await.unwrap();

        assert!(inserted.position > start);
        assert!(updated.position > inserted.position);
        assert!(missing.is_none());
        assert_eq!(store.rows(&table).await.unwrap(), vec![row(1, Some("b"))]);
    }

    #[tokio::test]
    async fn rename_fails_when_the_target_exists() {
        let store = store_with_table().await;
        store.create_table(&schema("u"), &key()).await.unwrap();

        let lock = Statement::new(
            String::new(),
            vec![],
            StatementKind::LockTables {
                tables: vec![TableName::new("test", "t")],
            },
        );
        let rename = Statement::new(
            String::new(),
            vec![],
            StatementKind::RenameTables {
                renames: vec![(TableName::new("test", "t"), TableName::new("test", "u"))],
            },
        );

        store.lock_tables(&lock, Duration::from_secs(1)).await.unwrap();
        let err = store.swap_tables(&rename).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::QueryFailed);
        assert!(store.has_table(&TableName::new("test", "t")).await);
    }
}
