use std::num::NonZeroI32;
use std::sync::Arc;

use tracing::warn;

use crate::applier::{
    InstantDdlEligibility, KeyBound, Predicate, Statement, StatementKind,
    generate_session_query, generate_sql_mode_query, instant_ddl_eligibility, instant_ddl_query,
    placeholders, where_clause,
};
use crate::context::MigrationContext;
use crate::types::{Cell, ChangeEvent, ColumnList, TableName, TableRow, UpdateEvent};

/// Statements an event translates to.
#[derive(Debug, Clone, PartialEq)]
pub enum DmlEventQuery {
    /// Statements to run as one atomic group, in order.
    Execute(Vec<Statement>),
    /// The event does not apply to the shadow table.
    NoOp { reason: String },
}

/// Builds the statements that keep the shadow table in sync with the original table.
///
/// The applier is stateless, every builder can be called again with the same input and returns
/// the same statements.
#[derive(Debug, Clone)]
pub struct Applier {
    context: Arc<MigrationContext>,
}

impl Applier {
    pub fn new(context: Arc<MigrationContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<MigrationContext> {
        &self.context
    }

    pub fn generate_sql_mode_query(&self) -> String {
        let config = self.context.config();
        generate_sql_mode_query(config.skip_strict_mode, config.allow_zero_in_date)
    }

    /// Session statement that prefixes every write group.
    pub fn build_session_statement(&self) -> Statement {
        let config = self.context.config();
        Statement::new(
            generate_session_query(config.skip_strict_mode, config.allow_zero_in_date),
            vec![],
            StatementKind::SessionMode,
        )
    }

    pub fn generate_instant_ddl_query(&self) -> String {
        instant_ddl_query(self.context.original_table(), &self.context.config().alter)
    }

    pub fn instant_ddl_eligibility(
        &self,
        server_version: Option<NonZeroI32>,
    ) -> InstantDdlEligibility {
        instant_ddl_eligibility(&self.context.config().alter, server_version)
    }

    pub fn build_instant_ddl_statement(&self) -> Statement {
        Statement::new(
            self.generate_instant_ddl_query(),
            vec![],
            StatementKind::InstantDdl {
                table: self.context.original_table().clone(),
                alter: self.context.config().alter.trim().to_string(),
            },
        )
    }

    /// Translates a change event of the original table into statements on the shadow table.
    ///
    /// Events of other tables and events whose row images do not match the original schema
    /// translate to [`DmlEventQuery::NoOp`].
    pub fn build_dml_event_query(&self, event: &ChangeEvent) -> DmlEventQuery {
        if event.table() != self.context.original_table() {
            return DmlEventQuery::NoOp {
                reason: format!("event for table {}", event.table()),
            };
        }

        let result = match event {
            ChangeEvent::Insert(insert) => self
                .shared_values(&insert.new_row)
                .map(|values| vec![self.build_replace(vec![values])]),
            ChangeEvent::Delete(delete) => self
                .shared_values(&delete.old_row)
                .map(|values| vec![self.build_delete(values)]),
            ChangeEvent::Update(update) => self.build_update_statements(update),
        };

        match result {
            Ok(statements) => DmlEventQuery::Execute(statements),
            Err(reason) => {
                warn!(
                    table = %self.context.original_table(),
                    event_type = %event.event_type(),
                    %reason,
                    "schema mismatch, change event skipped"
                );

                DmlEventQuery::NoOp { reason }
            }
        }
    }

    /// Returns the first unique-key column whose value differs between the old and the new
    /// row image of `event`.
    pub fn update_modifies_unique_key_columns(&self, event: &UpdateEvent) -> Option<&str> {
        self.context
            .key_row_positions()
            .iter()
            .zip(self.context.unique_key().columns.iter())
            .find(|(position, _)| event.old_row.get(**position) != event.new_row.get(**position))
            .map(|(_, name)| name)
    }

    fn build_update_statements(&self, event: &UpdateEvent) -> Result<Vec<Statement>, String> {
        let old_values = self.shared_values(&event.old_row)?;
        let new_values = self.shared_values(&event.new_row)?;

        if self.update_modifies_unique_key_columns(event).is_some() {
            // The row moves to another key, the old key must disappear.
            return Ok(vec![
                self.build_delete(old_values),
                self.build_replace(vec![new_values]),
            ]);
        }

        Ok(vec![self.build_update(new_values, old_values)])
    }

    /// Builds the upsert of a backfill chunk.
    ///
    /// `rows` are laid out in shared column order, as returned by the chunk select.
    pub fn build_backfill_statement(&self, rows: &[TableRow]) -> Option<Statement> {
        if rows.is_empty() {
            return None;
        }

        let values = rows.iter().map(|row| row.values().to_vec()).collect();
        Some(self.build_replace(values))
    }

    fn build_replace(&self, rows: Vec<Vec<Cell>>) -> Statement {
        let shadow = self.context.shadow_table();
        let columns = self.context.shared_columns().shadow_names();
        let row_placeholders = vec![placeholders(columns.len()); rows.len()].join(", ");
        let shadow_name = shadow.as_quoted_identifier();

        let query = format!(
            "replace /* osc {shadow_name} */ into {shadow_name} ({}) values {row_placeholders}",
            columns.as_quoted_list()
        );
        let row_count = rows.len();
        let args = rows.into_iter().flatten().collect();

        Statement::new(
            query,
            args,
            StatementKind::Replace {
                table: shadow.clone(),
                columns,
                rows: row_count,
            },
        )
    }

    fn build_delete(&self, old_values: Vec<Cell>) -> Statement {
        let shadow = self.context.shadow_table();
        let predicates = self.predicates();
        let shadow_name = shadow.as_quoted_identifier();

        let query = format!(
            "delete /* osc {shadow_name} */ from {shadow_name} where {}",
            where_clause(&predicates)
        );

        Statement::new(
            query,
            old_values,
            StatementKind::Delete {
                table: shadow.clone(),
                predicates,
            },
        )
    }

    fn build_update(&self, new_values: Vec<Cell>, old_values: Vec<Cell>) -> Statement {
        let shadow = self.context.shadow_table();
        let columns = self.context.shared_columns().shadow_names();
        let predicates = self.predicates();
        let shadow_name = shadow.as_quoted_identifier();

        let assignments = columns
            .iter()
            .map(|column| format!("{}=?", osc_mysql::types::quote_identifier(column)))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "update /* osc {shadow_name} */ {shadow_name} set {assignments} where {}",
            where_clause(&predicates)
        );

        let mut args = new_values;
        args.extend(old_values);

        Statement::new(
            query,
            args,
            StatementKind::Update {
                table: shadow.clone(),
                columns,
                predicates,
            },
        )
    }

    /// Selects up to `limit` rows of the original table whose key lies after `lower` (or at it,
    /// when `include_lower` is set) and at or before `upper`.
    ///
    /// Rows are returned in shared column order and locked in share mode, so a concurrent
    /// change to them commits after the chunk is written.
    pub fn build_chunk_select(
        &self,
        lower: &[Cell],
        include_lower: bool,
        upper: &[Cell],
        limit: usize,
    ) -> Statement {
        let original = self.context.original_table();
        let columns = self.context.shared_columns().original_names();
        let key = self.context.unique_key().columns.clone();
        let key_list = key.as_quoted_list();
        let lower_operator = if include_lower { ">=" } else { ">" };
        let original_name = original.as_quoted_identifier();

        let query = format!(
            "select /* osc {original_name} chunk */ {} from {original_name} force index ({}) \
             where (({key_list}) {lower_operator} {}) and (({key_list}) <= {}) \
             order by {} limit {limit} lock in share mode",
            columns.as_quoted_list(),
            osc_mysql::types::quote_identifier(&self.context.unique_key().name),
            placeholders(key.len()),
            placeholders(key.len()),
            order_by(&key, "asc"),
        );

        let mut args = lower.to_vec();
        args.extend_from_slice(upper);

        Statement::new(
            query,
            args,
            StatementKind::SelectChunk {
                table: original.clone(),
                columns,
                key,
                include_lower,
                limit,
            },
        )
    }

    /// Selects the smallest or largest unique-key value of the original table.
    pub fn build_key_bound_select(&self, bound: KeyBound) -> Statement {
        let original = self.context.original_table();
        let key = self.context.unique_key().columns.clone();
        let direction = match bound {
            KeyBound::Min => "asc",
            KeyBound::Max => "desc",
        };
        let original_name = original.as_quoted_identifier();

        let query = format!(
            "select /* osc {original_name} {direction} */ {} from {original_name} force index ({}) \
             order by {} limit 1",
            key.as_quoted_list(),
            osc_mysql::types::quote_identifier(&self.context.unique_key().name),
            order_by(&key, direction),
        );

        Statement::new(
            query,
            vec![],
            StatementKind::SelectKeyBound {
                table: original.clone(),
                key,
                bound,
            },
        )
    }

    /// Write-locks the original and the shadow table.
    pub fn build_lock_tables(&self) -> Statement {
        let tables = vec![
            self.context.original_table().clone(),
            self.context.shadow_table().clone(),
        ];
        let query = format!(
            "LOCK /* osc */ TABLES {}",
            tables
                .iter()
                .map(|table| format!("{} WRITE", table.as_quoted_identifier()))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Statement::new(query, vec![], StatementKind::LockTables { tables })
    }

    /// Renames the original table away and the shadow table into its place, atomically.
    pub fn build_rename_tables(&self) -> Statement {
        let original = self.context.original_table();
        let renames = vec![
            (original.clone(), self.context.old_table().clone()),
            (self.context.shadow_table().clone(), original.clone()),
        ];
        let query = format!(
            "RENAME /* osc */ TABLE {}",
            renames
                .iter()
                .map(|(from, to)| format!(
                    "{} TO {}",
                    from.as_quoted_identifier(),
                    to.as_quoted_identifier()
                ))
                .collect::<Vec<_>>()
                .join(", ")
        );

        Statement::new(query, vec![], StatementKind::RenameTables { renames })
    }

    pub fn build_unlock_tables(&self) -> Statement {
        Statement::new(
            "UNLOCK /* osc */ TABLES".to_string(),
            vec![],
            StatementKind::UnlockTables,
        )
    }

    pub fn shadow_table(&self) -> &TableName {
        self.context.shadow_table()
    }

    /// Values of the shared columns in `row`, an original table row image.
    fn shared_values(&self, row: &TableRow) -> Result<Vec<Cell>, String> {
        let expected = self.context.original_schema().num_columns();
        if row.len() != expected {
            return Err(format!(
                "row image has {} values, the original table has {expected} columns",
                row.len()
            ));
        }

        self.context
            .shared_columns()
            .iter()
            .map(|column| {
                row.get(column.original_index).cloned().ok_or_else(|| {
                    format!("row image lacks shared column `{}`", column.original)
                })
            })
            .collect()
    }

    fn predicates(&self) -> Vec<Predicate> {
        self.context
            .shared_columns()
            .iter()
            .map(|column| Predicate {
                column: column.shadow.clone(),
                null_safe: column.nullable,
            })
            .collect()
    }
}

fn order_by(key: &ColumnList, direction: &str) -> String {
    key.iter()
        .map(|column| format!("{} {direction}", osc_mysql::types::quote_identifier(column)))
        .collect::<Vec<_>>()
        .join(", ")
}
