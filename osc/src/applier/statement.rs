use crate::types::{Cell, ColumnList, TableName};

/// A column compared in a `where` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub column: String,
    /// Uses `<=>` instead of `=`, so a NULL value matches a NULL column.
    pub null_safe: bool,
}

/// Which end of the unique-key range a bound query selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyBound {
    Min,
    Max,
}

/// Structured description of a [`Statement`].
///
/// Stores that do not speak SQL interpret statements through their kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    /// Session settings applied before a write group.
    SessionMode,
    /// Upsert of `rows` rows, each with one parameter per column.
    Replace {
        table: TableName,
        columns: ColumnList,
        rows: usize,
    },
    /// Delete filtered on every predicate, one parameter per predicate.
    Delete {
        table: TableName,
        predicates: Vec<Predicate>,
    },
    /// In place update. Parameters are the new values of `columns` followed by one parameter
    /// per predicate.
    Update {
        table: TableName,
        columns: ColumnList,
        predicates: Vec<Predicate>,
    },
    /// Rows with a unique key between the lower bound and the upper bound (inclusive), ordered
    /// by the key. Parameters are the lower bound values followed by the upper bound values.
    SelectChunk {
        table: TableName,
        columns: ColumnList,
        key: ColumnList,
        include_lower: bool,
        limit: usize,
    },
    /// The smallest or largest unique-key value of a table.
    SelectKeyBound {
        table: TableName,
        key: ColumnList,
        bound: KeyBound,
    },
    /// Metadata-only alteration of a table.
    InstantDdl { table: TableName, alter: String },
    LockTables { tables: Vec<TableName> },
    /// Atomic multi-table rename, applied pairwise in order.
    RenameTables { renames: Vec<(TableName, TableName)> },
    UnlockTables,
}

/// A SQL statement with its ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub query: String,
    pub args: Vec<Cell>,
    pub kind: StatementKind,
}

impl Statement {
    pub fn new(query: String, args: Vec<Cell>, kind: StatementKind) -> Self {
        Self { query, args, kind }
    }

    /// Whether the statement changes table data.
    pub fn is_write(&self) -> bool {
        matches!(
            self.kind,
            StatementKind::Replace { .. }
                | StatementKind::Delete { .. }
                | StatementKind::Update { .. }
        )
    }
}

/// Builds `((`a` = ?) and (`b` <=> ?))` from predicates.
pub(crate) fn where_clause(predicates: &[Predicate]) -> String {
    let comparisons = predicates
        .iter()
        .map(|predicate| {
            let operator = if predicate.null_safe { "<=>" } else { "=" };
            format!(
                "({} {operator} ?)",
                osc_mysql::types::quote_identifier(&predicate.column)
            )
        })
        .collect::<Vec<_>>()
        .join(" and ");

    format!("({comparisons})")
}

/// Builds `(?, ?, ?)` for `count` parameters.
pub(crate) fn placeholders(count: usize) -> String {
    format!("({})", vec!["?"; count].join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_where_clause_with_null_safe_comparisons() {
        let predicates = vec![
            Predicate {
                column: "id".to_string(),
                null_safe: false,
            },
            Predicate {
                column: "email".to_string(),
                null_safe: true,
            },
        ];

        assert_eq!(
            where_clause(&predicates),
            "((`id` = ?) and (`email` <=> ?))"
        );
    }

    #[test]
    fn builds_placeholders() {
        assert_eq!(placeholders(1), "(?)");
        assert_eq!(placeholders(3), "(?, ?, ?)");
    }
}
