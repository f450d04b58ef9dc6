use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{TableSchema, quote_identifier};

/// An ordered list of column names.
#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct ColumnList(Vec<String>);

impl ColumnList {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|column| column.eq_ignore_ascii_case(name))
    }

    /// Returns the columns as a comma separated list of quoted identifiers.
    pub fn as_quoted_list(&self) -> String {
        self.0
            .iter()
            .map(|name| quote_identifier(name))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Errors raised while validating a unique key against the original table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("unique key `{0}` has no columns")]
    Empty(String),

    #[error("unique key column `{0}` does not exist in the original table")]
    UnknownColumn(String),

    #[error("unique key column `{0}` is nullable")]
    NullableColumn(String),

    #[error("unique key column `{0}` is not shared with the shadow table")]
    NotShared(String),
}

/// The unique key chosen to chunk the backfill and to identify rows during replay.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct UniqueKey {
    /// Index name, `PRIMARY` for the primary key.
    pub name: String,
    /// Key columns in index order.
    pub columns: ColumnList,
}

impl UniqueKey {
    pub fn new(name: impl Into<String>, columns: ColumnList) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// Checks that the key is a usable identity for the migration.
    ///
    /// Every column must exist in the original table, be non-nullable and be part of the
    /// shared columns.
    pub fn validate(
        &self,
        original: &TableSchema,
        shared_columns: &SharedColumns,
    ) -> Result<(), KeyError> {
        if self.columns.is_empty() {
            return Err(KeyError::Empty(self.name.clone()));
        }

        for name in self.columns.iter() {
            let Some(column) = original.column(name) else {
                return Err(KeyError::UnknownColumn(name.to_string()));
            };

            if column.nullable {
                return Err(KeyError::NullableColumn(name.to_string()));
            }

            if shared_columns.find(name).is_none() {
                return Err(KeyError::NotShared(name.to_string()));
            }
        }

        Ok(())
    }
}

/// A column present and writable on both the original and the shadow table.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SharedColumn {
    /// Column name in the original table.
    pub original: String,
    /// Column name in the shadow table.
    pub shadow: String,
    /// Ordinal position of the column in the original table's row image.
    pub original_index: usize,
    /// Whether the original column accepts NULL.
    pub nullable: bool,
}

/// Mapping between the original table's columns and the shadow table's columns.
///
/// Entries keep the original table's column order.
#[derive(Debug, Clone, Eq, PartialEq, Default, Serialize, Deserialize)]
pub struct SharedColumns(Vec<SharedColumn>);

impl SharedColumns {
    /// Builds the mapping from the two table schemas.
    ///
    /// `renames` maps original column names to their shadow names. Columns missing from either
    /// side and generated columns are left out.
    pub fn build(
        original: &TableSchema,
        shadow: &TableSchema,
        renames: &HashMap<String, String>,
    ) -> Self {
        let mut shared = Vec::new();

        for (index, column) in original.column_schemas.iter().enumerate() {
            if column.generated {
                continue;
            }

            let shadow_name = renames
                .iter()
                .find(|(from, _)| from.eq_ignore_ascii_case(&column.name))
                .map(|(_, to)| to.as_str())
                .unwrap_or(column.name.as_str());

            let Some(shadow_column) = shadow.column(shadow_name) else {
                continue;
            };

            if shadow_column.generated {
                continue;
            }

            shared.push(SharedColumn {
                original: column.name.clone(),
                shadow: shadow_column.name.clone(),
                original_index: index,
                nullable: column.nullable,
            });
        }

        Self(shared)
    }

    pub fn from_columns(columns: Vec<SharedColumn>) -> Self {
        Self(columns)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedColumn> {
        self.0.iter()
    }

    /// Finds a shared column by its original name.
    pub fn find(&self, original_name: &str) -> Option<&SharedColumn> {
        self.0
            .iter()
            .find(|column| column.original.eq_ignore_ascii_case(original_name))
    }

    /// Original column names, in order.
    pub fn original_names(&self) -> ColumnList {
        ColumnList::new(self.0.iter().map(|column| column.original.clone()))
    }

    /// Shadow column names, in order.
    pub fn shadow_names(&self) -> ColumnList {
        ColumnList::new(self.0.iter().map(|column| column.shadow.clone()))
    }
}
