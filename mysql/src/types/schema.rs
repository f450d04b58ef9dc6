use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum length of a MySQL identifier, in characters.
pub const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Quotes a single MySQL identifier with backticks.
///
/// Embedded backticks are doubled, following MySQL's identifier quoting rules.
pub fn quote_identifier(identifier: &str) -> String {
    format!("`{}`", identifier.replace('`', "``"))
}

/// A fully qualified MySQL table name consisting of a schema (database) and table name.
#[derive(Debug, Clone, Eq, PartialEq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName {
    /// The schema (database) name containing the table.
    pub schema: String,
    /// The name of the table within the schema.
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> TableName {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Returns a table name in the same schema with a different table name.
    pub fn sibling(&self, name: impl Into<String>) -> TableName {
        Self {
            schema: self.schema.clone(),
            name: name.into(),
        }
    }

    /// Returns the table name as a properly quoted MySQL identifier.
    pub fn as_quoted_identifier(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(&self.name)
        )
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{0}.{1}", self.schema, self.name))
    }
}

/// Represents the schema of a single column in a MySQL table.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    /// The name of the column.
    pub name: String,
    /// The MySQL data type of the column as declared, for example `bigint unsigned`.
    pub typ: String,
    /// Whether the column can contain NULL values.
    pub nullable: bool,
    /// Whether the column is a virtual or stored generated column.
    #[serde(default)]
    pub generated: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, typ: impl Into<String>, nullable: bool) -> ColumnSchema {
        Self {
            name: name.into(),
            typ: typ.into(),
            nullable,
            generated: false,
        }
    }

    /// Marks the column as generated. Generated columns are never written to directly.
    pub fn generated(mut self) -> ColumnSchema {
        self.generated = true;
        self
    }
}

/// Represents the complete schema of a MySQL table.
///
/// Columns are kept in their ordinal order, which is also the order of the values in a
/// binlog row image.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// The fully qualified name of the table.
    pub name: TableName,
    /// The schemas of all columns in the table.
    pub column_schemas: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(name: TableName, column_schemas: Vec<ColumnSchema>) -> Self {
        Self {
            name,
            column_schemas,
        }
    }

    /// Returns the number of columns in the table.
    pub fn num_columns(&self) -> usize {
        self.column_schemas.len()
    }

    /// Returns the ordinal index of the column with the given name.
    ///
    /// MySQL column names are case-insensitive, so is the lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_schemas
            .iter()
            .position(|column| column.name.eq_ignore_ascii_case(name))
    }

    /// Returns the schema of the column with the given name.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.column_index(name).map(|index| &self.column_schemas[index])
    }

    /// Returns the column names in ordinal order.
    pub fn column_names(&self) -> Vec<String> {
        self.column_schemas
            .iter()
            .map(|column| column.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_table_names_with_backticks() {
        let table_name = TableName::new("test", "mytable");
        assert_eq!(table_name.as_quoted_identifier(), "`test`.`mytable`");
        assert_eq!(table_name.to_string(), "test.mytable");
    }

    #[test]
    fn escapes_embedded_backticks() {
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn column_lookup_is_case_insensitive() {
        let schema = TableSchema::new(
            TableName::new("test", "t"),
            vec![
                ColumnSchema::new("id", "bigint", false),
                ColumnSchema::new("Name", "varchar(255)", true),
            ],
        );

        assert_eq!(schema.column_index("name"), Some(1));
        assert_eq!(schema.column("ID").map(|c| c.typ.as_str()), Some("bigint"));
        assert_eq!(schema.column_index("missing"), None);
    }
}
