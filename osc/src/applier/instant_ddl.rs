use std::num::NonZeroI32;

use osc_mysql::requires_version;
use osc_mysql::version::{MYSQL_8_0_12, MYSQL_8_0_29};

use crate::types::TableName;

/// Whether an alteration may be attempted as a metadata-only change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstantDdlEligibility {
    Eligible,
    Ineligible { reason: String },
}

impl InstantDdlEligibility {
    fn ineligible(reason: impl Into<String>) -> Self {
        InstantDdlEligibility::Ineligible {
            reason: reason.into(),
        }
    }
}

/// Builds the instant alteration of `table`.
pub fn instant_ddl_query(table: &TableName, alter: &str) -> String {
    format!(
        "ALTER /* osc */ TABLE {} {}, ALGORITHM=INSTANT",
        table.as_quoted_identifier(),
        alter.trim()
    )
}

/// Checks that every clause of `alter` is of a kind the server can apply instantly.
///
/// The check only filters out alterations that can never be instant, the server still has the
/// last word and may reject an eligible alteration.
pub fn instant_ddl_eligibility(
    alter: &str,
    server_version: Option<NonZeroI32>,
) -> InstantDdlEligibility {
    if !requires_version!(server_version, MYSQL_8_0_12) {
        return InstantDdlEligibility::ineligible("server does not support ALGORITHM=INSTANT");
    }

    let clauses = split_clauses(alter);
    if clauses.is_empty() {
        return InstantDdlEligibility::ineligible("empty alteration");
    }

    for clause in clauses {
        let Some(required) = required_version(&clause) else {
            return InstantDdlEligibility::ineligible(format!("unsupported clause `{clause}`"));
        };

        if !requires_version!(server_version, required) {
            return InstantDdlEligibility::ineligible(format!(
                "clause `{clause}` needs a newer server"
            ));
        }
    }

    InstantDdlEligibility::Eligible
}

/// Minimum server version applying `clause` instantly, `None` when it never is.
fn required_version(clause: &str) -> Option<i32> {
    let normalized = clause.to_ascii_uppercase();
    let words: Vec<&str> = normalized.split_whitespace().collect();

    const NOT_COLUMNS: &[&str] = &[
        "INDEX",
        "KEY",
        "UNIQUE",
        "PRIMARY",
        "FOREIGN",
        "CONSTRAINT",
        "FULLTEXT",
        "SPATIAL",
        "CHECK",
        "PARTITION",
    ];

    match words.as_slice() {
        ["ADD", "INDEX" | "KEY", ..] => Some(MYSQL_8_0_12),
        ["DROP", "INDEX" | "KEY", ..] => Some(MYSQL_8_0_12),
        ["RENAME", "INDEX" | "KEY", ..] => Some(MYSQL_8_0_12),
        ["ALTER", rest @ ..] => {
            let rest = if rest.first() == Some(&"COLUMN") {
                &rest[1..]
            } else {
                rest
            };
            match rest {
                [_, "SET", "DEFAULT", ..] | [_, "DROP", "DEFAULT"] => Some(MYSQL_8_0_12),
                _ => None,
            }
        }
        ["RENAME", "COLUMN", ..] => Some(MYSQL_8_0_29),
        ["ADD", first, ..] if !NOT_COLUMNS.contains(first) => {
            let positioned = words.contains(&"FIRST") || words.contains(&"AFTER");
            if positioned {
                Some(MYSQL_8_0_29)
            } else {
                Some(MYSQL_8_0_12)
            }
        }
        ["DROP", first, ..] if !NOT_COLUMNS.contains(first) => Some(MYSQL_8_0_29),
        _ => None,
    }
}

/// Splits an alteration on commas outside of parentheses and quotes.
fn split_clauses(alter: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in alter.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '(' => depth += 1,
                ')' => depth = depth.saturating_sub(1),
                ',' if depth == 0 => {
                    clauses.push(std::mem::take(&mut current));
                    continue;
                }
                _ => {}
            },
        }

        current.push(c);
    }
    clauses.push(current);

    clauses
        .into_iter()
        .map(|clause| clause.trim().to_string())
        .filter(|clause| !clause.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(v: i32) -> Option<NonZeroI32> {
        NonZeroI32::new(v)
    }

    #[test]
    fn builds_instant_ddl_statement() {
        let table = TableName::new("test", "mytable");

        assert_eq!(
            instant_ddl_query(&table, "ADD INDEX (foo)"),
            "ALTER /* osc */ TABLE `test`.`mytable` ADD INDEX (foo), ALGORITHM=INSTANT"
        );
    }

    #[test]
    fn splits_clauses_outside_parentheses() {
        assert_eq!(
            split_clauses("ADD INDEX idx (a, b), ADD COLUMN c VARCHAR(10) DEFAULT 'x,y'"),
            vec![
                "ADD INDEX idx (a, b)".to_string(),
                "ADD COLUMN c VARCHAR(10) DEFAULT 'x,y'".to_string(),
            ]
        );
    }

    #[test]
    fn accepts_metadata_only_changes() {
        let server = version(80035);

        for alter in [
            "ADD INDEX (foo)",
            "ADD COLUMN c INT",
            "add c int not null default 0",
            "ALTER COLUMN c SET DEFAULT 1",
            "DROP COLUMN c",
            "RENAME COLUMN a TO b",
            "ADD COLUMN c INT AFTER a, DROP KEY idx",
        ] {
            assert_eq!(
                instant_ddl_eligibility(alter, server),
                InstantDdlEligibility::Eligible,
                "{alter}"
            );
        }
    }

    #[test]
    fn rejects_table_rebuilds() {
        let server = version(80035);

        for alter in [
            "ENGINE=InnoDB",
            "ADD PRIMARY KEY (id)",
            "MODIFY COLUMN c BIGINT",
            "ADD COLUMN c INT, CONVERT TO CHARACTER SET utf8mb4",
        ] {
            assert!(
                matches!(
                    instant_ddl_eligibility(alter, server),
                    InstantDdlEligibility::Ineligible { .. }
                ),
                "{alter}"
            );
        }
    }

    #[test]
    fn considers_server_version() {
        assert!(matches!(
            instant_ddl_eligibility("ADD COLUMN c INT", version(50744)),
            InstantDdlEligibility::Ineligible { .. }
        ));
        assert_eq!(
            instant_ddl_eligibility("ADD COLUMN c INT", version(80012)),
            InstantDdlEligibility::Eligible
        );
        assert!(matches!(
            instant_ddl_eligibility("DROP COLUMN c", version(80020)),
            InstantDdlEligibility::Ineligible { .. }
        ));
        assert!(matches!(
            instant_ddl_eligibility("ADD COLUMN c INT", None),
            InstantDdlEligibility::Ineligible { .. }
        ));
    }
}
