/// Returns the `sql_mode` assignment used by every write session.
///
/// `NO_AUTO_VALUE_ON_ZERO` is always added so copied zero values in auto-increment columns are
/// kept. `STRICT_ALL_TABLES` is added unless `skip_strict_mode` is set, and the zero-date
/// restrictions are removed when `allow_zero_in_date` is set.
pub fn generate_sql_mode_query(skip_strict_mode: bool, allow_zero_in_date: bool) -> String {
    let modes = if skip_strict_mode {
        "NO_AUTO_VALUE_ON_ZERO"
    } else {
        "NO_AUTO_VALUE_ON_ZERO,STRICT_ALL_TABLES"
    };
    let concat = format!("CONCAT(@@session.sql_mode, ',{modes}')");

    if allow_zero_in_date {
        format!("sql_mode = REPLACE(REPLACE({concat}, 'NO_ZERO_IN_DATE', ''), 'NO_ZERO_DATE', '')")
    } else {
        format!("sql_mode = {concat}")
    }
}

/// Returns the session statement that prefixes every write group.
pub fn generate_session_query(skip_strict_mode: bool, allow_zero_in_date: bool) -> String {
    format!(
        "SET /* osc */ SESSION time_zone = '+00:00', {}",
        generate_sql_mode_query(skip_strict_mode, allow_zero_in_date)
    )
}
