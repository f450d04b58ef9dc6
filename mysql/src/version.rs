//! MySQL version constants and utilities.
//!
//! Version numbers follow MySQL's internal format: `MAJOR * 10000 + MINOR * 100 + PATCH`.

use std::num::NonZeroI32;

/// First release with `ALGORITHM=INSTANT` (trailing `ADD COLUMN`).
pub const MYSQL_8_0_12: i32 = 80012;
/// `LOCK TABLES` sessions may `RENAME TABLE` the locked tables.
pub const MYSQL_8_0_13: i32 = 80013;
/// Instant `DROP COLUMN` and `ADD COLUMN` at any position.
pub const MYSQL_8_0_29: i32 = 80029;

/// Returns [`true`] if the server version meets or exceeds the required version.
///
/// [`None`] server versions never meet a requirement.
pub fn meets_version(server_version: Option<NonZeroI32>, required_version: i32) -> bool {
    server_version.is_some_and(|v| v.get() >= required_version)
}

/// Checks if the server version meets or exceeds the required version.
#[macro_export]
macro_rules! requires_version {
    ($server_version:expr, $required:expr) => {
        $crate::version::meets_version($server_version, $required)
    };
}

/// Checks if the server version is below the specified version.
#[macro_export]
macro_rules! below_version {
    ($server_version:expr, $required:expr) => {
        !$crate::version::meets_version($server_version, $required)
    };
}

/// Extracts the MySQL server version from a version string.
///
/// Parses strings like "8.0.35" or "5.7.44-log" and returns the numeric form, for example
/// 80035 for 8.0.35. Returns `None` if the string cannot be parsed or results in zero.
pub fn extract_server_version(server_version_str: impl AsRef<str>) -> Option<NonZeroI32> {
    let version_part = server_version_str
        .as_ref()
        .split_whitespace()
        .next()
        .unwrap_or("0.0.0");

    let version_part = version_part.split('-').next().unwrap_or("0.0.0");

    let mut components = version_part
        .split('.')
        .map(|v| v.parse::<i32>().unwrap_or(0));

    let major = components.next().unwrap_or(0);
    let minor = components.next().unwrap_or(0);
    let patch = components.next().unwrap_or(0);

    NonZeroI32::new(major * 10000 + minor * 100 + patch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meets_version_with_some() {
        let version = NonZeroI32::new(80035);
        assert!(meets_version(version, MYSQL_8_0_13));
        assert!(meets_version(version, MYSQL_8_0_29));
        assert!(!meets_version(version, 80100));
    }

    #[test]
    fn test_meets_version_with_none() {
        assert!(!meets_version(None, MYSQL_8_0_12));
        assert!(!meets_version(None, MYSQL_8_0_13));
    }

    #[test]
    fn test_version_macros() {
        let version = NonZeroI32::new(80012);
        assert!(requires_version!(version, MYSQL_8_0_12));
        assert!(below_version!(version, MYSQL_8_0_13));
        assert!(!below_version!(NonZeroI32::new(80013), MYSQL_8_0_13));
    }

    #[test]
    fn test_extract_server_version_basic_versions() {
        assert_eq!(extract_server_version("8.0.35"), NonZeroI32::new(80035));
        assert_eq!(extract_server_version("5.7.44"), NonZeroI32::new(50744));
        assert_eq!(extract_server_version("8.4.0"), NonZeroI32::new(80400));
    }

    #[test]
    fn test_extract_server_version_with_suffixes() {
        assert_eq!(extract_server_version("8.0.35-log"), NonZeroI32::new(80035));
        assert_eq!(
            extract_server_version("5.7.44-0ubuntu0.18.04.1"),
            NonZeroI32::new(50744)
        );
    }

    #[test]
    fn test_extract_server_version_invalid_inputs() {
        assert_eq!(extract_server_version(""), None);
        assert_eq!(extract_server_version("invalid"), None);
        assert_eq!(extract_server_version("   "), None);
        assert_eq!(extract_server_version("0.0.0"), None);
    }

    #[test]
    fn test_extract_server_version_whitespace_handling() {
        assert_eq!(extract_server_version("  8.0.35  "), NonZeroI32::new(80035));
        assert_eq!(extract_server_version("8.0.35\n"), NonZeroI32::new(80035));
    }
}
