//! SQL helper functions.
//!
//! `SQLite` binds parameters only for values, never for identifiers, so table
//! names are spliced into statement text. Every name goes through
//! [`sanitize_identifier`] first and is then double-quoted by the builders
//! below.

/// Characters that are replaced by `_` in table names (whitespace is too).
pub const IDENTIFIER_DENYLIST: &[char] = &[
    ';', '\'', '"', '|', '(', ')', '{', '}', '[', ']', '\\', '/', ':', '<', '>', '*', '^', '%',
    '$', '#', '=', '-', '`', '~',
];

/// Converts a caller-supplied map name into a table identifier.
///
/// Whitespace and every character in [`IDENTIFIER_DENYLIST`] become `_`.
///
/// # Security
///
/// This is a denylist, not a parser-backed allowlist. It removes quoting and
/// statement-breaking characters, which is what makes splicing safe, but it
/// does not turn every input into a valid name: an empty result, a name that
/// starts with a digit, or non-ASCII text may still be rejected by `SQLite`
/// (the error surfaces from table creation). Distinct inputs can sanitize to
/// the same identifier and then share a table.
///
/// # Examples
///
/// ```
/// use sqlmap::storage::sqlite::sanitize_identifier;
///
/// assert_eq!(sanitize_identifier("users"), "users");
/// assert_eq!(sanitize_identifier("(DROP TABLE test)"), "_DROP_TABLE_test_");
/// assert_eq!(sanitize_identifier("a; DROP TABLE b;--"), "a__DROP_TABLE_b___");
/// ```
#[must_use]
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_whitespace() || IDENTIFIER_DENYLIST.contains(&c) {
                '_'
            } else {
                c
            }
        })
        .collect()
}

/// `CREATE TABLE` for a map: text primary key, JSON text value, no rowid.
#[must_use]
pub fn create_table(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" \
         (id TEXT PRIMARY KEY UNIQUE, value TEXT) WITHOUT ROWID"
    )
}

/// Row count.
#[must_use]
pub fn count(table: &str) -> String {
    format!("SELECT COUNT(id) FROM \"{table}\"")
}

/// Existence probe that never reads the value column.
#[must_use]
pub fn exists(table: &str) -> String {
    format!("SELECT EXISTS(SELECT 1 FROM \"{table}\" WHERE id = ?1 LIMIT 1)")
}

/// Value lookup by id.
#[must_use]
pub fn select_value(table: &str) -> String {
    format!("SELECT value FROM \"{table}\" WHERE id = ?1")
}

/// Insert, or overwrite the value on primary key conflict.
///
/// The value passes through `json()` so malformed text is rejected by the
/// engine instead of being stored.
#[must_use]
pub fn upsert(table: &str) -> String {
    format!(
        "INSERT INTO \"{table}\" (id, value) VALUES (?1, json(?2)) \
         ON CONFLICT(id) DO UPDATE SET value = excluded.value"
    )
}

/// Delete by id.
#[must_use]
pub fn delete(table: &str) -> String {
    format!("DELETE FROM \"{table}\" WHERE id = ?1")
}

/// Delete every row, keeping the schema.
#[must_use]
pub fn clear(table: &str) -> String {
    format!("DELETE FROM \"{table}\"")
}

/// One page of an iteration in primary key order.
///
/// With `after_cursor` the statement takes the last seen id as `?1` and the
/// page size as `?2`; without it the page size is `?1`.
#[must_use]
pub fn page(table: &str, with_values: bool, after_cursor: bool) -> String {
    let columns = if with_values { "id, value" } else { "id" };
    if after_cursor {
        format!("SELECT {columns} FROM \"{table}\" WHERE id > ?1 ORDER BY id LIMIT ?2")
    } else {
        format!("SELECT {columns} FROM \"{table}\" ORDER BY id LIMIT ?1")
    }
}
