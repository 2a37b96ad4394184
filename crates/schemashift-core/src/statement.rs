//! Statement executor boundary and minimal SQL shape extraction.
//!
//! The datastore is an opaque collaborator: the engine hands it SQL text and
//! gets back rows or an error. The only SQL the engine ever inspects is the
//! `UPDATE <table> SET ... [WHERE ...]` shape that makes a migrate step
//! eligible for chunked backfill.

use thiserror::Error;

/// Rows returned by a statement execution. Statements that produce no result
/// set (DDL, updates) return an empty set.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    /// Rows of stringly column values.
    pub rows: Vec<Vec<String>>,
}

impl ResultSet {
    /// An empty result set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether the result set has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of the first column, one per row. Rows without columns are
    /// skipped.
    pub fn first_column(&self) -> Vec<String> {
        self.rows
            .iter()
            .filter_map(|row| row.first().cloned())
            .collect()
    }
}

/// Error returned by a statement executor.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct StatementError {
    /// Human-readable failure description.
    pub message: String,
}

impl StatementError {
    /// Create a statement error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Capability to execute one SQL statement against the host datastore.
///
/// The engine never pools connections, manages transactions across steps, or
/// interprets results beyond first-column identifiers.
pub trait StatementExecutor {
    /// Execute a SQL statement, returning its rows or an error.
    fn execute(&self, sql: &str) -> Result<ResultSet, StatementError>;
}

/// The parts of an `UPDATE <table> SET ... [WHERE ...]` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkableUpdate {
    /// Target table name.
    pub table: String,
    /// Text of the SET clause (assignments only).
    pub assignments: String,
    /// Text of the WHERE clause, if present.
    pub filter: Option<String>,
}

/// Extract the chunkable-update shape from a statement, if it matches.
///
/// Matching is case-insensitive and tolerates a trailing semicolon. Anything
/// that does not fit the shape returns `None` and executes as a single
/// statement instead.
pub fn parse_chunkable_update(sql: &str) -> Option<ChunkableUpdate> {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();

    let rest = strip_keyword(trimmed, "update")?;
    let (table, rest) = take_token(rest)?;
    let body = strip_keyword(rest, "set")?;

    let (assignments, filter) = match find_where_keyword(body)? {
        Some(pos) => {
            let filter = body[pos + "where".len()..].trim();
            if filter.is_empty() {
                return None;
            }
            (body[..pos].trim(), Some(filter.to_string()))
        }
        None => (body.trim(), None),
    };

    if assignments.is_empty() {
        return None;
    }

    Some(ChunkableUpdate {
        table: table.to_string(),
        assignments: assignments.to_string(),
        filter,
    })
}

/// Locate a standalone `WHERE` keyword in the SET body.
///
/// The outer `None` means the statement is not chunkable (the keyword opens
/// the body or dangles at its end); the inner option is the keyword position,
/// absent when the statement has no WHERE clause.
#[allow(clippy::option_option)]
fn find_where_keyword(body: &str) -> Option<Option<usize>> {
    let lower = body.to_ascii_lowercase();
    let bytes = lower.as_bytes();
    let mut search = 0;

    while let Some(rel) = lower[search..].find("where") {
        let pos = search + rel;
        let end = pos + "where".len();
        let bounded_before = pos == 0 || bytes[pos - 1].is_ascii_whitespace();
        let bounded_after = end == bytes.len() || bytes[end].is_ascii_whitespace();

        if bounded_before && bounded_after {
            // A keyword with no assignments before it or no filter after it
            // makes the statement malformed for chunking purposes.
            if pos == 0 || end == bytes.len() {
                return None;
            }
            return Some(Some(pos));
        }
        search = end;
    }

    Some(None)
}

/// Strip a leading keyword followed by whitespace, case-insensitively.
fn strip_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let input = input.trim_start();
    if input.len() <= keyword.len() {
        return None;
    }
    let (head, rest) = input.split_at(keyword.len());
    if head.eq_ignore_ascii_case(keyword) && rest.starts_with(|c: char| c.is_whitespace()) {
        Some(rest.trim_start())
    } else {
        None
    }
}

/// Split off the next whitespace-delimited token.
fn take_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    let end = input.find(char::is_whitespace)?;
    let (token, rest) = input.split_at(end);
    if token.is_empty() {
        None
    } else {
        Some((token, rest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update_with_filter() {
        let parsed =
            parse_chunkable_update("UPDATE users SET email_norm = lower(email) WHERE email_norm IS NULL")
                .unwrap();

        assert_eq!(parsed.table, "users");
        assert_eq!(parsed.assignments, "email_norm = lower(email)");
        assert_eq!(parsed.filter.as_deref(), Some("email_norm IS NULL"));
    }

    #[test]
    fn test_parse_update_without_filter() {
        let parsed = parse_chunkable_update("update t set a = 1;").unwrap();

        assert_eq!(parsed.table, "t");
        assert_eq!(parsed.assignments, "a = 1");
        assert!(parsed.filter.is_none());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let parsed = parse_chunkable_update("Update T Set a = 1 Where b = 2").unwrap();

        assert_eq!(parsed.table, "T");
        assert_eq!(parsed.filter.as_deref(), Some("b = 2"));
    }

    #[test]
    fn test_parse_rejects_non_update() {
        assert!(parse_chunkable_update("SELECT * FROM t").is_none());
        assert!(parse_chunkable_update("DELETE FROM t WHERE a = 1").is_none());
        assert!(parse_chunkable_update("ALTER TABLE t ADD col TEXT").is_none());
    }

    #[test]
    fn test_parse_rejects_malformed_update() {
        // Missing SET clause.
        assert!(parse_chunkable_update("UPDATE t").is_none());
        // Empty assignments.
        assert!(parse_chunkable_update("UPDATE t SET WHERE a = 1").is_none());
        // Dangling WHERE.
        assert!(parse_chunkable_update("UPDATE t SET a = 1 WHERE ").is_none());
    }

    #[test]
    fn test_first_column() {
        let rs = ResultSet {
            rows: vec![
                vec!["1".to_string(), "x".to_string()],
                vec!["2".to_string()],
            ],
        };
        assert_eq!(rs.first_column(), vec!["1".to_string(), "2".to_string()]);
        assert!(ResultSet::empty().first_column().is_empty());
    }
}
