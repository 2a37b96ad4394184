//! SQLite adapter for the statement executor boundary.

use rusqlite::types::Value;
use rusqlite::Connection;
use schemashift_core::{ResultSet, StatementError, StatementExecutor};
use std::path::Path;

/// Statement executor backed by a single SQLite connection.
pub struct SqliteExecutor {
    conn: Connection,
}

impl SqliteExecutor {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StatementError> {
        let conn = Connection::open(path)
            .map_err(|e| StatementError::new(format!("failed to open {}: {}", path.display(), e)))?;
        Ok(Self { conn })
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    fn query(&self, sql: &str) -> Result<ResultSet, rusqlite::Error> {
        let mut stmt = self.conn.prepare(sql)?;
        let column_count = stmt.column_count();
        let mut rows = stmt.query([])?;

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value: Value = row.get(idx)?;
                record.push(value_to_string(value));
            }
            out.push(record);
        }
        Ok(ResultSet { rows: out })
    }
}

impl StatementExecutor for SqliteExecutor {
    fn execute(&self, sql: &str) -> Result<ResultSet, StatementError> {
        let result = if is_query(sql) {
            self.query(sql)
        } else {
            self.conn.execute_batch(sql).map(|_| ResultSet::empty())
        };
        result.map_err(|e| StatementError::new(e.to_string()))
    }
}

fn is_query(sql: &str) -> bool {
    let head: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    head.eq_ignore_ascii_case("select")
}

fn value_to_string(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Integer(i) => i.to_string(),
        Value::Real(r) => r.to_string(),
        Value::Text(t) => t,
        Value::Blob(b) => String::from_utf8_lossy(&b).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn in_memory() -> SqliteExecutor {
        SqliteExecutor::from_connection(Connection::open_in_memory().unwrap())
    }

    #[test]
    fn test_ddl_and_select() {
        let exec = in_memory();

        exec.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, col TEXT)")
            .unwrap();
        exec.execute("INSERT INTO t (id, col) VALUES (1, NULL), (2, 'x')")
            .unwrap();

        let rows = exec
            .execute("SELECT id FROM t WHERE (col IS NULL) ORDER BY id ASC LIMIT 10")
            .unwrap();
        assert_eq!(rows.first_column(), vec!["1".to_string()]);
    }

    #[test]
    fn test_update_restricted_to_ids() {
        let exec = in_memory();

        exec.execute("CREATE TABLE t (id INTEGER PRIMARY KEY, col TEXT)")
            .unwrap();
        exec.execute("INSERT INTO t (id) VALUES (1), (2), (3)")
            .unwrap();
        exec.execute("UPDATE t SET col = 'filled' WHERE id IN ('1', '2')")
            .unwrap();

        let rows = exec
            .execute("SELECT id FROM t WHERE (col IS NULL) ORDER BY id ASC LIMIT 10")
            .unwrap();
        assert_eq!(rows.first_column(), vec!["3".to_string()]);
    }

    #[test]
    fn test_error_propagates() {
        let exec = in_memory();
        let err = exec.execute("SELECT * FROM missing_table").unwrap_err();
        assert!(err.to_string().contains("missing_table"));
    }
}
