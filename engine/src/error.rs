//! Error types for the Tandem engine.

use crate::SnapshotId;
use thiserror::Error;

/// All possible errors from the Tandem engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Store errors
    #[error("durable store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("export inconsistent: {0}")]
    ExportInconsistent(String),

    #[error("replica build failed: {source}")]
    ReplicaBuildFailed { source: Box<Error> },

    #[error("replica load failed: {0}")]
    ReplicaLoadFailed(String),

    #[error("invalid export: {0}")]
    InvalidExport(String),

    // Statement errors
    #[error("constraint violation in `{statement}`: {message}")]
    ConstraintViolation { statement: String, message: String },

    #[error("sql error in `{statement}`: {message}")]
    Sql { statement: String, message: String },

    #[error("type mismatch for column '{column}': expected {expected}, got {got}")]
    TypeMismatch {
        column: String,
        expected: String,
        got: String,
    },

    #[error("column not found: {0}")]
    ColumnNotFound(String),

    // Snapshot and clock errors
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(SnapshotId),

    #[error("clock regression: logical timestamp {0} is negative")]
    ClockRegression(i64),
}

impl Error {
    /// Classify an error raised by SQLite while running `statement`.
    pub(crate) fn from_sqlite(err: rusqlite::Error, statement: &str) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, message)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::ConstraintViolation {
                    statement: statement.to_string(),
                    message: message.unwrap_or_else(|| code.to_string()),
                }
            }
            other => Error::Sql {
                statement: statement.to_string(),
                message: other.to_string(),
            },
        }
    }

    /// Wrap an export failure that prevented a replica from being built.
    pub(crate) fn replica_build(source: Error) -> Self {
        Error::ReplicaBuildFailed {
            source: Box::new(source),
        }
    }

    /// True when retrying the failed operation cannot help and a fresh export
    /// must be obtained first.
    pub fn needs_fresh_export(&self) -> bool {
        matches!(self, Error::ReplicaLoadFailed(_) | Error::InvalidExport(_))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::StoreUnavailable("worker stopped".into());
        assert_eq!(err.to_string(), "durable store unavailable: worker stopped");

        let err = Error::ClockRegression(-3);
        assert_eq!(
            err.to_string(),
            "clock regression: logical timestamp -3 is negative"
        );

        let err = Error::TypeMismatch {
            column: "age".into(),
            expected: "INTEGER".into(),
            got: "TEXT".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for column 'age': expected INTEGER, got TEXT"
        );
    }

    #[test]
    fn build_failure_keeps_cause() {
        let err = Error::replica_build(Error::StoreUnavailable("gone".into()));
        assert_eq!(
            err.to_string(),
            "replica build failed: durable store unavailable: gone"
        );
        match err {
            Error::ReplicaBuildFailed { source } => {
                assert!(matches!(*source, Error::StoreUnavailable(_)))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn constraint_failures_are_classified() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, email TEXT UNIQUE)")
            .unwrap();
        conn.execute("INSERT INTO t (email) VALUES ('a@example.com')", [])
            .unwrap();
        let sql = "INSERT INTO t (email) VALUES ('a@example.com')";
        let err = conn.execute(sql, []).unwrap_err();

        match Error::from_sqlite(err, sql) {
            Error::ConstraintViolation { statement, message } => {
                assert_eq!(statement, sql);
                assert!(message.contains("UNIQUE"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn only_load_failures_need_fresh_export() {
        assert!(Error::ReplicaLoadFailed("corrupt".into()).needs_fresh_export());
        assert!(Error::InvalidExport("checksum".into()).needs_fresh_export());
        assert!(!Error::StoreUnavailable("down".into()).needs_fresh_export());
    }
}
