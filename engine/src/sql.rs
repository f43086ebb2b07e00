//! Lightweight statement inspection: classification by leading keyword and
//! `$N` placeholder translation. Neither parses SQL; both only need to skip
//! whitespace, comments and quoted text correctly.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A statement together with its positional parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>, params: impl Into<Vec<Value>>) -> Self {
        Self {
            sql: sql.into(),
            params: params.into(),
        }
    }

    /// Statement without parameters.
    pub fn bare(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    /// Classification of this statement's SQL.
    pub fn kind(&self) -> StatementKind {
        classify(&self.sql)
    }
}

/// What a statement may do to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Cannot change data (`SELECT`, `VALUES`, `EXPLAIN`, bare `PRAGMA x`)
    Read,
    /// Transaction control (`BEGIN`, `COMMIT`, `ROLLBACK`, `SAVEPOINT`, ...)
    Control,
    /// Anything else
    Write,
}

impl StatementKind {
    /// Whether running this statement must re-evaluate live queries.
    pub fn invalidates(&self) -> bool {
        !matches!(self, StatementKind::Read)
    }
}

/// Classify a statement by its leading keyword.
pub fn classify(sql: &str) -> StatementKind {
    let body = skip_trivia(sql);

    match keyword(sql).as_str() {
        "SELECT" | "VALUES" | "EXPLAIN" => StatementKind::Read,
        "PRAGMA" => {
            // `PRAGMA x = y` and `PRAGMA x(y)` set state
            if body.contains('=') || body.contains('(') {
                StatementKind::Write
            } else {
                StatementKind::Read
            }
        }
        "WITH" => {
            if contains_keyword(body, &["INSERT", "UPDATE", "DELETE", "REPLACE"]) {
                StatementKind::Write
            } else {
                StatementKind::Read
            }
        }
        "BEGIN" | "COMMIT" | "END" | "ROLLBACK" | "SAVEPOINT" | "RELEASE" => {
            StatementKind::Control
        }
        _ => StatementKind::Write,
    }
}

/// Leading keyword of a statement, uppercased.
pub(crate) fn keyword(sql: &str) -> String {
    leading_keyword(skip_trivia(sql)).to_ascii_uppercase()
}

/// Rewrite `$1, $2, ...` into SQLite's `?1, ?2, ...`.
///
/// Placeholders inside string literals, quoted identifiers and comments are
/// left alone.
pub fn translate_placeholders(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    let mut copied = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(bytes, i, quote);
            }
            b'[' => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b']')
                    .map_or(bytes.len(), |end| i + end + 1);
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map_or(bytes.len(), |end| i + end + 1);
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = find(bytes, i + 2, b"*/").map_or(bytes.len(), |end| end + 2);
            }
            b'$' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                out.push_str(&sql[copied..i]);
                out.push('?');
                i += 1;
                copied = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
            }
            _ => i += 1,
        }
    }

    out.push_str(&sql[copied..]);
    out
}

/// Whether a query combines several `SELECT`s with `UNION`, `INTERSECT`
/// or `EXCEPT`. SQLite reports the first arm's declared column types for
/// such queries, so they do not describe every row.
pub fn is_compound(sql: &str) -> bool {
    contains_keyword(&mask_literals(sql), &["UNION", "INTERSECT", "EXCEPT"])
}

/// `sql` with quoted text and comments blanked out.
fn mask_literals(sql: &str) -> String {
    let bytes = sql.as_bytes();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;
    let mut copied = 0;

    while i < bytes.len() {
        let end = match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => skip_quoted(bytes, i, quote),
            b'[' => bytes[i..]
                .iter()
                .position(|&b| b == b']')
                .map_or(bytes.len(), |end| i + end + 1),
            b'-' if bytes.get(i + 1) == Some(&b'-') => bytes[i..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(bytes.len(), |end| i + end + 1),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                find(bytes, i + 2, b"*/").map_or(bytes.len(), |end| end + 2)
            }
            _ => {
                i += 1;
                continue;
            }
        };
        out.push_str(&sql[copied..i]);
        out.push(' ');
        i = end;
        copied = end;
    }

    out.push_str(&sql[copied..]);
    out
}

fn skip_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            // doubled quote is an escaped quote
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn find(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| from + p)
}

fn skip_trivia(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        rest = rest.trim_start();
        if let Some(comment) = rest.strip_prefix("--") {
            rest = comment.find('\n').map_or("", |end| &comment[end + 1..]);
        } else if let Some(comment) = rest.strip_prefix("/*") {
            rest = comment.find("*/").map_or("", |end| &comment[end + 2..]);
        } else {
            return rest;
        }
    }
}

fn leading_keyword(sql: &str) -> &str {
    let end = sql
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(sql.len());
    &sql[..end]
}

fn contains_keyword(sql: &str, keywords: &[&str]) -> bool {
    sql.split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .any(|word| keywords.iter().any(|k| word.eq_ignore_ascii_case(k)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_reads() {
        assert_eq!(classify("SELECT * FROM users"), StatementKind::Read);
        assert_eq!(classify("  select 1"), StatementKind::Read);
        assert_eq!(classify("VALUES (1), (2)"), StatementKind::Read);
        assert_eq!(classify("PRAGMA table_info"), StatementKind::Read);
        assert_eq!(
            classify("-- leading comment\n/* block */ SELECT 1"),
            StatementKind::Read
        );
        assert_eq!(
            classify("WITH t AS (SELECT 1) SELECT * FROM t"),
            StatementKind::Read
        );
    }

    #[test]
    fn classifies_writes_and_control() {
        assert_eq!(classify("INSERT INTO t VALUES (1)"), StatementKind::Write);
        assert_eq!(classify("update t set a = 1"), StatementKind::Write);
        assert_eq!(classify("CREATE TABLE t (a)"), StatementKind::Write);
        assert_eq!(classify("PRAGMA user_version = 3"), StatementKind::Write);
        assert_eq!(
            classify("WITH t AS (SELECT 1) INSERT INTO x SELECT * FROM t"),
            StatementKind::Write
        );
        assert_eq!(classify("BEGIN"), StatementKind::Control);
        assert_eq!(classify("commit;"), StatementKind::Control);
        assert_eq!(keyword("/* x */ rollback"), "ROLLBACK");
        assert!(StatementKind::Control.invalidates());
        assert!(!StatementKind::Read.invalidates());
    }

    #[test]
    fn translates_placeholders() {
        assert_eq!(
            translate_placeholders("SELECT * FROM t WHERE a = $1 AND b = $12"),
            "SELECT * FROM t WHERE a = ?1 AND b = ?12"
        );
        assert_eq!(translate_placeholders("SELECT ?1"), "SELECT ?1");
    }

    #[test]
    fn leaves_quoted_placeholders_alone() {
        assert_eq!(
            translate_placeholders("SELECT '$1', \"$2\", $3 -- $4\n, /* $5 */ $6"),
            "SELECT '$1', \"$2\", ?3 -- $4\n, /* $5 */ ?6"
        );
        assert_eq!(
            translate_placeholders("SELECT 'it''s $1', $2"),
            "SELECT 'it''s $1', ?2"
        );
        assert_eq!(translate_placeholders("SELECT $price"), "SELECT $price");
    }

    #[test]
    fn detects_compound_selects() {
        assert!(is_compound("SELECT name FROM users UNION ALL SELECT 1"));
        assert!(is_compound("select a from t intersect select b from u"));
        assert!(is_compound("SELECT 1 EXCEPT SELECT 2"));
        assert!(!is_compound("SELECT 'union' FROM t"));
        assert!(!is_compound("SELECT \"except\" FROM t -- union\n"));
        assert!(!is_compound("SELECT reunion FROM t /* UNION */"));
    }

    #[test]
    fn statement_json_shape() {
        let statement: Statement =
            serde_json::from_str(r#"{"sql": "SELECT $1", "params": [1, "a", null]}"#).unwrap();
        assert_eq!(
            statement,
            Statement::new(
                "SELECT $1",
                vec![Value::Integer(1), Value::Text("a".into()), Value::Null]
            )
        );
        assert_eq!(statement.kind(), StatementKind::Read);

        let bare: Statement = serde_json::from_str(r#"{"sql": "DELETE FROM t"}"#).unwrap();
        assert!(bare.params.is_empty());
    }
}
