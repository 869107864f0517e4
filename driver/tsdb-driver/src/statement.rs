///
/// Statement classification and client-side argument interpolation.
///
/// A handful of session-level statements never reach the SQL engine as-is:
/// `USE db` only changes the connection's current database, and the
/// database-level DDL (`CREATE/DROP DATABASE`, `SHOW DATABASES`,
/// `SHOW TABLES`) is answered by the store itself.
///

use crate::error::{DriverError, Result};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementKind {
    Use(String),
    CreateDatabase { name: String, if_not_exists: bool },
    DropDatabase { name: String, if_exists: bool },
    ShowDatabases,
    ShowTables,
    Other,
}

fn unquote(ident: &str) -> String {
    ident
        .trim_matches(|c| c == '`' || c == '"' || c == '\'' || c == '[' || c == ']')
        .to_string()
}

impl StatementKind {
    pub fn classify(sql: &str) -> Self {
        let trimmed = sql.trim().trim_end_matches(';').trim();
        let words: Vec<String> = trimmed.split_whitespace().map(str::to_ascii_uppercase).collect();
        let raw: Vec<&str> = trimmed.split_whitespace().collect();
        let w: Vec<&str> = words.iter().map(String::as_str).collect();

        match w.as_slice() {
            ["USE", _] => StatementKind::Use(unquote(raw[1])),
            ["SHOW", "DATABASES"] => StatementKind::ShowDatabases,
            ["SHOW", "TABLES"] => StatementKind::ShowTables,
            ["CREATE", "DATABASE", "IF", "NOT", "EXISTS", _] => StatementKind::CreateDatabase {
                name: unquote(raw[5]),
                if_not_exists: true,
            },
            ["CREATE", "DATABASE", _, "IF", "NOT", "EXISTS"] => StatementKind::CreateDatabase {
                name: unquote(raw[2]),
                if_not_exists: true,
            },
            ["CREATE", "DATABASE", _] => StatementKind::CreateDatabase {
                name: unquote(raw[2]),
                if_not_exists: false,
            },
            ["DROP", "DATABASE", "IF", "EXISTS", _] => StatementKind::DropDatabase {
                name: unquote(raw[4]),
                if_exists: true,
            },
            ["DROP", "DATABASE", _] => StatementKind::DropDatabase {
                name: unquote(raw[2]),
                if_exists: false,
            },
            _ => StatementKind::Other,
        }
    }

    /// Whether `sql` adds rows, and so may set a last insert id.
    pub fn is_insert(sql: &str) -> bool {
        let first = sql.split_whitespace().next().unwrap_or("");
        first.eq_ignore_ascii_case("INSERT") || first.eq_ignore_ascii_case("REPLACE")
    }
}

/// Renders a value as a SQL literal.
pub fn sql_literal(value: &Value) -> Result<String> {
    let literal = match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => (if *b { "true" } else { "false" }).to_string(),
        Value::Int(i) => i.to_string(),
        Value::Int64(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => f.to_string(),
        Value::Double(f) if f.is_finite() => f.to_string(),
        Value::Float(_) | Value::Double(_) => {
            return Err(DriverError::InvalidArgs(format!("non-finite number {}", value)));
        }
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Datetime(_) => format!("'{}'", value),
        Value::Binary(bytes) => {
            let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            format!("X'{}'", hex)
        }
    };
    Ok(literal)
}

/// Byte offsets of `?` placeholders outside quoted literals and identifiers.
fn placeholders(sql: &str) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut quote: Option<char> = None;
    for (i, c) in sql.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '?' => positions.push(i),
                _ => {}
            },
        }
    }
    positions
}

/// Substitutes each `?` with the matching argument rendered as a literal.
pub fn interpolate(sql: &str, args: &[Value]) -> Result<String> {
    let positions = placeholders(sql);
    if positions.len() != args.len() {
        return Err(DriverError::InvalidArgs(format!(
            "statement has {} placeholders but {} arguments were given",
            positions.len(),
            args.len()
        )));
    }
    let mut out = String::with_capacity(sql.len() + args.len() * 8);
    let mut last = 0;
    for (pos, arg) in positions.into_iter().zip(args) {
        out.push_str(&sql[last..pos]);
        out.push_str(&sql_literal(arg)?);
        last = pos + 1;
    }
    out.push_str(&sql[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_session_statements() {
        assert_eq!(StatementKind::classify("use test_db;"), StatementKind::Use("test_db".to_string()));
        assert_eq!(StatementKind::classify("USE `Metrics`"), StatementKind::Use("Metrics".to_string()));
        assert_eq!(StatementKind::classify("SHOW DATABASES;"), StatementKind::ShowDatabases);
        assert_eq!(StatementKind::classify("show tables"), StatementKind::ShowTables);
        assert_eq!(StatementKind::classify("SELECT 1"), StatementKind::Other);
        assert_eq!(StatementKind::classify("use"), StatementKind::Other);
        assert!(StatementKind::is_insert("  insert INTO t VALUES (1)"));
        assert!(StatementKind::is_insert("REPLACE INTO t VALUES (1)"));
        assert!(!StatementKind::is_insert("UPDATE t SET v = 1"));
        assert!(!StatementKind::is_insert(""));
    }

    #[test]
    fn test_classify_database_ddl() {
        assert_eq!(
            StatementKind::classify("create database test_db if not exists;"),
            StatementKind::CreateDatabase { name: "test_db".to_string(), if_not_exists: true }
        );
        assert_eq!(
            StatementKind::classify("CREATE DATABASE IF NOT EXISTS ops"),
            StatementKind::CreateDatabase { name: "ops".to_string(), if_not_exists: true }
        );
        assert_eq!(
            StatementKind::classify("create database ops"),
            StatementKind::CreateDatabase { name: "ops".to_string(), if_not_exists: false }
        );
        assert_eq!(
            StatementKind::classify("DROP DATABASE IF EXISTS ops;"),
            StatementKind::DropDatabase { name: "ops".to_string(), if_exists: true }
        );
        assert_eq!(StatementKind::classify("create table t(a int)"), StatementKind::Other);
    }

    #[test]
    fn test_interpolate() {
        let sql = interpolate(
            "insert into t(is_working, age, name, note) values(?, ?, ?, ?)",
            &[Value::Bool(false), Value::Int64(12), Value::from("O'Brien"), Value::Null],
        )
        .unwrap();
        assert_eq!(sql, "insert into t(is_working, age, name, note) values(false, 12, 'O''Brien', NULL)");
    }

    #[test]
    fn test_interpolate_skips_quoted_marks() {
        let sql = interpolate("select '?' as q, ? as a", &[Value::Int(1)]).unwrap();
        assert_eq!(sql, "select '?' as q, 1 as a");
    }

    #[test]
    fn test_interpolate_count_mismatch() {
        assert!(matches!(interpolate("select ?", &[]), Err(DriverError::InvalidArgs(_))));
        assert!(interpolate("select 1", &[Value::Int(1)]).is_err());
    }

    #[test]
    fn test_literals() {
        assert_eq!(sql_literal(&Value::Binary(vec![0xde, 0xad])).unwrap(), "X'DEAD'");
        assert_eq!(sql_literal(&Value::Datetime(0)).unwrap(), "'1970-01-01 00:00:00.000'");
        assert!(sql_literal(&Value::Double(f64::NAN)).is_err());
    }
}
