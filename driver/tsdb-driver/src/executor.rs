///
/// Query Executor
///
/// Runs statements on a `Connection` and tracks what the last one left
/// behind. Each call to `query` replaces the previous query's state:
/// - a statement with columns leaves one pending result set and its fields
/// - any other statement leaves `affected_rows` and `last_insert_id`
/// - a failing statement leaves nothing pending; the connection stays usable
///
/// The pending result is taken at most once, through `store_result`
/// (streaming reader) or `store_result_v2` (materialized set). Whichever
/// runs first consumes it; the other then returns `None`.
///

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::backend::Execution;
use crate::charset::Charset;
use crate::connection::Connection;
use crate::error::{DriverError, Result};
use crate::field::{FieldDescriptor, V3Field};
use crate::result_set::{ResultSet, StoreMode, StoredResult, StreamingReader};
use crate::statement::{interpolate, StatementKind};
use crate::value::Value;

impl Connection {
    /// Executes `sql`, decoded with `charset` (the session charset when
    /// `None` or empty), against `database` (the current database when
    /// `None` or empty).
    pub fn query(&mut self, sql: &[u8], charset: Option<&str>, database: Option<&str>) -> Result<()> {
        self.pending = None;
        self.last_fields = None;
        let charset = match charset.map(str::trim) {
            Some(name) if !name.is_empty() => Charset::from_name(name)?,
            _ => self.charset(),
        };
        let text = charset.decode(sql)?;
        self.execute(&text, database)
    }

    pub fn query_str(&mut self, sql: &str) -> Result<()> {
        self.pending = None;
        self.last_fields = None;
        self.execute(sql, None)
    }

    /// Substitutes `args` for the `?` placeholders in `sql` and runs it.
    pub fn query_with_args(&mut self, sql: &str, args: &[Value]) -> Result<()> {
        let sql = interpolate(sql, args)?;
        self.query_str(&sql)
    }

    fn execute(&mut self, sql: &str, database: Option<&str>) -> Result<()> {
        let database = database
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.db_current().to_string());
        if self.config().log_sql {
            debug!(database = %database, sql, "query");
        }
        let timeout = self.query_timeout;
        let kind = StatementKind::classify(sql);

        let started = Instant::now();
        let execution = match self.backend_mut()?.execute(&database, sql, timeout) {
            Ok(execution) => execution,
            Err(e) => {
                warn!(error = %e, "query failed");
                return Err(e);
            }
        };

        if let StatementKind::Use(name) = kind {
            self.set_database(name);
        }

        match execution {
            Execution::Rows { columns, rows } => {
                let set = ResultSet::from_columns(columns, rows)?.with_datetimes(self.datetime_mode());
                debug!(
                    fields = set.field_count(),
                    rows = set.row_count(),
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "query returned rows"
                );
                self.affected_rows = set.row_count();
                self.last_insert_id = 0;
                self.last_fields = Some(set.fields().to_vec());
                self.pending = Some(set);
            }
            Execution::Affected { rows, last_insert_id } => {
                debug!(
                    affected = rows,
                    elapsed_us = started.elapsed().as_micros() as u64,
                    "statement executed"
                );
                self.affected_rows = rows;
                self.last_insert_id = last_insert_id;
            }
        }
        Ok(())
    }

    /// Rows affected by the last statement, or rows returned by the last
    /// query. Zero before any statement has run.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn last_insert_id(&self) -> i64 {
        self.last_insert_id
    }

    /// Legacy field shape for the last query's result.
    pub fn fetch_fields(&self) -> Option<Vec<V3Field>> {
        self.last_fields
            .as_ref()
            .map(|fields| fields.iter().map(FieldDescriptor::to_v3).collect())
    }

    pub fn fetch_ml_fields(&self) -> Option<&[FieldDescriptor]> {
        self.last_fields.as_deref()
    }

    pub fn has_pending_result(&self) -> bool {
        self.pending.is_some()
    }

    /// Takes the pending result in the requested shape, failing with
    /// `ResultUnavailable` when the last statement left none or it was
    /// already taken.
    pub fn take_result(&mut self, mode: StoreMode) -> Result<StoredResult> {
        self.pending
            .take()
            .map(|set| StoredResult::from_result_set(set, mode))
            .ok_or(DriverError::ResultUnavailable)
    }

    /// Takes the pending result in the requested shape.
    pub fn store(&mut self, mode: StoreMode) -> Option<StoredResult> {
        self.take_result(mode).ok()
    }

    pub fn store_result(&mut self) -> Option<StreamingReader> {
        self.store(StoreMode::Streaming).map(StoredResult::into_reader)
    }

    pub fn store_result_v2(&mut self) -> Option<ResultSet> {
        self.store(StoreMode::Materialized)
            .and_then(StoredResult::into_result_set)
    }

    /// Releases a stored result. Ownership makes a second release of the
    /// same result impossible.
    pub fn free_result(&mut self, result: impl Into<StoredResult>) -> Result<()> {
        match result.into() {
            StoredResult::Materialized(set) => {
                debug!(rows = set.row_count(), fields = set.field_count(), "released result set");
            }
            StoredResult::Reader(reader) => {
                debug!(rows_read = reader.rows_read(), unread = reader.remaining(), "released reader");
            }
        }
        Ok(())
    }

    /// Sends a `req_bytes` request, waits for `rsp_bytes` back and returns
    /// the elapsed time.
    pub fn call_test(&mut self, req_bytes: usize, rsp_bytes: usize) -> Result<Duration> {
        let request = vec![0x5au8; req_bytes];
        let started = Instant::now();
        self.backend_mut()?.round_trip(&request, rsp_bytes)?;
        let elapsed = started.elapsed();
        debug!(req_bytes, rsp_bytes, elapsed_us = elapsed.as_micros() as u64, "call test");
        Ok(elapsed)
    }

    /// Overrides the configured query timeout. `None` disables it.
    pub fn set_query_timeout(&mut self, timeout: Option<Duration>) {
        self.query_timeout = timeout;
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DriverConfig;
    use crate::connection::{Connection, Transport};
    use crate::error::DriverError;
    use crate::field::DataType;
    use crate::result_set::StoreMode;
    use crate::value::Value;

    fn connected(location: &str) -> Connection {
        let mut conn = Connection::new(Transport::Plain, DriverConfig::default());
        conn.connect(&format!("user=test;servers=mem://{}", location)).unwrap();
        conn
    }

    #[test]
    fn test_select_one() {
        let mut conn = connected("exec-select-one");
        conn.query(b"SELECT 1", Some("utf8"), Some("testdb")).unwrap();
        let fields = conn.fetch_ml_fields().unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].data_type, DataType::Int64);
        let set = conn.store_result_v2().unwrap();
        assert_eq!(set.field_count(), 1);
        assert_eq!(set.row_count(), 1);
        assert_eq!(set.rows().head().unwrap()[0], Value::Int64(1));
        conn.free_result(set).unwrap();
    }

    #[test]
    fn test_malformed_sql_leaves_nothing_pending() {
        let mut conn = connected("exec-malformed");
        conn.query(b"SELECT 1", None, None).unwrap();
        let err = conn.query(b"SELEC 1 FROM", None, None).unwrap_err();
        assert!(matches!(err, DriverError::Query { .. }));
        assert!(err.is_recoverable());
        assert!(conn.store_result_v2().is_none());
        assert!(conn.fetch_fields().is_none());
        conn.query(b"SELECT 2", None, None).unwrap();
        assert!(conn.store_result_v2().is_some());
    }

    #[test]
    fn test_mutations_report_affected_rows() {
        let mut conn = connected("exec-mutations");
        assert_eq!(conn.affected_rows(), 0);
        conn.query_str("CREATE TABLE t (id INTEGER PRIMARY KEY, name VARCHAR(20))").unwrap();
        conn.query_with_args("INSERT INTO t (name) VALUES (?), (?)", &[Value::from("a"), Value::from("b")])
            .unwrap();
        assert_eq!(conn.affected_rows(), 2);
        assert_eq!(conn.last_insert_id(), 2);
        assert!(conn.store_result_v2().is_none());
        assert!(conn.fetch_ml_fields().is_none());

        conn.query_str("UPDATE t SET name = 'z' WHERE id = 1").unwrap();
        assert_eq!(conn.affected_rows(), 1);
    }

    #[test]
    fn test_zero_row_result() {
        let mut conn = connected("exec-zero-rows");
        conn.query_str("CREATE TABLE e (v DOUBLE)").unwrap();
        conn.query_str("SELECT v FROM e").unwrap();
        let set = conn.store_result_v2().unwrap();
        assert_eq!(set.row_count(), 0);
        assert_eq!(set.field_count(), 1);
        assert_eq!(set.fields()[0].data_type, DataType::Double);
        assert!(set.rows().head().is_none());
    }

    #[test]
    fn test_pending_slot_is_consumed_once() {
        let mut conn = connected("exec-slot");
        conn.query_str("SELECT 1 UNION ALL SELECT 2").unwrap();
        let mut reader = conn.store_result().unwrap();
        assert!(conn.store_result_v2().is_none());
        assert!(conn.store_result().is_none());
        let err = conn.take_result(StoreMode::Materialized).unwrap_err();
        assert!(matches!(err, DriverError::ResultUnavailable));
        assert_eq!(err.code(), libc::ENODATA);
        assert_eq!(reader.next_row().unwrap()[0], Value::Int64(1));
        assert_eq!(reader.remaining(), 1);
        conn.free_result(reader).unwrap();
        // fields stay readable after the result is taken
        assert_eq!(conn.fetch_fields().unwrap().len(), 1);
    }

    #[test]
    fn test_use_switches_database() {
        let mut conn = connected("exec-use");
        conn.query_str("CREATE TABLE only_in_default (x)").unwrap();
        conn.query_str("USE other").unwrap();
        assert_eq!(conn.db_current(), "other");
        assert!(conn.query_str("SELECT * FROM only_in_default").is_err());
        conn.query(b"SELECT * FROM only_in_default", None, Some("default")).unwrap();
        assert_eq!(conn.db_current(), "other");
    }

    #[test]
    fn test_query_charset() {
        let mut conn = connected("exec-charset");
        // 'é' in ISO-8859-1
        conn.query(b"SELECT '\xe9' AS s", None, None).unwrap();
        let set = conn.store_result_v2().unwrap();
        assert_eq!(set.rows().head().unwrap()[0], Value::from("é"));

        assert!(matches!(
            conn.query(b"SELECT 1", Some("klingon"), None),
            Err(DriverError::InvalidCharset(_))
        ));
        assert!(conn.query(b"SELECT '\xff\xfe'", Some("utf-8"), None).is_err());
    }

    #[test]
    fn test_query_requires_connection() {
        let mut conn = Connection::new(Transport::Plain, DriverConfig::default());
        assert!(matches!(conn.query_str("SELECT 1"), Err(DriverError::NotConnected)));
        assert!(matches!(conn.call_test(8, 8), Err(DriverError::NotConnected)));
    }

    #[test]
    fn test_call_test_round_trip() {
        let mut conn = connected("exec-call-test");
        assert!(conn.call_test(1024, 4096).is_ok());
    }
}
