///
/// Embedded loopback store.
///
/// Uses one process-wide store registry keyed by server location. Every
/// store holds one SQLite connection per database, opened on first
/// reference:
/// - `tcp://`, `tls://` and `mem://` locations keep their databases in memory
/// - `file://dir` keeps `dir/<database>.db` on disk
///
/// Backends attached to the same location see the same data, so a second
/// connection to `tcp://127.0.0.1:9000` reads what the first one wrote.
///

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{params, params_from_iter, Connection, InterruptHandle};
use tracing::{debug, info};

use super::{Backend, ColumnMeta, Execution};
use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::options::{Scheme, ServerAddr};
use crate::statement::StatementKind;
use crate::value::Value;

/// Database used when a statement names none.
pub const DEFAULT_DATABASE: &str = "default";

static LOOPBACK: LazyLock<Mutex<HashMap<String, Arc<Store>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn valid_database_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

type DbHandle = Arc<Mutex<Connection>>;

struct Store {
    directory: Option<PathBuf>,
    busy_timeout: Duration,
    databases: Mutex<HashMap<String, DbHandle>>,
}

impl Store {
    fn new(directory: Option<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            directory,
            busy_timeout,
            databases: Mutex::new(HashMap::new()),
        }
    }

    fn path_of(&self, name: &str) -> Option<PathBuf> {
        self.directory.as_ref().map(|dir| dir.join(format!("{}.db", name)))
    }

    fn exists(&self, name: &str) -> bool {
        lock(&self.databases).contains_key(name) || self.path_of(name).is_some_and(|p| p.exists())
    }

    fn open(&self, name: &str) -> Result<Connection> {
        let conn = match self.path_of(name) {
            Some(path) => {
                if let Some(dir) = &self.directory {
                    std::fs::create_dir_all(dir)?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    /// Handle for `name`, creating the database on first reference.
    fn database(&self, name: &str) -> Result<DbHandle> {
        let name = if name.is_empty() { DEFAULT_DATABASE } else { name };
        if !valid_database_name(name) {
            return Err(DriverError::query(format!("invalid database name '{}'", name)));
        }
        let mut databases = lock(&self.databases);
        if let Some(handle) = databases.get(name) {
            return Ok(Arc::clone(handle));
        }
        let handle = Arc::new(Mutex::new(self.open(name)?));
        databases.insert(name.to_string(), Arc::clone(&handle));
        debug!(database = name, "opened database");
        Ok(handle)
    }

    fn create(&self, name: &str, if_not_exists: bool) -> Result<u64> {
        if self.exists(name) {
            if if_not_exists {
                return Ok(0);
            }
            return Err(DriverError::query(format!("database '{}' already exists", name)));
        }
        self.database(name)?;
        Ok(1)
    }

    fn drop_database(&self, name: &str, if_exists: bool) -> Result<u64> {
        if !self.exists(name) {
            if if_exists {
                return Ok(0);
            }
            return Err(DriverError::query(format!("database '{}' does not exist", name)));
        }
        lock(&self.databases).remove(name);
        if let Some(path) = self.path_of(name) {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        debug!(database = name, "dropped database");
        Ok(1)
    }

    fn names(&self) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = lock(&self.databases).keys().cloned().collect();
        if let Some(dir) = &self.directory {
            if dir.is_dir() {
                for entry in std::fs::read_dir(dir)? {
                    let path = entry?.path();
                    if path.extension().is_some_and(|ext| ext == "db") {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            names.insert(stem.to_string());
                        }
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }
}

/// Interrupts a running statement once its deadline passes.
struct Watchdog {
    cancel: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    fn arm(interrupt: InterruptHandle, timeout: Duration) -> Self {
        let (cancel, rx) = mpsc::channel::<()>();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        let thread = thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(timeout) {
                flag.store(true, Ordering::SeqCst);
                interrupt.interrupt();
            }
        });
        Self {
            cancel: Some(cancel),
            thread: Some(thread),
            fired,
        }
    }

    fn fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        // Dropping the sender wakes the thread with Disconnected.
        self.cancel.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Bool(b) => ToSqlOutput::Owned(SqlValue::Integer(*b as i64)),
            Value::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i as i64)),
            Value::Int64(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f as f64)),
            Value::Double(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Binary(bytes) => ToSqlOutput::Borrowed(ValueRef::Blob(bytes)),
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Datetime(_) => ToSqlOutput::Owned(SqlValue::Text(self.to_string())),
        })
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Double(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Binary(b.to_vec()),
    }
}

fn is_interrupt(e: &DriverError) -> bool {
    matches!(e, DriverError::Query { code, .. } if *code == rusqlite::ffi::SQLITE_INTERRUPT)
}

fn run(conn: &Connection, sql: &str) -> Result<Execution> {
    let mut stmt = conn.prepare(sql)?;
    if stmt.column_count() == 0 {
        let changes = stmt.execute([])?;
        let last_insert_id = if changes > 0 && StatementKind::is_insert(sql) {
            conn.last_insert_rowid()
        } else {
            0
        };
        return Ok(Execution::Affected {
            rows: changes as u64,
            last_insert_id,
        });
    }

    let columns: Vec<ColumnMeta> = stmt
        .columns()
        .iter()
        .map(|c| ColumnMeta::new(c.name(), c.decl_type().map(str::to_string)))
        .collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(from_sql(row.get_ref(i)?));
        }
        rows.push(values);
    }
    Ok(Execution::Rows { columns, rows })
}

pub struct EmbeddedBackend {
    server: ServerAddr,
    store: Arc<Store>,
    echo: Connection,
}

impl EmbeddedBackend {
    /// Attaches to the store serving `server`, creating it if this is the
    /// first backend for that location.
    pub fn attach(server: &ServerAddr, config: &DriverConfig) -> Result<Self> {
        let (key, directory) = match server.scheme {
            Scheme::File => (format!("file:{}", server.location), server.directory()),
            Scheme::Tcp | Scheme::Tls | Scheme::Mem => (server.location.clone(), None),
        };
        let store = {
            let mut registry = lock(&LOOPBACK);
            Arc::clone(registry.entry(key).or_insert_with(|| {
                info!(server = %server, "starting loopback store");
                Arc::new(Store::new(directory, config.busy_timeout()))
            }))
        };
        let echo = Connection::open_in_memory()?;
        Ok(Self {
            server: server.clone(),
            store,
            echo,
        })
    }

    fn run_with_timeout(&self, handle: &DbHandle, sql: &str, timeout: Option<Duration>) -> Result<Execution> {
        let conn = lock(handle);
        let Some(timeout) = timeout else {
            return run(&conn, sql);
        };
        let watchdog = Watchdog::arm(conn.get_interrupt_handle(), timeout);
        let result = run(&conn, sql);
        let fired = watchdog.fired();
        drop(watchdog);
        match result {
            Err(e) if fired || is_interrupt(&e) => Err(DriverError::Timeout(timeout)),
            other => other,
        }
    }
}

impl Backend for EmbeddedBackend {
    fn execute(&mut self, database: &str, sql: &str, timeout: Option<Duration>) -> Result<Execution> {
        let sql = sql.trim().trim_end_matches(';').trim_end();
        if sql.is_empty() {
            return Err(DriverError::query("empty statement"));
        }
        match StatementKind::classify(sql) {
            StatementKind::CreateDatabase { name, if_not_exists } => {
                if !valid_database_name(&name) {
                    return Err(DriverError::query(format!("invalid database name '{}'", name)));
                }
                let rows = self.store.create(&name, if_not_exists)?;
                Ok(Execution::Affected { rows, last_insert_id: 0 })
            }
            StatementKind::DropDatabase { name, if_exists } => {
                let rows = self.store.drop_database(&name, if_exists)?;
                Ok(Execution::Affected { rows, last_insert_id: 0 })
            }
            StatementKind::ShowDatabases => {
                let rows = self
                    .store
                    .names()?
                    .into_iter()
                    .map(|name| vec![Value::String(name)])
                    .collect();
                Ok(Execution::Rows {
                    columns: vec![ColumnMeta::new("database", Some("VARCHAR(64)".to_string()))],
                    rows,
                })
            }
            StatementKind::ShowTables => {
                let handle = self.store.database(database)?;
                self.run_with_timeout(
                    &handle,
                    "SELECT name AS table_name FROM sqlite_master \
                     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                    timeout,
                )
            }
            StatementKind::Use(name) => {
                self.store.database(&name)?;
                Ok(Execution::Affected { rows: 0, last_insert_id: 0 })
            }
            StatementKind::Other => {
                let handle = self.store.database(database)?;
                self.run_with_timeout(&handle, sql, timeout)
            }
        }
    }

    fn round_trip(&mut self, request: &[u8], response_len: usize) -> Result<Vec<u8>> {
        let transport = |e: rusqlite::Error| DriverError::Io(std::io::Error::other(e.to_string()));
        let mut stmt = self
            .echo
            .prepare_cached("SELECT length(?1), zeroblob(?2)")
            .map_err(transport)?;
        let (received, response): (i64, Vec<u8>) = stmt
            .query_row(params![request, response_len as i64], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(transport)?;
        if received as usize != request.len() || response.len() != response_len {
            return Err(DriverError::Io(std::io::Error::other(format!(
                "round trip size mismatch: sent {} got {}, asked {} got {}",
                request.len(),
                received,
                response_len,
                response.len()
            ))));
        }
        Ok(response)
    }

    fn bulk_insert(
        &mut self,
        database: &str,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        if columns.is_empty() {
            return Err(DriverError::InvalidArgs(format!("no columns to insert into '{}'", table)));
        }
        let handle = self.store.database(database)?;
        let mut conn = lock(&handle);
        let tx = conn.transaction()?;
        let inserted = {
            let names: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
            let marks = vec!["?"; columns.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_ident(table),
                names.join(", "),
                marks
            );
            let mut stmt = tx.prepare(&sql)?;
            let mut inserted = 0u64;
            for (n, row) in rows.iter().enumerate() {
                if row.len() != columns.len() {
                    return Err(DriverError::InvalidArgs(format!(
                        "row {} has {} values, expected {}",
                        n,
                        row.len(),
                        columns.len()
                    )));
                }
                inserted += stmt.execute(params_from_iter(row.iter()))? as u64;
            }
            inserted
        };
        tx.commit()?;
        Ok(inserted)
    }

    fn server(&self) -> &ServerAddr {
        &self.server
    }
}

/// Creates `table` with one column per name unless it already exists.
/// Column types follow the first row's values.
pub(crate) fn create_table_sql(table: &str, columns: &[String], sample: Option<&[Value]>) -> String {
    let defs: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let ty = sample
                .and_then(|row| row.get(i))
                .map(|v| v.data_type().type_name())
                .filter(|t| *t != "NULL")
                .unwrap_or("STRING");
            format!("{} {}", quote_ident(name), ty)
        })
        .collect();
    format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(table), defs.join(", "))
}
