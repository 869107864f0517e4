///
/// Store Backends
///
/// A `Connection` talks to the data store through the `Backend` trait. The
/// wire protocol of a remote store is not part of this crate; the one
/// backend shipped here is the embedded loopback store (`embedded`), which
/// serves every server scheme from inside the process.
///
/// Backends return raw column metadata and untyped cells; typing, coercion
/// and field descriptors are the result set's job.
///

pub mod embedded;

use std::time::Duration;

use crate::config::DriverConfig;
use crate::error::Result;
use crate::options::ServerAddr;
use crate::value::Value;

pub use embedded::EmbeddedBackend;

/// One column as reported by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub declared_type: Option<String>,
    pub unique: bool,
    pub has_index: bool,
    pub is_ref: bool,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, declared_type: Option<String>) -> Self {
        Self {
            name: name.into(),
            declared_type,
            unique: false,
            has_index: false,
            is_ref: false,
        }
    }
}

/// Outcome of one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// The statement produced columns (possibly with zero rows).
    Rows {
        columns: Vec<ColumnMeta>,
        rows: Vec<Vec<Value>>,
    },
    /// The statement modified data or schema.
    Affected { rows: u64, last_insert_id: i64 },
}

pub trait Backend: Send {
    /// Runs one statement against `database`, interrupting it once
    /// `timeout` elapses.
    fn execute(&mut self, database: &str, sql: &str, timeout: Option<Duration>) -> Result<Execution>;

    /// Sends `request` and asks for `response_len` bytes back.
    fn round_trip(&mut self, request: &[u8], response_len: usize) -> Result<Vec<u8>>;

    /// Inserts `rows` into `table` in one transaction, returning the count.
    fn bulk_insert(
        &mut self,
        database: &str,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> Result<u64>;

    /// Address of the server this backend is attached to.
    fn server(&self) -> &ServerAddr;

    fn close(&mut self) {}
}

/// Opens the backend serving `server`.
pub fn open(server: &ServerAddr, config: &DriverConfig) -> Result<Box<dyn Backend>> {
    Ok(Box::new(EmbeddedBackend::attach(server, config)?))
}
