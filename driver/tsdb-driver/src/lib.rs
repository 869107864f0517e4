///
/// # tsdb-driver - Client driver core for the tsdb data store
///
/// Connection lifecycle, query execution and result-set materialization
/// behind the tsdb multi-language interface. The C ABI lives in the
/// `tsdb-ml` crate; this crate is plain safe Rust.
///
/// ## Usage
///
/// ```rust,ignore
/// use tsdb_driver::{Registry, TSDB_ML_VERSION};
///
/// let registry = Registry::default();
/// let mut conn = registry.new_connection(TSDB_ML_VERSION)?;
/// conn.connect("user=root;passwd=secret;servers=tcp://127.0.0.1:9000")?;
/// conn.query(b"SELECT 1", Some("utf8"), Some("testdb"))?;
/// if let Some(set) = conn.store_result_v2() {
///     for row in set.iter() {
///         println!("{:?}", row.values());
///     }
///     conn.free_result(set)?;
/// }
/// ```
///
/// ## Layout
///
/// - `field`, `value`, `rows`, `result_set` - query output model
/// - `connection`, `executor` - session state and statement execution
/// - `registry` - version negotiation and connection factories
/// - `backend` - the store behind a connection
/// - `options`, `dsn`, `config`, `charset` - session configuration
/// - `loader`, `native`, `diagnostics` - CSV loading, `pg_init`, `test`
///

pub mod backend;
pub mod charset;
pub mod config;
pub mod connection;
pub mod diagnostics;
pub mod dsn;
pub mod error;
pub mod executor;
pub mod field;
pub mod loader;
pub mod native;
pub mod options;
pub mod registry;
pub mod result_set;
pub mod rows;
pub mod statement;
pub mod value;

pub use charset::Charset;
pub use config::DriverConfig;
pub use connection::{Connection, Transport};
pub use dsn::Dsn;
pub use error::{DriverError, Result, TSDB_ML_RET_OK};
pub use field::{DataType, FieldDescriptor, V3Field};
pub use loader::TableLoader;
pub use native::NativeLibrary;
pub use options::{ConnectOptions, Scheme, ServerAddr};
pub use registry::{
    check_version, Driver, PlainDriver, Registry, TlsDriver, BUILD_VERSION, TSDB_ML_VERSION,
    TSDB_ML_VERSION_LOW,
};
pub use result_set::{ResultSet, StoreMode, StoredResult, StreamingReader};
pub use rows::{Row, RowCursor, RowStore};
pub use value::{DatetimeMode, Value};
