///
/// Connections
///
/// A `Connection` is one driver session: login state, current database,
/// session charset, user and server address, plus the bookkeeping of the
/// most recent query (pending result, field metadata, affected rows).
///
/// Every operation takes `&mut self`, so a connection is used by one thread
/// at a time; callers that share one wrap it in a `Mutex` held across the
/// query -> store -> free sequence.
///

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection};
use tracing::{debug, info, warn};

use crate::backend::{self, Backend};
use crate::charset::Charset;
use crate::config::DriverConfig;
use crate::error::{DriverError, Result};
use crate::field::FieldDescriptor;
use crate::native::NativeLibrary;
use crate::options::{ConnectOptions, Scheme, ServerAddr};
use crate::result_set::ResultSet;
use crate::value::DatetimeMode;

/// How a session reaches its server.
#[derive(Clone)]
pub enum Transport {
    Plain,
    Tls(Arc<ClientConfig>),
}

impl Transport {
    pub fn is_tls(&self) -> bool {
        matches!(self, Transport::Tls(_))
    }

    /// Checks that this transport can reach `server` and, for TLS, that a
    /// client session can be started for the server's host name.
    fn prepare(&self, server: &ServerAddr) -> Result<()> {
        match self {
            Transport::Plain if server.scheme == Scheme::Tls => Err(DriverError::Connection(format!(
                "{} requires a TLS connection",
                server
            ))),
            Transport::Plain => Ok(()),
            Transport::Tls(config) => {
                let Some(host) = server.host() else {
                    // local stores have no peer to authenticate
                    return Ok(());
                };
                let name = ServerName::try_from(host.to_string()).map_err(|e| {
                    DriverError::Connection(format!("invalid TLS server name '{}': {}", host, e))
                })?;
                let session = ClientConnection::new(Arc::clone(config), name)
                    .map_err(|e| DriverError::Connection(format!("TLS session setup failed: {}", e)))?;
                debug!(host, handshaking = session.is_handshaking(), "TLS client session ready");
                Ok(())
            }
        }
    }
}

pub struct Connection {
    transport: Transport,
    config: DriverConfig,
    backend: Option<Box<dyn Backend>>,
    user: String,
    server_addr: String,
    database: String,
    charset: Charset,
    datetimes: DatetimeMode,
    params: Vec<(String, String)>,
    native: Option<NativeLibrary>,
    pub(crate) pending: Option<ResultSet>,
    pub(crate) last_fields: Option<Vec<FieldDescriptor>>,
    pub(crate) affected_rows: u64,
    pub(crate) last_insert_id: i64,
    pub(crate) query_timeout: Option<Duration>,
}

impl Connection {
    pub fn new(transport: Transport, config: DriverConfig) -> Self {
        let charset = config.charset();
        let query_timeout = config.query_timeout();
        Self {
            transport,
            config,
            backend: None,
            user: String::new(),
            server_addr: String::new(),
            database: String::new(),
            charset,
            datetimes: DatetimeMode::Millis,
            params: Vec::new(),
            native: None,
            pending: None,
            last_fields: None,
            affected_rows: 0,
            last_insert_id: 0,
            query_timeout,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Parses `conn_str` and logs in.
    pub fn connect(&mut self, conn_str: &str) -> Result<()> {
        let options = ConnectOptions::parse(conn_str)?;
        self.connect_with(&options)
    }

    pub fn connect_with(&mut self, options: &ConnectOptions) -> Result<()> {
        if self.is_logined() {
            self.disconnect()?;
        }
        let server = options.primary();
        self.transport.prepare(server)?;

        let limit = self.config.connect_timeout();
        let started = Instant::now();
        let mut backend = backend::open(server, &self.config)?;
        let database = options
            .database
            .clone()
            .unwrap_or_else(|| self.config.default_database.clone());
        let opened = time_left(started, limit).and_then(|left| {
            if database.is_empty() {
                return Ok(());
            }
            backend
                .execute("", &format!("USE {}", database), Some(left))
                .map_err(|e| match e {
                    DriverError::Timeout(_) => DriverError::Timeout(limit),
                    other => other,
                })?;
            time_left(started, limit).map(|_| ())
        });
        if let Err(e) = opened {
            backend.close();
            warn!(server = %server, "connect failed: {}", e);
            return Err(e);
        }

        self.backend = Some(backend);
        self.user = options.user.clone();
        self.server_addr = server.to_string();
        self.database = database;
        self.charset = options.charset.unwrap_or_else(|| self.config.charset());
        self.datetimes = options.datetimes;
        self.params = options.params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        self.reset_query_state();

        info!(
            user = %self.user,
            server = %self.server_addr,
            database = %self.database,
            tls = self.transport.is_tls(),
            "connected"
        );
        Ok(())
    }

    /// Tears the session down. Calling it while disconnected is a no-op.
    pub fn disconnect(&mut self) -> Result<()> {
        let Some(mut backend) = self.backend.take() else {
            return Ok(());
        };
        if let Some(pending) = self.pending.take() {
            debug!(rows = pending.row_count(), "dropping unconsumed result on disconnect");
        }
        backend.close();
        self.reset_query_state();
        info!(server = %self.server_addr, "disconnected");
        Ok(())
    }

    pub fn is_logined(&self) -> bool {
        self.backend.is_some()
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn set_charset(&mut self, name: &str) -> Result<()> {
        self.charset = Charset::from_name(name)?;
        debug!(charset = %self.charset, "session charset changed");
        Ok(())
    }

    pub fn user_name(&self) -> &str {
        &self.user
    }

    /// `scheme://location` of the server, empty before the first login.
    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    pub fn db_current(&self) -> &str {
        &self.database
    }

    pub fn datetime_mode(&self) -> DatetimeMode {
        self.datetimes
    }

    /// Extra connection string parameters, in the order given.
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub(crate) fn set_database(&mut self, database: String) {
        self.database = database;
    }

    pub(crate) fn backend_mut(&mut self) -> Result<&mut Box<dyn Backend>> {
        self.backend.as_mut().ok_or(DriverError::NotConnected)
    }

    pub(crate) fn reset_query_state(&mut self) {
        self.pending = None;
        self.last_fields = None;
        self.affected_rows = 0;
        self.last_insert_id = 0;
    }

    /// Loads the native client library at `path` and returns its version.
    /// The library stays loaded until the connection is dropped or another
    /// library replaces it.
    pub fn pg_init(&mut self, path: &str) -> Result<i32> {
        let library = NativeLibrary::open(path)?;
        let version = library.version();
        if let Some(previous) = self.native.replace(library) {
            debug!(path = previous.path(), "replacing native client library");
        }
        Ok(version)
    }

    pub fn native_library(&self) -> Option<&NativeLibrary> {
        self.native.as_ref()
    }
}

/// Time left of `limit` for work begun at `started`.
fn time_left(started: Instant, limit: Duration) -> Result<Duration> {
    limit
        .checked_sub(started.elapsed())
        .filter(|left| !left.is_zero())
        .ok_or(DriverError::Timeout(limit))
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("disconnect on drop failed: {}", e);
        }
    }
}
