///
/// Driver Registry
///
/// Version negotiation and connection construction. A caller asks for a
/// connection with the interface version it was built against; anything
/// outside `[TSDB_ML_VERSION_LOW, TSDB_ML_VERSION]` is refused and no
/// connection is created.
///
/// The registry holds no global state. Process-wide defaults belong to
/// whoever embeds it (the C shim keeps exactly one).
///

use std::sync::Arc;

use rustls::{ClientConfig, RootCertStore};
use tracing::{debug, info, warn};

use crate::config::DriverConfig;
use crate::connection::{Connection, Transport};
use crate::dsn::Dsn;
use crate::error::{DriverError, Result};

/// Current interface version.
pub const TSDB_ML_VERSION: u64 = 202120031650;
/// Oldest interface version still accepted.
pub const TSDB_ML_VERSION_LOW: u64 = 20210031650;
/// Version string of this build.
pub const BUILD_VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn check_version(version: u64) -> Result<()> {
    if (TSDB_ML_VERSION_LOW..=TSDB_ML_VERSION).contains(&version) {
        Ok(())
    } else {
        Err(DriverError::VersionMismatch {
            version,
            low: TSDB_ML_VERSION_LOW,
            high: TSDB_ML_VERSION,
        })
    }
}

/// One way of reaching a server.
pub trait Driver: Send + Sync {
    fn name(&self) -> &'static str;

    fn transport(&self) -> Transport;
}

pub struct PlainDriver;

impl Driver for PlainDriver {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn transport(&self) -> Transport {
        Transport::Plain
    }
}

pub struct TlsDriver {
    config: Arc<ClientConfig>,
}

impl TlsDriver {
    /// TLS client trusting the webpki root set.
    pub fn new() -> Result<Self> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder_with_provider(rustls::crypto::ring::default_provider().into())
            .with_safe_default_protocol_versions()
            .map_err(|e| DriverError::Connection(format!("TLS configuration failed: {}", e)))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self::with_config(Arc::new(config)))
    }

    pub fn with_config(config: Arc<ClientConfig>) -> Self {
        Self { config }
    }
}

impl Driver for TlsDriver {
    fn name(&self) -> &'static str {
        "tls"
    }

    fn transport(&self) -> Transport {
        Transport::Tls(Arc::clone(&self.config))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    config: DriverConfig,
}

impl Registry {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn connection(&self, version: u64, driver: &dyn Driver) -> Result<Connection> {
        check_version(version)?;
        debug!(version, driver = driver.name(), "creating connection");
        Ok(Connection::new(driver.transport(), self.config.clone()))
    }

    /// Plain connection for interface `version`.
    pub fn new_connection(&self, version: u64) -> Result<Connection> {
        self.connection(version, &PlainDriver)
    }

    /// Encrypted connection for interface `version`.
    pub fn tls_connection(&self, version: u64) -> Result<Connection> {
        self.connection(version, &TlsDriver::new()?)
    }

    /// Parses `dsn`, connects within its `timeout` and applies its database,
    /// charset and datetime handling.
    pub fn open_dsn(&self, dsn: &str) -> Result<Connection> {
        let dsn = Dsn::parse(dsn)?;
        let mut config = self.config.clone();
        config.connect_timeout_ms = dsn.dial_timeout.as_millis().max(1) as u64;
        let driver: Box<dyn Driver> = if dsn.protocol.eq_ignore_ascii_case("tls") {
            Box::new(TlsDriver::new()?)
        } else {
            Box::new(PlainDriver)
        };
        let mut conn = Connection::new(driver.transport(), config);
        conn.connect_with(&dsn.to_connect_options()?)?;
        Ok(conn)
    }

    /// Disconnects and releases `conn` together with its pending result and
    /// native library.
    pub fn kill_me(&self, mut conn: Connection) {
        let server = conn.server_addr().to_string();
        if let Err(e) = conn.disconnect() {
            warn!(server = %server, "disconnect on release failed: {}", e);
        }
        drop(conn);
        info!(server = %server, "connection released");
    }
}
