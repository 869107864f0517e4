///
/// Driver error types.
///
/// Every failure the driver can report: connection setup, version
/// negotiation, query execution, result retrieval, charset handling,
/// native library loading, transport and result release.
///
/// Each variant maps onto a stable numeric code (`DriverError::code`) so
/// the C ABI can keep reporting plain integers where `0` means success.
///

use std::time::Duration;
use thiserror::Error;

/// Return code for a successful call.
pub const TSDB_ML_RET_OK: i32 = 0;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Interface version {version} outside supported range [{low}, {high}]")]
    VersionMismatch { version: u64, low: u64, high: u64 },

    #[error("Query failed ({code}): {message}")]
    Query { code: i32, message: String },

    #[error("No pending result")]
    ResultUnavailable,

    #[error("Invalid charset '{0}'")]
    InvalidCharset(String),

    #[error("Failed to load native library {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid result release: {0}")]
    Free(String),

    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("Invalid DSN: {0}")]
    InvalidDsn(String),

    #[error("Timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;

impl DriverError {
    pub(crate) fn query(message: impl Into<String>) -> Self {
        DriverError::Query {
            code: -1,
            message: message.into(),
        }
    }

    /// Numeric code reported across the C boundary. Never `TSDB_ML_RET_OK`.
    pub fn code(&self) -> i32 {
        match self {
            DriverError::Connection(_) => libc::ECONNREFUSED,
            DriverError::NotConnected => libc::ENOTCONN,
            DriverError::VersionMismatch { .. } => libc::ERANGE,
            DriverError::Query { .. } => libc::EPROTO,
            DriverError::ResultUnavailable => libc::ENODATA,
            DriverError::InvalidCharset(_) => libc::EINVAL,
            DriverError::Load { .. } => libc::ENOEXEC,
            DriverError::Io(_) => libc::EIO,
            DriverError::Free(_) => libc::EFAULT,
            DriverError::InvalidArgs(_) => libc::EINVAL,
            DriverError::InvalidDsn(_) => libc::EINVAL,
            DriverError::Timeout(_) => libc::ETIMEDOUT,
            DriverError::Config(_) => libc::EINVAL,
            DriverError::Csv(_) => libc::EIO,
        }
    }

    /// Query errors leave the connection usable; everything else that
    /// happens during `connect` or construction does not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DriverError::Query { .. }
                | DriverError::Timeout(_)
                | DriverError::ResultUnavailable
                | DriverError::InvalidArgs(_)
                | DriverError::InvalidCharset(_)
                | DriverError::Csv(_)
        )
    }
}

impl From<rusqlite::Error> for DriverError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(err, message) => DriverError::Query {
                code: err.extended_code,
                message: message.unwrap_or_else(|| err.to_string()),
            },
            other => DriverError::query(other.to_string()),
        }
    }
}
