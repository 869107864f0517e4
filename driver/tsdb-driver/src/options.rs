///
/// Connection String Parsing
///
/// The C interface passes a single connection string to `connect`:
///
/// ```text
/// user=root;passwd=secret;servers=tcp://127.0.0.1:9000;db=metrics;charset=utf-8
/// ```
///
/// ## Keys
///
/// - `user` - login name
/// - `passwd` (or `password`) - login password
/// - `servers` - comma-separated `scheme://location` list, first one is used
/// - `db` (or `database`) - initial database
/// - `charset` - initial session charset
///
/// Any other key is kept, in order, in `params`.
///
/// ## Server schemes
///
/// - `tcp://host:port` - plain session
/// - `tls://host:port` - encrypted session
/// - `mem://name` - named in-process store
/// - `file://dir` - file-backed store, one file per database under `dir`
///

use std::fmt;
use std::path::PathBuf;

use indexmap::IndexMap;

use crate::charset::Charset;
use crate::error::{DriverError, Result};
use crate::value::DatetimeMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Tcp,
    Tls,
    Mem,
    File,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Tcp => "tcp",
            Scheme::Tls => "tls",
            Scheme::Mem => "mem",
            Scheme::File => "file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddr {
    pub scheme: Scheme,
    pub location: String,
}

impl ServerAddr {
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (scheme, location) = match s.split_once("://") {
            Some((scheme, location)) => (scheme.to_ascii_lowercase(), location),
            None => ("tcp".to_string(), s),
        };
        let scheme = match scheme.as_str() {
            "tcp" => Scheme::Tcp,
            "tls" | "ssl" => Scheme::Tls,
            "mem" | "memory" => Scheme::Mem,
            "file" => Scheme::File,
            other => {
                return Err(DriverError::Connection(format!("unsupported server scheme '{}'", other)));
            }
        };
        if location.is_empty() {
            return Err(DriverError::Connection(format!("empty server location in '{}'", s)));
        }
        if matches!(scheme, Scheme::Tcp | Scheme::Tls) {
            let (host, port) = location.rsplit_once(':').ok_or_else(|| {
                DriverError::Connection(format!("expected host:port, got '{}'", location))
            })?;
            if host.is_empty() || port.parse::<u16>().is_err() {
                return Err(DriverError::Connection(format!("invalid server address '{}'", location)));
            }
        }
        Ok(Self {
            scheme,
            location: location.to_string(),
        })
    }

    /// Host part for network schemes.
    pub fn host(&self) -> Option<&str> {
        match self.scheme {
            Scheme::Tcp | Scheme::Tls => self.location.rsplit_once(':').map(|(h, _)| h),
            _ => None,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self.scheme {
            Scheme::Tcp | Scheme::Tls => self
                .location
                .rsplit_once(':')
                .and_then(|(_, p)| p.parse().ok()),
            _ => None,
        }
    }

    pub fn directory(&self) -> Option<PathBuf> {
        match self.scheme {
            Scheme::File => Some(PathBuf::from(&self.location)),
            _ => None,
        }
    }
}

impl fmt::Display for ServerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.as_str(), self.location)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub user: String,
    pub password: String,
    pub servers: Vec<ServerAddr>,
    pub database: Option<String>,
    pub charset: Option<Charset>,
    pub datetimes: DatetimeMode,
    pub params: IndexMap<String, String>,
}

impl ConnectOptions {
    pub fn new(server: ServerAddr) -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            servers: vec![server],
            database: None,
            charset: None,
            datetimes: DatetimeMode::Millis,
            params: IndexMap::new(),
        }
    }

    pub fn parse(conn_str: &str) -> Result<Self> {
        let mut user = String::new();
        let mut password = String::new();
        let mut servers = Vec::new();
        let mut database = None;
        let mut charset = None;
        let mut params = IndexMap::new();

        for pair in conn_str.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                DriverError::InvalidArgs(format!("expected key=value, got '{}'", pair))
            })?;
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "user" => user = value.to_string(),
                "passwd" | "password" => password = value.to_string(),
                "servers" | "server" => {
                    for server in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                        servers.push(ServerAddr::parse(server)?);
                    }
                }
                "db" | "database" => {
                    if !value.is_empty() {
                        database = Some(value.to_string());
                    }
                }
                "charset" => charset = Some(Charset::from_name(value)?),
                _ => {
                    params.insert(key.trim().to_string(), value.to_string());
                }
            }
        }

        if servers.is_empty() {
            return Err(DriverError::Connection("connection string names no servers".to_string()));
        }

        Ok(Self {
            user,
            password,
            servers,
            database,
            charset,
            datetimes: DatetimeMode::Millis,
            params,
        })
    }

    pub fn primary(&self) -> &ServerAddr {
        &self.servers[0]
    }

    pub fn to_conn_str(&self) -> String {
        let servers: Vec<String> = self.servers.iter().map(ToString::to_string).collect();
        let mut out = format!("user={};passwd={};servers={}", self.user, self.password, servers.join(","));
        if let Some(db) = &self.database {
            out.push_str(&format!(";db={}", db));
        }
        if let Some(charset) = &self.charset {
            out.push_str(&format!(";charset={}", charset));
        }
        for (k, v) in &self.params {
            out.push_str(&format!(";{}={}", k, v));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_driver_conn_str() {
        let opts = ConnectOptions::parse("user=test;passwd=secret;servers=tcp://127.0.0.1:9000").unwrap();
        assert_eq!(opts.user, "test");
        assert_eq!(opts.password, "secret");
        assert_eq!(opts.primary().scheme, Scheme::Tcp);
        assert_eq!(opts.primary().host(), Some("127.0.0.1"));
        assert_eq!(opts.primary().port(), Some(9000));
        assert!(opts.database.is_none());
    }

    #[test]
    fn test_parse_options_and_params() {
        let opts = ConnectOptions::parse(
            " user = root ; servers=mem://unit,tls://db.example.com:9443;db=metrics;charset=UTF8;retry=3;",
        )
        .unwrap();
        assert_eq!(opts.servers.len(), 2);
        assert_eq!(opts.primary().to_string(), "mem://unit");
        assert_eq!(opts.servers[1].scheme, Scheme::Tls);
        assert_eq!(opts.database.as_deref(), Some("metrics"));
        assert_eq!(opts.charset, Some(Charset::Utf8));
        assert_eq!(opts.params.get("retry").map(String::as_str), Some("3"));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(ConnectOptions::parse("user=a"), Err(DriverError::Connection(_))));
        assert!(ConnectOptions::parse("user=a;servers=udp://x:1").is_err());
        assert!(ConnectOptions::parse("user=a;servers=tcp://nohost").is_err());
        assert!(ConnectOptions::parse("user=a;servers=tcp://h:99999").is_err());
        assert!(matches!(ConnectOptions::parse("garbage;servers=mem://x"), Err(DriverError::InvalidArgs(_))));
        assert!(matches!(
            ConnectOptions::parse("servers=mem://x;charset=klingon"),
            Err(DriverError::InvalidCharset(_))
        ));
    }

    #[test]
    fn test_conn_str_round_trip() {
        let opts = ConnectOptions::parse("user=u;passwd=p;servers=file:///tmp/tsdb;db=d;charset=gbk").unwrap();
        let again = ConnectOptions::parse(&opts.to_conn_str()).unwrap();
        assert_eq!(opts, again);
        assert_eq!(again.primary().directory(), Some(PathBuf::from("/tmp/tsdb")));
    }

    #[test]
    fn test_bare_address_defaults_to_tcp() {
        let addr = ServerAddr::parse("localhost:9000").unwrap();
        assert_eq!(addr.scheme, Scheme::Tcp);
        assert_eq!(addr.to_string(), "tcp://localhost:9000");
    }
}
