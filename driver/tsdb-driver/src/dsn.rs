///
/// DSN Parsing
///
/// Data source names in the form used by SQL driver front-ends:
///
/// ```text
/// [user[:password]@][protocol[(address)]]/dbname[?param1=value1&param2=value2]
/// ```
///
/// Examples:
/// - `root:secret@tcp(127.0.0.1:9000)/metrics?charset=utf-8&parseTime=true`
/// - `root@mem(scratch)/db`
/// - `/dbname` (all defaults)
///
/// Recognised params adjust the config; the rest are kept verbatim:
/// - `charset` - validated session charset
/// - `parseTime` - `true|t|T|True|1` or `false|f|F|False|0`; when true
///   DATETIME cells come back as epoch milliseconds, otherwise as text
/// - `loc` - `UTC`, `Local` or an offset such as `+08:00`, used for
///   DATETIME text
/// - `timeout` - connect timeout in milliseconds
///

use std::time::Duration;

use chrono::{FixedOffset, Local, Offset, Utc};
use indexmap::IndexMap;

use crate::charset::Charset;
use crate::error::{DriverError, Result};
use crate::options::{ConnectOptions, ServerAddr};
use crate::value::DatetimeMode;

pub const DEFAULT_PROTOCOL: &str = "tcp";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9000;
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub struct Dsn {
    pub user: String,
    pub password: String,
    pub protocol: String,
    pub address: String,
    pub db_name: String,
    pub charset: Charset,
    pub location: FixedOffset,
    pub parse_time: bool,
    pub dial_timeout: Duration,
    pub params: IndexMap<String, String>,
}

impl Default for Dsn {
    fn default() -> Self {
        Self {
            user: String::new(),
            password: String::new(),
            protocol: DEFAULT_PROTOCOL.to_string(),
            address: format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT),
            db_name: String::new(),
            charset: Charset::default(),
            location: Utc.fix(),
            parse_time: false,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            params: IndexMap::new(),
        }
    }
}

impl Dsn {
    pub fn parse(dsn: &str) -> Result<Self> {
        let mut config = Dsn::default();
        if dsn.is_empty() {
            return Ok(config);
        }

        // The address may contain '/' (unix sockets) and so may params
        // (note=a/b), so the separator is the first '/' after the
        // parenthesised address.
        let search_from = match (dsn.find('('), dsn.find('/')) {
            (Some(open), Some(first_slash)) if open < first_slash => dsn[open..]
                .find(')')
                .map(|close| open + close + 1)
                .ok_or_else(|| DriverError::InvalidDsn(format!("unbalanced address in '{}'", dsn)))?,
            _ => 0,
        };
        let slash = dsn[search_from..]
            .find('/')
            .map(|i| search_from + i)
            .ok_or_else(|| DriverError::InvalidDsn(format!("missing '/' in '{}'", dsn)))?;
        let (left, right) = (&dsn[..slash], &dsn[slash + 1..]);

        if !left.is_empty() {
            let (user_info, net) = match left.rfind('@') {
                Some(at) => (&left[..at], &left[at + 1..]),
                None => ("", left),
            };
            if let Some((user, password)) = user_info.split_once(':') {
                config.user = user.to_string();
                config.password = password.to_string();
            } else {
                config.user = user_info.to_string();
            }
            if !net.is_empty() {
                match net.find('(') {
                    Some(open) => {
                        let close = net.rfind(')').filter(|&c| c > open).ok_or_else(|| {
                            DriverError::InvalidDsn(format!("unbalanced address in '{}'", dsn))
                        })?;
                        config.protocol = net[..open].to_string();
                        config.address = net[open + 1..close].to_string();
                    }
                    None => config.protocol = net.to_string(),
                }
            }
        }

        match right.split_once('?') {
            Some((db, query)) => {
                config.db_name = db.to_string();
                config.params = parse_params(query);
            }
            None => config.db_name = right.to_string(),
        }

        config.adjust()?;
        Ok(config)
    }

    fn adjust(&mut self) -> Result<()> {
        if let Some(charset) = self.params.get("charset") {
            self.charset = Charset::from_name(charset)
                .map_err(|_| DriverError::InvalidDsn(format!("unknown charset '{}'", charset)))?;
        }
        if let Some(parse_time) = self.params.get("parseTime") {
            self.parse_time = match parse_time.as_str() {
                "true" | "t" | "T" | "True" | "1" => true,
                "false" | "f" | "F" | "False" | "0" => false,
                other => {
                    return Err(DriverError::InvalidDsn(format!("invalid parseTime '{}'", other)));
                }
            };
        }
        if let Some(loc) = self.params.get("loc") {
            self.location = parse_location(loc)
                .ok_or_else(|| DriverError::InvalidDsn(format!("unknown loc '{}'", loc)))?;
        }
        if let Some(timeout) = self.params.get("timeout") {
            let ms: u64 = timeout
                .parse()
                .map_err(|_| DriverError::InvalidDsn(format!("invalid timeout '{}'", timeout)))?;
            self.dial_timeout = Duration::from_millis(ms);
        }
        Ok(())
    }

    /// Host and port of a `host:port` address, falling back to the defaults.
    pub fn host_and_port(&self) -> (String, u16) {
        match self.address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => match port.parse() {
                Ok(port) => (host.to_string(), port),
                Err(_) => (DEFAULT_HOST.to_string(), DEFAULT_PORT),
            },
            _ => (DEFAULT_HOST.to_string(), DEFAULT_PORT),
        }
    }

    pub fn server(&self) -> Result<ServerAddr> {
        let location = match self.protocol.as_str() {
            "tcp" | "tls" => {
                let (host, port) = self.host_and_port();
                format!("{}:{}", host, port)
            }
            _ => self.address.clone(),
        };
        ServerAddr::parse(&format!("{}://{}", self.protocol, location))
    }

    /// How DATETIME cells come back on connections opened from this DSN.
    pub fn datetime_mode(&self) -> DatetimeMode {
        if self.parse_time {
            DatetimeMode::Millis
        } else {
            DatetimeMode::Text(self.location)
        }
    }

    pub fn to_connect_options(&self) -> Result<ConnectOptions> {
        let mut options = ConnectOptions::new(self.server()?);
        options.user = self.user.clone();
        options.password = self.password.clone();
        if !self.db_name.is_empty() {
            options.database = Some(self.db_name.clone());
        }
        options.charset = Some(self.charset);
        options.datetimes = self.datetime_mode();
        Ok(options)
    }
}

fn parse_location(loc: &str) -> Option<FixedOffset> {
    match loc {
        "UTC" | "utc" | "Z" => Some(Utc.fix()),
        "Local" => Some(Local::now().offset().fix()),
        _ => loc.parse().ok(),
    }
}

fn parse_params(query: &str) -> IndexMap<String, String> {
    let mut params = IndexMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        match pair.split_once('=') {
            Some((k, v)) if !k.is_empty() && !v.contains('=') => {
                params.insert(k.to_string(), v.to_string());
            }
            _ => tracing::warn!(pair, "skipping malformed DSN parameter"),
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Scheme;

    #[test]
    fn test_full_dsn() {
        let dsn = Dsn::parse("user:password@protocol(host:port)/dbname?param1=value1&param2=value2").unwrap();
        assert_eq!(dsn.user, "user");
        assert_eq!(dsn.password, "password");
        assert_eq!(dsn.protocol, "protocol");
        assert_eq!(dsn.address, "host:port");
        assert_eq!(dsn.db_name, "dbname");
        assert_eq!(dsn.charset, Charset::Iso8859_1);
        assert_eq!(dsn.dial_timeout, DEFAULT_DIAL_TIMEOUT);
        assert_eq!(dsn.params.len(), 2);
        assert_eq!(dsn.params["param2"], "value2");
    }

    #[test]
    fn test_dsn_adjusts_from_params() {
        let dsn = Dsn::parse("root:asd123456@tcp(127.0.0.1:9000)/myDB?parseTime=true&charset=UTF-8&loc=UTC").unwrap();
        assert_eq!(dsn.user, "root");
        assert_eq!(dsn.protocol, "tcp");
        assert!(dsn.parse_time);
        assert_eq!(dsn.charset, Charset::Utf8);
        assert_eq!(dsn.location, Utc.fix());
        assert_eq!(dsn.datetime_mode(), DatetimeMode::Millis);
        assert_eq!(dsn.host_and_port(), ("127.0.0.1".to_string(), 9000));
    }

    #[test]
    fn test_unix_socket_address() {
        let dsn = Dsn::parse("root@unix(/path/to/socket)/myDB?charset=UTF-8").unwrap();
        assert_eq!(dsn.user, "root");
        assert_eq!(dsn.protocol, "unix");
        assert_eq!(dsn.address, "/path/to/socket");
        assert_eq!(dsn.db_name, "myDB");
    }

    #[test]
    fn test_db_only() {
        let dsn = Dsn::parse("/dbname").unwrap();
        assert_eq!(dsn.db_name, "dbname");
        assert_eq!(dsn.protocol, "tcp");
        assert_eq!(dsn.address, "127.0.0.1:9000");
        assert!(dsn.user.is_empty());

        let dsn = Dsn::parse("/db?loc=+08:00&note=a/b").unwrap();
        assert_eq!(dsn.db_name, "db");
        assert_eq!(dsn.params["note"], "a/b");
        let plus8 = FixedOffset::east_opt(8 * 3600).unwrap();
        assert_eq!(dsn.location, plus8);
        assert_eq!(dsn.datetime_mode(), DatetimeMode::Text(plus8));
        assert!(Dsn::parse("/db?loc=Local").is_ok());
    }

    #[test]
    fn test_invalid_dsns() {
        assert!(matches!(Dsn::parse("no-slash-here"), Err(DriverError::InvalidDsn(_))));
        assert!(Dsn::parse("/db?charset=klingon").is_err());
        assert!(Dsn::parse("/db?parseTime=maybe").is_err());
        assert!(Dsn::parse("/db?timeout=soon").is_err());
        assert!(Dsn::parse("/db?loc=Mars/Olympus").is_err());
        assert!(Dsn::parse("/db?loc=").is_err());
        assert!(Dsn::parse("u@tcp(host:1/db").is_err());
    }

    #[test]
    fn test_to_connect_options() {
        let dsn = Dsn::parse("test:test@mem(scratch)/test_db?charset=gbk&timeout=1500").unwrap();
        assert_eq!(dsn.dial_timeout, Duration::from_millis(1500));
        let opts = dsn.to_connect_options().unwrap();
        assert_eq!(opts.primary().scheme, Scheme::Mem);
        assert_eq!(opts.primary().location, "scratch");
        assert_eq!(opts.database.as_deref(), Some("test_db"));
        assert_eq!(opts.charset, Some(Charset::Gbk));
        assert_eq!(opts.user, "test");
        assert_eq!(opts.datetimes, DatetimeMode::Text(Utc.fix()));
    }

    #[test]
    fn test_host_and_port_fallback() {
        let mut dsn = Dsn::default();
        dsn.address = "garbage".to_string();
        assert_eq!(dsn.host_and_port(), (DEFAULT_HOST.to_string(), DEFAULT_PORT));
    }
}
