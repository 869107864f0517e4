///
/// # Driver Configuration
///
/// Optional `tsdb.toml`-style settings applied to every connection a
/// registry creates. Every key has a default, so an empty file is valid.
///
/// ## Example
///
/// ```toml
/// [driver]
/// default_charset = "utf-8"
/// default_database = "metrics"
/// connect_timeout_ms = 500
/// query_timeout_ms = 30000
/// busy_timeout_ms = 500
/// log_sql = true
/// ```
///

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::charset::Charset;
use crate::error::{DriverError, Result};

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    pub default_charset: String,
    pub default_database: String,
    pub connect_timeout_ms: u64,
    /// Zero disables the query timeout.
    pub query_timeout_ms: u64,
    pub busy_timeout_ms: u64,
    pub log_sql: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            default_charset: Charset::default().name().to_string(),
            default_database: String::new(),
            connect_timeout_ms: 500,
            query_timeout_ms: 0,
            busy_timeout_ms: 500,
            log_sql: false,
        }
    }
}

impl DriverConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(content)?;
        file.driver.validate()?;
        Ok(file.driver)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        Charset::from_name(&self.default_charset)?;
        if self.connect_timeout_ms == 0 {
            return Err(DriverError::InvalidArgs("connect_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    pub fn charset(&self) -> Charset {
        Charset::from_name(&self.default_charset).unwrap_or_default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        (self.query_timeout_ms > 0).then(|| Duration::from_millis(self.query_timeout_ms))
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn to_toml_string(&self) -> String {
        let file = ConfigFile { driver: self.clone() };
        toml::to_string(&file).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = DriverConfig::from_toml_str("").unwrap();
        assert_eq!(config, DriverConfig::default());
        assert_eq!(config.charset(), Charset::Iso8859_1);
        assert_eq!(config.connect_timeout(), Duration::from_millis(500));
        assert!(config.query_timeout().is_none());
    }

    #[test]
    fn test_partial_config() {
        let config = DriverConfig::from_toml_str(
            r#"
[driver]
default_charset = "UTF-8"
query_timeout_ms = 2000
log_sql = true
"#,
        )
        .unwrap();
        assert_eq!(config.charset(), Charset::Utf8);
        assert_eq!(config.query_timeout(), Some(Duration::from_millis(2000)));
        assert!(config.log_sql);
        assert_eq!(config.busy_timeout_ms, 500);
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            DriverConfig::from_toml_str("[driver]\ndefault_charset = \"klingon\"\n"),
            Err(DriverError::InvalidCharset(_))
        ));
        assert!(matches!(
            DriverConfig::from_toml_str("[driver]\nquery_timeout_ms = \"soon\"\n"),
            Err(DriverError::Config(_))
        ));
        assert!(DriverConfig::from_toml_str("[driver]\nconnect_timeout_ms = 0\n").is_err());
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut config = DriverConfig::default();
        config.default_database = "metrics".to_string();
        let parsed = DriverConfig::from_toml_str(&config.to_toml_string()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tsdb.toml");
        std::fs::write(&path, "[driver]\ndefault_database = \"ops\"\n").unwrap();
        assert_eq!(DriverConfig::from_file(&path).unwrap().default_database, "ops");
        assert!(matches!(
            DriverConfig::from_file(&dir.path().join("missing.toml")),
            Err(DriverError::Io(_))
        ));
    }
}
