///
/// Logging and configuration bootstrap for the shared library.
///
/// The host process owns stdout, so logs go to stderr and stay off unless
/// `TSDB_ML_LOG` names a level (`error`, `warn`, `info`, `debug`, `trace`).
/// `TSDB_ML_CONFIG` may name a driver config file.
///

use std::path::Path;
use std::sync::Once;

use tracing::{warn, Level};
use tsdb_driver::DriverConfig;

pub const LOG_ENV: &str = "TSDB_ML_LOG";
pub const CONFIG_ENV: &str = "TSDB_ML_CONFIG";

static INIT: Once = Once::new();

pub fn init() {
    INIT.call_once(|| {
        let Ok(level) = std::env::var(LOG_ENV) else {
            return;
        };
        let Ok(level) = level.trim().parse::<Level>() else {
            eprintln!("{}: unknown log level '{}'", LOG_ENV, level);
            return;
        };
        let _ = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_max_level(level)
            .try_init();
    });
}

/// Config from `TSDB_ML_CONFIG`, or defaults when unset or unreadable.
pub fn load_config() -> DriverConfig {
    let Ok(path) = std::env::var(CONFIG_ENV) else {
        return DriverConfig::default();
    };
    match DriverConfig::from_file(Path::new(&path)) {
        Ok(config) => config,
        Err(e) => {
            warn!(path, "ignoring driver config: {}", e);
            DriverConfig::default()
        }
    }
}
