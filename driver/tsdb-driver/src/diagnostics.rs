///
/// Diagnostic commands behind the `test(argc, argv)` entry point.
///
/// `argv[0]` is the program name, as with a command line:
///
/// ```text
/// tsdb-test info
/// tsdb-test ping
/// tsdb-test call --req 1024 --rsp 4096 --count 10
/// tsdb-test query SELECT count(*) FROM points
/// ```
///

use std::fmt::Write as _;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::connection::Connection;
use crate::error::{DriverError, Result};
use crate::result_set::StoreMode;

#[derive(Parser, Debug)]
#[command(name = "tsdb-test", about = "Connection diagnostics")]
struct TestArgs {
    #[command(subcommand)]
    command: TestCommand,
}

#[derive(Subcommand, Debug)]
enum TestCommand {
    /// Print session state
    Info,
    /// Run a trivial query
    Ping,
    /// Time request/response round trips
    Call {
        #[arg(long, default_value_t = 64)]
        req: usize,
        #[arg(long, default_value_t = 64)]
        rsp: usize,
        #[arg(long, default_value_t = 1)]
        count: u32,
    },
    /// Run a statement and report its result size
    Query {
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        sql: Vec<String>,
    },
}

impl Connection {
    /// Runs one diagnostic command and returns its report.
    pub fn test<I, T>(&mut self, argv: I) -> Result<String>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let args = TestArgs::try_parse_from(argv).map_err(|e| DriverError::InvalidArgs(e.to_string()))?;
        let mut report = String::new();
        match args.command {
            TestCommand::Info => {
                let _ = writeln!(report, "logined: {}", self.is_logined());
                let _ = writeln!(report, "user: {}", self.user_name());
                let _ = writeln!(report, "server: {}", self.server_addr());
                let _ = writeln!(report, "database: {}", self.db_current());
                let _ = writeln!(report, "charset: {}", self.charset());
                let _ = write!(report, "tls: {}", self.transport().is_tls());
            }
            TestCommand::Ping => {
                let elapsed = self.timed(|conn| conn.query_str("SELECT 1"))?;
                let reply = self.take_result(StoreMode::Materialized)?;
                self.free_result(reply)?;
                let _ = write!(report, "pong in {}us", elapsed.as_micros());
            }
            TestCommand::Call { req, rsp, count } => {
                let mut total = Duration::ZERO;
                for _ in 0..count.max(1) {
                    total += self.call_test(req, rsp)?;
                }
                let calls = count.max(1);
                let _ = write!(
                    report,
                    "{} calls, req {}B, rsp {}B, avg {}us",
                    calls,
                    req,
                    rsp,
                    total.as_micros() / calls as u128
                );
            }
            TestCommand::Query { sql } => {
                let sql = sql.join(" ");
                let elapsed = self.timed(|conn| conn.query_str(&sql))?;
                match self.store_result_v2() {
                    Some(set) => {
                        let _ = write!(
                            report,
                            "{} fields, {} rows in {}us",
                            set.field_count(),
                            set.row_count(),
                            elapsed.as_micros()
                        );
                        self.free_result(set)?;
                    }
                    None => {
                        let _ = write!(
                            report,
                            "{} rows affected in {}us",
                            self.affected_rows(),
                            elapsed.as_micros()
                        );
                    }
                }
            }
        }
        Ok(report)
    }

    fn timed(&mut self, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<Duration> {
        let started = std::time::Instant::now();
        f(self)?;
        Ok(started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::DriverConfig;
    use crate::connection::{Connection, Transport};
    use crate::error::DriverError;

    fn connected() -> Connection {
        let mut conn = Connection::new(Transport::Plain, DriverConfig::default());
        conn.connect("user=diag;servers=mem://diagnostics;db=diag").unwrap();
        conn
    }

    #[test]
    fn test_info() {
        let mut conn = connected();
        let report = conn.test(["tsdb-test", "info"]).unwrap();
        assert!(report.contains("user: diag"));
        assert!(report.contains("database: diag"));
    }

    #[test]
    fn test_ping_and_query() {
        let mut conn = connected();
        assert!(conn.test(["tsdb-test", "ping"]).unwrap().starts_with("pong"));
        let report = conn.test(["tsdb-test", "query", "SELECT", "1,", "2"]).unwrap();
        assert!(report.starts_with("2 fields, 1 rows"), "{}", report);
    }

    #[test]
    fn test_call() {
        let mut conn = connected();
        let report = conn
            .test(["tsdb-test", "call", "--req", "16", "--rsp", "32", "--count", "3"])
            .unwrap();
        assert!(report.starts_with("3 calls, req 16B, rsp 32B"));
    }

    #[test]
    fn test_bad_arguments() {
        let mut conn = connected();
        assert!(matches!(conn.test(["tsdb-test"]), Err(DriverError::InvalidArgs(_))));
        assert!(matches!(conn.test(["tsdb-test", "explode"]), Err(DriverError::InvalidArgs(_))));
        assert!(conn.test(["tsdb-test", "call", "--req", "lots"]).is_err());
    }
}
