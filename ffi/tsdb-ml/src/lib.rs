///
/// # tsdb-ml - C ABI for the tsdb client driver
///
/// Builds `libtsdb_ml`, the shared library behind `tsdb_ml.h`. A host
/// obtains a `tsdb_ml_t` from `tsdb_ml_new_s` or `tsdb_ml_tls_s` and calls
/// through its function pointers, or calls the `tsdb_*` free functions,
/// which act on the most recently created instance.
///
/// ```c
/// tsdb_ml_t *ml = tsdb_ml_new_s(TSDB_ML_VERSION);
/// ml->connect("user=root;passwd=secret;servers=tcp://127.0.0.1:9000");
/// ml->query(ml, "SELECT 1", 8, "utf8", "testdb");
/// tsdb_result_set_t *rs = ml->store_result_v2(ml);
/// ml->free_result(ml, rs);
/// ml->kill_me(ml);
/// ```
///
/// ## Ownership
///
/// - result sets, readers and table loaders belong to the caller until
///   passed to `free_result`
/// - `fetch_ml_fields` arrays belong to the caller until passed to
///   `destroy_tsdb_ml_fields`
/// - strings and `fetch_fields` arrays belong to the instance
///

pub mod functions;
pub mod handles;
pub mod instance;
pub mod layout;
pub mod logging;
pub mod table;

pub use layout::{TsdbBinary, TsdbMlField, TsdbResultSet, TsdbRows, TsdbV3Field};
pub use table::{tsdb_ml_kill_me, tsdb_ml_new_s, tsdb_ml_tls_s, TsdbMl, TsdbV3Reader, BUILD_VERSION};
