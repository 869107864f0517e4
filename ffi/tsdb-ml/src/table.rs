///
/// The `tsdb_ml_t` function table and its versioned factories.
///

use std::ffi::{c_char, c_int, c_void, CStr};
use std::ptr;

use tracing::{info, warn};
use tsdb_driver::{Connection, TSDB_ML_VERSION};

use crate::functions::*;
use crate::handles::{self, Live};
use crate::instance::{self, REGISTRY};
use crate::layout::{TsdbMlField, TsdbResultSet, TsdbV3Field};
use crate::logging;

/// NUL-terminated `CARGO_PKG_VERSION`.
pub const BUILD_VERSION: &CStr = match CStr::from_bytes_with_nul(concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes()) {
    Ok(s) => s,
    Err(_) => c"unknown",
};

/// Opaque `tsdb_v3_reader_t`: a legacy result reader or a table loader.
pub enum TsdbV3Reader {
    Rows(tsdb_driver::StreamingReader),
    Table(tsdb_driver::TableLoader),
}

pub type TsdbBool = c_int;

#[repr(C)]
pub struct TsdbMl {
    pub version: u64,
    pub build_version: *const c_char,
    pub inner_handle: *mut c_void,

    pub kill_me: unsafe extern "C" fn(*mut TsdbMl),
    pub connect: unsafe extern "C" fn(*const c_char) -> c_int,
    pub disconnect: extern "C" fn() -> c_int,
    pub is_logined: extern "C" fn() -> TsdbBool,
    pub charset_get: extern "C" fn() -> *const c_char,
    pub charset_set: unsafe extern "C" fn(*const c_char) -> c_int,
    pub user_name: unsafe extern "C" fn(*mut TsdbMl) -> *const c_char,
    pub server_addr_str: unsafe extern "C" fn(*mut TsdbMl) -> *const c_char,
    pub pg_init: unsafe extern "C" fn(*const c_char, *mut c_int) -> c_int,
    pub table_new: unsafe extern "C" fn(*const c_char) -> *mut TsdbV3Reader,
    pub load_csv_file: unsafe extern "C" fn(*const c_char, *mut TsdbV3Reader) -> c_int,
    pub db_current: unsafe extern "C" fn(*mut TsdbMl) -> *const c_char,
    pub query: unsafe extern "C" fn(*mut TsdbMl, *const c_char, c_int, *const c_char, *const c_char) -> c_int,
    pub store_result: unsafe extern "C" fn(*mut TsdbMl) -> *mut TsdbV3Reader,
    pub test: unsafe extern "C" fn(*mut TsdbMl, c_int, *mut *mut c_char) -> c_int,
    pub call_test: unsafe extern "C" fn(*mut TsdbMl, c_int, c_int) -> c_int,
    pub affected_rows: unsafe extern "C" fn(*mut TsdbMl) -> u64,
    pub fetch_fields: unsafe extern "C" fn(*mut TsdbMl) -> *mut *mut TsdbV3Field,
    pub fetch_ml_fields: unsafe extern "C" fn(*mut TsdbMl, *mut c_int) -> *mut *mut TsdbMlField,
    pub store_result_v2: unsafe extern "C" fn(*mut TsdbMl) -> *mut TsdbResultSet,
    pub free_result: unsafe extern "C" fn(*mut TsdbMl, *mut c_void) -> c_int,
}

impl TsdbMl {
    fn new(conn: Connection) -> Self {
        Self {
            version: TSDB_ML_VERSION,
            build_version: BUILD_VERSION.as_ptr(),
            inner_handle: instance::boxed_instance(conn),
            kill_me: tsdb_ml_kill_me,
            connect: tsdb_connect,
            disconnect: tsdb_disconnect,
            is_logined: tsdb_is_logined,
            charset_get: tsdb_charset_get,
            charset_set: tsdb_charset_set,
            user_name: tsdb_user_name,
            server_addr_str: tsdb_server_addr_str,
            pg_init: tsdb_pg_init,
            table_new: tsdb_table_new,
            load_csv_file: tsdb_load_csv_file,
            db_current: tsdb_db_current,
            query: tsdb_query,
            store_result: tsdb_store_result,
            test: tsdb_test,
            call_test: tsdb_call_test,
            affected_rows: tsdb_affected_rows,
            fetch_fields: tsdb_fetch_fields,
            fetch_ml_fields: tsdb_fetch_ml_fields,
            store_result_v2: tsdb_store_result_v2,
            free_result: tsdb_free_result,
        }
    }
}

fn create(version: u64, tls: bool) -> *mut TsdbMl {
    logging::init();
    let conn = if tls {
        REGISTRY.tls_connection(version)
    } else {
        REGISTRY.new_connection(version)
    };
    let conn = match conn {
        Ok(conn) => conn,
        Err(e) => {
            warn!(version, tls, "refusing to create driver instance: {}", e);
            return ptr::null_mut();
        }
    };
    let table = handles::register(Box::into_raw(Box::new(TsdbMl::new(conn))), Live::Table);
    instance::set_default(table);
    info!(version, tls, "driver instance created");
    table
}

/// Plain driver instance for interface `version`, or NULL when the version
/// is outside `[TSDB_ML_VERSION_LOW, TSDB_ML_VERSION]`. The new instance
/// becomes the process default.
#[unsafe(no_mangle)]
pub extern "C" fn tsdb_ml_new_s(version: u64) -> *mut TsdbMl {
    create(version, false)
}

/// TLS driver instance for interface `version`; see `tsdb_ml_new_s`.
#[unsafe(no_mangle)]
pub extern "C" fn tsdb_ml_tls_s(version: u64) -> *mut TsdbMl {
    create(version, true)
}

/// Disconnects and frees `this` along with everything it owns. Pointers
/// that are not live instances are ignored.
pub unsafe extern "C" fn tsdb_ml_kill_me(this: *mut TsdbMl) {
    if this.is_null() || !handles::take(this.cast(), Live::Table) {
        warn!("kill_me on an unknown driver instance");
        return;
    }
    instance::clear_default(this);
    let table = unsafe { Box::from_raw(this) };
    if let Some(instance) = unsafe { instance::unbox_instance(table.inner_handle) } {
        REGISTRY.kill_me(instance.into_connection());
    }
}
