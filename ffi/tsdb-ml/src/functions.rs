///
/// `tsdb_*` functions.
///
/// These are both the free-function interface of `tsdb_ml.h` and the
/// entries of every `tsdb_ml_t` table. Functions without a `self` argument
/// act on the process default instance; functions with one accept NULL to
/// mean the default as well. A `void *self` is a `tsdb_ml_t *`.
///
/// Return codes are `TSDB_ML_RET_OK` or a positive errno value.
///

use std::ffi::{c_char, c_int, c_void, CStr};
use std::path::Path;
use std::ptr;

use tracing::{debug, warn};
use tsdb_driver::{DriverError, TSDB_ML_RET_OK, TSDB_ML_VERSION};

use crate::handles::{self, Live};
use crate::instance::{code_of, with_default, with_instance, Accessor};
use crate::layout::{
    free_ml_fields, free_result_set, ml_fields_into_raw, result_set_into_raw, TsdbMlField, TsdbResultSet,
    TsdbV3Field, V3FieldArray,
};
use crate::table::{tsdb_ml_kill_me, tsdb_ml_new_s, tsdb_ml_tls_s, TsdbBool, TsdbMl, TsdbV3Reader};

unsafe fn opt_str(s: *const c_char) -> Option<String> {
    if s.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned())
}

fn invalid(message: &str) -> c_int {
    code_of(Err(DriverError::InvalidArgs(message.to_string())))
}

#[unsafe(no_mangle)]
pub extern "C" fn tsdb_new() -> *mut TsdbMl {
    tsdb_ml_new_s(TSDB_ML_VERSION)
}

#[unsafe(no_mangle)]
pub extern "C" fn tsdb_tls() -> *mut TsdbMl {
    tsdb_ml_tls_s(TSDB_ML_VERSION)
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_kill_me(this: *mut c_void) {
    unsafe { tsdb_ml_kill_me(this.cast()) }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_connect(conn_str: *const c_char) -> c_int {
    let Some(conn_str) = (unsafe { opt_str(conn_str) }) else {
        return invalid("connection string is NULL");
    };
    with_default(DriverError::NotConnected.code(), |inst| {
        code_of(inst.conn.connect(&conn_str))
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn tsdb_disconnect() -> c_int {
    with_default(TSDB_ML_RET_OK, |inst| code_of(inst.conn.disconnect()))
}

#[unsafe(no_mangle)]
pub extern "C" fn tsdb_is_logined() -> TsdbBool {
    with_default(0, |inst| inst.conn.is_logined() as TsdbBool)
}

#[unsafe(no_mangle)]
pub extern "C" fn tsdb_charset_get() -> *const c_char {
    with_default(ptr::null(), |inst| {
        let name = inst.conn.charset().name();
        inst.hold_string(Accessor::Charset, name)
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_charset_set(charset: *const c_char) -> c_int {
    let Some(charset) = (unsafe { opt_str(charset) }) else {
        return invalid("charset is NULL");
    };
    with_default(DriverError::NotConnected.code(), |inst| {
        code_of(inst.conn.set_charset(&charset))
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_user_name(this: *mut TsdbMl) -> *const c_char {
    unsafe {
        with_instance(this, ptr::null(), |inst| {
            let user = inst.conn.user_name().to_string();
            inst.hold_string(Accessor::UserName, &user)
        })
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_server_addr_str(this: *mut TsdbMl) -> *const c_char {
    unsafe {
        with_instance(this, ptr::null(), |inst| {
            let addr = inst.conn.server_addr().to_string();
            inst.hold_string(Accessor::ServerAddr, &addr)
        })
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_db_current(this: *mut TsdbMl) -> *const c_char {
    unsafe {
        with_instance(this, ptr::null(), |inst| {
            let db = inst.conn.db_current().to_string();
            inst.hold_string(Accessor::DbCurrent, &db)
        })
    }
}

/// Loads the native client library at `libpq_path` into the default
/// instance and writes its version to `version` when non-NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_pg_init(libpq_path: *const c_char, version: *mut c_int) -> c_int {
    let Some(path) = (unsafe { opt_str(libpq_path) }) else {
        return invalid("library path is NULL");
    };
    with_default(DriverError::NotConnected.code(), |inst| match inst.conn.pg_init(&path) {
        Ok(v) => {
            if !version.is_null() {
                unsafe { *version = v };
            }
            TSDB_ML_RET_OK
        }
        Err(e) => code_of(Err(e)),
    })
}

/// Loader for table `table_type`, released with `tsdb_free_result`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_table_new(table_type: *const c_char) -> *mut TsdbV3Reader {
    let Some(table_type) = (unsafe { opt_str(table_type) }) else {
        return ptr::null_mut();
    };
    with_default(ptr::null_mut(), |inst| match inst.conn.table_new(&table_type) {
        Ok(loader) => handles::register(Box::into_raw(Box::new(TsdbV3Reader::Table(loader))), Live::Reader),
        Err(e) => {
            warn!("table_new failed: {}", e);
            ptr::null_mut()
        }
    })
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_load_csv_file(path: *const c_char, reader: *mut TsdbV3Reader) -> c_int {
    let Some(path) = (unsafe { opt_str(path) }) else {
        return invalid("path is NULL");
    };
    if handles::kind_of(reader.cast()) != Some(Live::Reader) {
        return code_of(Err(DriverError::Free("reader is not live".to_string())));
    }
    let TsdbV3Reader::Table(loader) = (unsafe { &mut *reader }) else {
        return invalid("reader is not a table loader");
    };
    with_default(DriverError::NotConnected.code(), |inst| {
        code_of(inst.conn.load_csv_file(Path::new(&path), loader).map(|_| ()))
    })
}

/// Runs `sql_len` bytes of `sql`. NULL or empty `charset` and `database`
/// fall back to the session values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_query(
    this: *mut TsdbMl,
    sql: *const c_char,
    sql_len: c_int,
    charset: *const c_char,
    database: *const c_char,
) -> c_int {
    if sql.is_null() || sql_len < 0 {
        return invalid("sql is NULL or has negative length");
    }
    let sql = unsafe { std::slice::from_raw_parts(sql.cast::<u8>(), sql_len as usize) };
    let charset = unsafe { opt_str(charset) };
    let database = unsafe { opt_str(database) };
    unsafe {
        with_instance(this, DriverError::NotConnected.code(), |inst| {
            code_of(inst.conn.query(sql, charset.as_deref(), database.as_deref()))
        })
    }
}

/// Takes the pending result as a legacy reader, released with
/// `tsdb_free_result`. NULL when nothing is pending.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_store_result(this: *mut TsdbMl) -> *mut TsdbV3Reader {
    unsafe {
        with_instance(this, ptr::null_mut(), |inst| match inst.conn.store_result() {
            Some(reader) => handles::register(Box::into_raw(Box::new(TsdbV3Reader::Rows(reader))), Live::Reader),
            None => ptr::null_mut(),
        })
    }
}

/// Takes the pending result as a `tsdb_result_set_t`, released with
/// `tsdb_free_result`. NULL when nothing is pending.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_store_result_v2(this: *mut TsdbMl) -> *mut TsdbResultSet {
    unsafe {
        with_instance(this, ptr::null_mut(), |inst| match inst.conn.store_result_v2() {
            Some(set) => handles::register(result_set_into_raw(set, inst.conn.charset()), Live::ResultSet),
            None => ptr::null_mut(),
        })
    }
}

/// Releases a result set, reader or table loader. NULL, unknown and
/// already released pointers return `EFAULT`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_free_result(this: *mut TsdbMl, result: *mut c_void) -> c_int {
    let _ = this;
    if result.is_null() {
        return code_of(Err(DriverError::Free("result is NULL".to_string())));
    }
    match handles::kind_of(result) {
        Some(Live::ResultSet) if handles::take(result, Live::ResultSet) => {
            unsafe { free_result_set(result.cast()) };
            debug!("released result set");
            TSDB_ML_RET_OK
        }
        Some(Live::Reader) if handles::take(result, Live::Reader) => {
            let reader = unsafe { Box::from_raw(result.cast::<TsdbV3Reader>()) };
            match *reader {
                TsdbV3Reader::Rows(rows) => {
                    debug!(unread = rows.remaining(), "released reader");
                }
                TsdbV3Reader::Table(loader) => {
                    debug!(table = loader.table(), rows = loader.rows_loaded(), "released table loader");
                }
            }
            TSDB_ML_RET_OK
        }
        _ => code_of(Err(DriverError::Free(format!("{:p} is not a live result", result)))),
    }
}

/// Diagnostic commands; `argv[0]` is a program name. The report goes to
/// stdout.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_test(this: *mut TsdbMl, argc: c_int, argv: *mut *mut c_char) -> c_int {
    if argc < 0 || (argc > 0 && argv.is_null()) {
        return invalid("argc/argv mismatch");
    }
    let mut args = Vec::with_capacity(argc as usize);
    for i in 0..argc as usize {
        match unsafe { opt_str(*argv.add(i)) } {
            Some(arg) => args.push(arg),
            None => return invalid("argv contains NULL"),
        }
    }
    unsafe {
        with_instance(this, DriverError::NotConnected.code(), |inst| match inst.conn.test(args) {
            Ok(report) => {
                println!("{}", report);
                TSDB_ML_RET_OK
            }
            Err(e) => code_of(Err(e)),
        })
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_call_test(this: *mut TsdbMl, req_bytes: c_int, rsp_bytes: c_int) -> c_int {
    if req_bytes < 0 || rsp_bytes < 0 {
        return invalid("negative request or response size");
    }
    unsafe {
        with_instance(this, DriverError::NotConnected.code(), |inst| {
            code_of(inst.conn.call_test(req_bytes as usize, rsp_bytes as usize).map(|_| ()))
        })
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_affected_rows(this: *mut TsdbMl) -> u64 {
    unsafe { with_instance(this, 0, |inst| inst.conn.affected_rows()) }
}

/// NULL-terminated legacy field array for the last result, owned by the
/// instance until the next call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_fetch_fields(this: *mut TsdbMl) -> *mut *mut TsdbV3Field {
    unsafe {
        with_instance(this, ptr::null_mut(), |inst| {
            let charset = inst.conn.charset();
            let array = inst
                .conn
                .fetch_fields()
                .map(|fields| V3FieldArray::new(&fields, charset));
            inst.hold_v3_fields(array)
        })
    }
}

/// Field array for the last result, owned by the caller and released with
/// `destroy_tsdb_ml_fields`. Writes the count to `field_count` when
/// non-NULL (0 when there is no result).
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tsdb_fetch_ml_fields(this: *mut TsdbMl, field_count: *mut c_int) -> *mut *mut TsdbMlField {
    let (fields, count) = unsafe {
        with_instance(this, (ptr::null_mut(), 0), |inst| {
            let charset = inst.conn.charset();
            match inst.conn.fetch_ml_fields() {
                Some(fields) => (ml_fields_into_raw(fields, charset), fields.len()),
                None => (ptr::null_mut(), 0),
            }
        })
    };
    if !field_count.is_null() {
        unsafe { *field_count = count as c_int };
    }
    fields
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn destroy_tsdb_ml_fields(fields: *mut *mut TsdbMlField, field_count: u32) {
    unsafe { free_ml_fields(fields, field_count as usize) }
}

/// Empty result set, released with `tsdb_free_result`.
#[unsafe(no_mangle)]
pub extern "C" fn tsdb_result_set_constructor() -> *mut TsdbResultSet {
    handles::register(Box::into_raw(Box::new(TsdbResultSet::empty())), Live::ResultSet)
}
