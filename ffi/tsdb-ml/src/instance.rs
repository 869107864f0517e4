///
/// Driver instances behind `tsdb_ml_t` and the process default.
///
/// A `tsdb_ml_t` owns one `Instance` through `inner_handle`. Calls that
/// receive a `self` pointer use that instance; calls without one (and
/// calls given a NULL `self`) use the process default, which is the most
/// recently created instance that has not been killed.
///

use std::collections::HashMap;
use std::ffi::{c_char, c_void};
use std::ptr;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

use tsdb_driver::{Charset, Connection, DriverError, Registry};

use crate::layout::{CText, V3FieldArray};
use crate::logging;
use crate::table::TsdbMl;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(|| Registry::new(logging::load_config()));

/// Accessors whose returned string the instance keeps alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accessor {
    Charset,
    UserName,
    ServerAddr,
    DbCurrent,
}

pub struct Instance {
    pub conn: Connection,
    strings: HashMap<Accessor, CText>,
    v3_fields: Option<V3FieldArray>,
}

impl Instance {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            strings: HashMap::new(),
            v3_fields: None,
        }
    }

    /// Stores `text` for `accessor` and returns a pointer valid until the
    /// same accessor is called again on this instance.
    pub fn hold_string(&mut self, accessor: Accessor, text: &str) -> *const c_char {
        // charset names stay narrow so they can be passed back to charset_set
        let charset = match accessor {
            Accessor::Charset => Charset::Utf8,
            _ => self.conn.charset(),
        };
        let s = CText::new(text, charset);
        let ptr = s.as_ptr();
        self.strings.insert(accessor, s);
        ptr
    }

    pub fn hold_v3_fields(&mut self, fields: Option<V3FieldArray>) -> *mut *mut crate::layout::TsdbV3Field {
        self.v3_fields = fields;
        match self.v3_fields.as_mut() {
            Some(array) => array.as_ptr(),
            None => ptr::null_mut(),
        }
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

pub(crate) fn lock(instance: &Mutex<Instance>) -> MutexGuard<'_, Instance> {
    instance.lock().unwrap_or_else(PoisonError::into_inner)
}

struct DefaultSlot(*mut TsdbMl);

// The pointer is only dereferenced while the slot's lock is held.
unsafe impl Send for DefaultSlot {}

static DEFAULT: LazyLock<Mutex<DefaultSlot>> = LazyLock::new(|| Mutex::new(DefaultSlot(ptr::null_mut())));

fn default_slot() -> MutexGuard<'static, DefaultSlot> {
    DEFAULT.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn set_default(table: *mut TsdbMl) {
    default_slot().0 = table;
}

/// Clears the default if it is `table`.
pub(crate) fn clear_default(table: *mut TsdbMl) {
    let mut slot = default_slot();
    if slot.0 == table {
        slot.0 = ptr::null_mut();
    }
}

unsafe fn instance_of<'a>(table: *mut TsdbMl) -> Option<&'a Mutex<Instance>> {
    if table.is_null() {
        return None;
    }
    let inner = unsafe { (*table).inner_handle } as *const Mutex<Instance>;
    if inner.is_null() {
        return None;
    }
    Some(unsafe { &*inner })
}

/// Runs `f` on the default instance, or returns `fallback` if there is none.
pub(crate) fn with_default<R>(fallback: R, f: impl FnOnce(&mut Instance) -> R) -> R {
    let slot = default_slot();
    match unsafe { instance_of(slot.0) } {
        Some(instance) => f(&mut lock(instance)),
        None => fallback,
    }
}

/// Runs `f` on the instance behind `table`, or on the default for NULL.
pub(crate) unsafe fn with_instance<R>(table: *mut TsdbMl, fallback: R, f: impl FnOnce(&mut Instance) -> R) -> R {
    if table.is_null() {
        return with_default(fallback, f);
    }
    match unsafe { instance_of(table) } {
        Some(instance) => f(&mut lock(instance)),
        None => fallback,
    }
}

/// Return code for a driver result.
pub(crate) fn code_of(result: Result<(), DriverError>) -> i32 {
    match result {
        Ok(()) => tsdb_driver::TSDB_ML_RET_OK,
        Err(e) => {
            tracing::warn!(code = e.code(), "{}", e);
            e.code()
        }
    }
}

pub(crate) fn boxed_instance(conn: Connection) -> *mut c_void {
    Box::into_raw(Box::new(Mutex::new(Instance::new(conn)))).cast()
}

/// Takes back the instance created by `boxed_instance`.
pub(crate) unsafe fn unbox_instance(inner: *mut c_void) -> Option<Instance> {
    if inner.is_null() {
        return None;
    }
    let instance = unsafe { Box::from_raw(inner.cast::<Mutex<Instance>>()) };
    Some(instance.into_inner().unwrap_or_else(PoisonError::into_inner))
}
