///
/// Live pointer registry.
///
/// Every pointer the shim hands out for later release (function tables,
/// result sets, readers, table loaders) is recorded here by address.
/// Release paths remove the entry first and only touch memory when the
/// entry existed, so unknown or already released pointers are reported
/// instead of freed twice.
///

use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Live {
    Table,
    ResultSet,
    Reader,
}

static LIVE: LazyLock<Mutex<HashMap<usize, Live>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

fn live() -> MutexGuard<'static, HashMap<usize, Live>> {
    LIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn register<T>(ptr: *mut T, kind: Live) -> *mut T {
    if !ptr.is_null() {
        live().insert(ptr as usize, kind);
    }
    ptr
}

pub fn kind_of(ptr: *const c_void) -> Option<Live> {
    live().get(&(ptr as usize)).copied()
}

/// Removes `ptr` if it is live and of `kind`.
pub fn take(ptr: *const c_void, kind: Live) -> bool {
    let mut live = live();
    match live.get(&(ptr as usize)) {
        Some(&k) if k == kind => {
            live.remove(&(ptr as usize));
            true
        }
        _ => false,
    }
}
