///
/// Native client library loading for `pg_init`.
///
/// The library is opened with `dlopen`, asked for its version through
/// `PQlibVersion`, and kept loaded until the handle is dropped.
///

use std::ffi::{c_int, c_void, CStr, CString};

use tracing::info;

use crate::error::{DriverError, Result};

/// Oldest accepted client library, as reported by `PQlibVersion` (9.0).
pub const MIN_LIBPQ_VERSION: i32 = 90000;

type LibVersionFn = unsafe extern "C" fn() -> c_int;

pub struct NativeLibrary {
    handle: *mut c_void,
    path: String,
    version: i32,
}

// The handle is only passed to dlsym/dlclose, which are thread-safe.
unsafe impl Send for NativeLibrary {}

fn last_dl_error() -> String {
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        return "unknown dynamic loader error".to_string();
    }
    unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned()
}

impl NativeLibrary {
    pub fn open(path: &str) -> Result<Self> {
        let load_error = |reason: String| DriverError::Load {
            path: path.to_string(),
            reason,
        };
        if path.is_empty() {
            return Err(load_error("empty library path".to_string()));
        }
        let c_path = CString::new(path).map_err(|_| load_error("path contains a NUL byte".to_string()))?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(load_error(last_dl_error()));
        }
        let mut library = Self {
            handle,
            path: path.to_string(),
            version: 0,
        };

        let symbol = unsafe { libc::dlsym(library.handle, c"PQlibVersion".as_ptr()) };
        if symbol.is_null() {
            return Err(load_error("PQlibVersion not found".to_string()));
        }
        let lib_version: LibVersionFn = unsafe { std::mem::transmute::<*mut c_void, LibVersionFn>(symbol) };
        let version = unsafe { lib_version() };
        if version < MIN_LIBPQ_VERSION {
            return Err(load_error(format!(
                "client library version {} is older than {}",
                version, MIN_LIBPQ_VERSION
            )));
        }
        library.version = version;
        info!(path, version, "loaded native client library");
        Ok(library)
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        if !self.handle.is_null() {
            unsafe {
                libc::dlclose(self.handle);
            }
        }
    }
}
