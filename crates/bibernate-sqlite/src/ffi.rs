//! Raw libsqlite3 bindings plus a few safe helpers.
//!
//! The bindings and the bundled SQLite build come from `libsqlite3-sys`.

#![allow(non_camel_case_types)]

pub use libsqlite3_sys::*;

use std::ffi::{CStr, c_int};

/// Get the SQLite library version as a string.
pub fn version() -> &'static str {
    // SAFETY: sqlite3_libversion returns a static string
    unsafe {
        let ptr = sqlite3_libversion();
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown")
    }
}

/// Get the SQLite library version as a number.
pub fn version_number() -> i32 {
    // SAFETY: sqlite3_libversion_number is always safe to call
    unsafe { sqlite3_libversion_number() }
}

/// Convert an SQLite result code to a human-readable string.
pub fn error_string(code: c_int) -> &'static str {
    // SAFETY: sqlite3_errstr returns a static string for every code
    unsafe {
        let ptr = sqlite3_errstr(code);
        if ptr.is_null() {
            return "unknown error";
        }
        CStr::from_ptr(ptr).to_str().unwrap_or("unknown error")
    }
}

/// Latest error message reported on `db`.
///
/// # Safety
/// `db` must be a valid, open connection handle.
pub unsafe fn last_error(db: *mut sqlite3) -> (c_int, String) {
    // SAFETY: the caller guarantees `db` is valid
    unsafe {
        let code = sqlite3_errcode(db);
        let ptr = sqlite3_errmsg(db);
        let message = if ptr.is_null() {
            error_string(code).to_string()
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        };
        (code, message)
    }
}
