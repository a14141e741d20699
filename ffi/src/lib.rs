//! C-ABI request engine.
//!
//! # Overview
//! Builds as a shared library exporting the four engine entry points that
//! `relay_core::NativeEngine` loads at runtime. Any language with a C FFI
//! can drive it directly: payloads and results are NUL-terminated base64
//! strings, handles are plain `uint64_t`.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Failure is signalled in-band: NULL from `relay_engine_send`, `0` from
//!   `relay_engine_submit`. NULL from `relay_engine_check` means "not ready".
//! - Every non-NULL string returned to the caller must be released with
//!   `relay_engine_free`.
//! - The exports delegate to one process-wide [`ReferenceEngine`].

pub mod engine;
pub mod transport;

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::catch_unwind;

use relay_core::Engine;

pub use engine::ReferenceEngine;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Borrow a caller-supplied payload. `None` for null or non-UTF-8 input.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn read_payload<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Hand a string to the C caller, who must free it with `relay_engine_free`.
fn into_c_string(s: String) -> *mut c_char {
    CString::new(s).map_or(std::ptr::null_mut(), CString::into_raw)
}

// ---------------------------------------------------------------------------
// Blocking request
// ---------------------------------------------------------------------------

/// Run a request to completion on the calling thread.
///
/// Returns the encoded result, or null if `payload` is null, malformed or
/// names no url.
#[unsafe(no_mangle)]
pub extern "C" fn relay_engine_send(payload: *const c_char) -> *mut c_char {
    catch_unwind(|| {
        let Some(payload) = (unsafe { read_payload(payload) }) else {
            return std::ptr::null_mut();
        };
        ReferenceEngine::global()
            .send(payload)
            .map_or(std::ptr::null_mut(), into_c_string)
    })
    .unwrap_or(std::ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Submit / check
// ---------------------------------------------------------------------------

/// Start a request in the background.
///
/// Returns a non-zero handle, or `0` if the payload was rejected.
#[unsafe(no_mangle)]
pub extern "C" fn relay_engine_submit(payload: *const c_char) -> u64 {
    catch_unwind(|| match unsafe { read_payload(payload) } {
        Some(payload) => ReferenceEngine::global().submit(payload),
        None => 0,
    })
    .unwrap_or(0)
}

/// Check a submitted request.
///
/// Returns null while the request is still running. A non-null result
/// consumes the handle; checking it again reports an unknown handle.
#[unsafe(no_mangle)]
pub extern "C" fn relay_engine_check(handle: u64) -> *mut c_char {
    catch_unwind(|| {
        ReferenceEngine::global()
            .check(handle)
            .map_or(std::ptr::null_mut(), into_c_string)
    })
    .unwrap_or(std::ptr::null_mut())
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a string returned by `relay_engine_send` or `relay_engine_check`.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn relay_engine_free(result: *mut c_char) {
    if !result.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(result) });
        });
    }
}
