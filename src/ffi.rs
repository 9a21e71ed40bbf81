//! FFI bindings for Strike Flux
//!
//! C-compatible functions for driving a session from a host application (the
//! mobile or desktop process that owns the radio). Strings returned by these
//! functions are allocated here and must be freed with `strike_free_string`.
//!
//! Sources are passed as integers: 0 = left, 1 = right.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::slice;

use crate::config::AnalyticsConfig;
use crate::coordinator::SessionCoordinator;
use crate::error::AnalyticsError;
use crate::types::Source;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn source_from_int(source: c_int) -> Result<Source, AnalyticsError> {
    match source {
        0 => Ok(Source::Left),
        1 => Ok(Source::Right),
        other => Err(AnalyticsError::UnknownSource(other.to_string())),
    }
}

/// Opaque handle to a session
pub struct StrikeSessionHandle {
    coordinator: SessionCoordinator,
}

unsafe fn handle_ref<'a>(session: *const StrikeSessionHandle) -> Option<&'a StrikeSessionHandle> {
    if session.is_null() {
        set_last_error("Null session pointer");
        return None;
    }
    Some(&*session)
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Create a session.
///
/// # Safety
/// - `config_json` must be NULL (defaults) or a valid null-terminated C string.
/// - Must be freed with `strike_session_free`.
/// - Returns NULL on invalid configuration; call `strike_last_error`.
#[no_mangle]
pub unsafe extern "C" fn strike_session_new(config_json: *const c_char) -> *mut StrikeSessionHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        AnalyticsConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match AnalyticsConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    match SessionCoordinator::try_new(config) {
        Ok(coordinator) => Box::into_raw(Box::new(StrikeSessionHandle { coordinator })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a session.
///
/// # Safety
/// - `session` must be a pointer returned by `strike_session_new`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn strike_session_free(session: *mut StrikeSessionHandle) {
    if !session.is_null() {
        drop(Box::from_raw(session));
    }
}

/// Apply a lifecycle command. Returns 0 on success, -1 on a null handle.
unsafe fn with_session(
    session: *const StrikeSessionHandle,
    f: impl FnOnce(&SessionCoordinator),
) -> c_int {
    clear_last_error();
    match handle_ref(session) {
        Some(handle) => {
            f(&handle.coordinator);
            0
        }
        None => -1,
    }
}

/// Start a fresh session.
///
/// # Safety
/// - `session` must be a valid pointer returned by `strike_session_new`.
#[no_mangle]
pub unsafe extern "C" fn strike_session_start(session: *const StrikeSessionHandle) -> c_int {
    with_session(session, SessionCoordinator::start)
}

/// Clear statistics and return to inactive.
///
/// # Safety
/// - `session` must be a valid pointer returned by `strike_session_new`.
#[no_mangle]
pub unsafe extern "C" fn strike_session_reset(session: *const StrikeSessionHandle) -> c_int {
    with_session(session, SessionCoordinator::reset)
}

/// Pause an active session.
///
/// # Safety
/// - `session` must be a valid pointer returned by `strike_session_new`.
#[no_mangle]
pub unsafe extern "C" fn strike_session_pause(session: *const StrikeSessionHandle) -> c_int {
    with_session(session, SessionCoordinator::pause)
}

/// Resume a paused session.
///
/// # Safety
/// - `session` must be a valid pointer returned by `strike_session_new`.
#[no_mangle]
pub unsafe extern "C" fn strike_session_resume(session: *const StrikeSessionHandle) -> c_int {
    with_session(session, SessionCoordinator::resume)
}

/// Refresh elapsed time. Hosts without their own timer call this once a second.
///
/// # Safety
/// - `session` must be a valid pointer returned by `strike_session_new`.
#[no_mangle]
pub unsafe extern "C" fn strike_session_tick(session: *const StrikeSessionHandle) -> c_int {
    with_session(session, SessionCoordinator::tick)
}

/// Stop the session and return the final snapshot as JSON.
///
/// # Safety
/// - `session` must be a valid pointer returned by `strike_session_new`.
/// - Returns a newly allocated string that must be freed with `strike_free_string`.
#[no_mangle]
pub unsafe extern "C" fn strike_session_stop(session: *const StrikeSessionHandle) -> *mut c_char {
    clear_last_error();
    let Some(handle) = handle_ref(session) else {
        return ptr::null_mut();
    };

    let final_state = handle.coordinator.stop();
    match serde_json::to_string(&final_state) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Transport Input
// ============================================================================

/// Feed one raw telemetry frame.
///
/// Returns the detected punch as a JSON object, or the string `null` when the
/// frame produced no punch.
///
/// # Safety
/// - `session` must be a valid pointer returned by `strike_session_new`.
/// - `data` must point to `len` readable bytes.
/// - Returns a newly allocated string that must be freed with `strike_free_string`.
/// - Returns NULL on a malformed frame or bad source; call `strike_last_error`.
#[no_mangle]
pub unsafe extern "C" fn strike_session_on_frame(
    session: *const StrikeSessionHandle,
    source: c_int,
    data: *const u8,
    len: usize,
) -> *mut c_char {
    clear_last_error();
    let Some(handle) = handle_ref(session) else {
        return ptr::null_mut();
    };

    if data.is_null() {
        set_last_error("Null frame pointer");
        return ptr::null_mut();
    }

    let source = match source_from_int(source) {
        Ok(source) => source,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let bytes = slice::from_raw_parts(data, len);
    let result = handle
        .coordinator
        .on_frame(source, bytes)
        .and_then(|event| Ok(serde_json::to_string(&event)?));

    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Report a source connecting or disconnecting. Returns 0 on success, -1 on error.
///
/// # Safety
/// - `session` must be a valid pointer returned by `strike_session_new`.
#[no_mangle]
pub unsafe extern "C" fn strike_session_on_connectivity(
    session: *const StrikeSessionHandle,
    source: c_int,
    connected: bool,
) -> c_int {
    clear_last_error();
    let Some(handle) = handle_ref(session) else {
        return -1;
    };

    match source_from_int(source) {
        Ok(source) => {
            handle.coordinator.on_connectivity_change(source, connected);
            0
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Current session snapshot as JSON.
///
/// # Safety
/// - `session` must be a valid pointer returned by `strike_session_new`.
/// - Returns a newly allocated string that must be freed with `strike_free_string`.
#[no_mangle]
pub unsafe extern "C" fn strike_session_snapshot_json(session: *const StrikeSessionHandle) -> *mut c_char {
    clear_last_error();
    let Some(handle) = handle_ref(session) else {
        return ptr::null_mut();
    };

    match serde_json::to_string(&handle.coordinator.snapshot()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Strike Flux functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Strike Flux function, or NULL.
#[no_mangle]
pub unsafe extern "C" fn strike_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - The returned pointer is valid until the next Strike Flux call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn strike_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn strike_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
