//! FFI bindings for the FRAM engine
//!
//! C-compatible entry points over the JSON request/response contract. All
//! functions take null-terminated C strings and return allocated memory that
//! must be freed by the caller using `fram_free_string`.
//!
//! Scoring failures are not FFI errors: they come back inside the response
//! JSON as `ErrorNumber`/`ErrorDescription`. NULL is returned only when the
//! input cannot be read at all.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::pipeline::{workload_scores, ScoreGenerator};
use crate::sleepwake::SimulationConfig;
use crate::types::{FrmModelRequest, FrmModelResponse};

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

unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Read a request; JSON `null` is an absent request
unsafe fn read_request(json: *const c_char) -> Result<Option<FrmModelRequest>, String> {
    let text = cstr_to_str(json).ok_or_else(|| "Invalid request string pointer".to_string())?;
    serde_json::from_str(text).map_err(|e| format!("Invalid request JSON: {e}"))
}

fn write_response(response: &FrmModelResponse) -> *mut c_char {
    match serde_json::to_string(response) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// Score a JSON request and return the JSON response.
///
/// # Safety
/// - `request_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `fram_free_string`.
/// - Returns NULL if the request cannot be read; call `fram_last_error` for the reason.
#[no_mangle]
pub unsafe extern "C" fn fram_generate(request_json: *const c_char) -> *mut c_char {
    fram_generate_with_config(request_json, ptr::null())
}

/// Score a JSON request with simulation limits read from `config_json`.
///
/// # Safety
/// - `request_json` must be a valid null-terminated C string.
/// - `config_json` must be a valid null-terminated C string or NULL for defaults.
/// - Returns a newly allocated string that must be freed with `fram_free_string`.
/// - Returns NULL if either input cannot be read; call `fram_last_error` for the reason.
#[no_mangle]
pub unsafe extern "C" fn fram_generate_with_config(
    request_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let config = if config_json.is_null() {
        SimulationConfig::default()
    } else {
        let parsed = cstr_to_str(config_json)
            .ok_or_else(|| "Invalid config string pointer".to_string())
            .and_then(|text| serde_json::from_str(text).map_err(|e| format!("Invalid config JSON: {e}")));
        match parsed {
            Ok(config) => config,
            Err(msg) => {
                set_last_error(&msg);
                return ptr::null_mut();
            }
        }
    };

    match read_request(request_json) {
        Ok(request) => write_response(&ScoreGenerator::with_config(config).generate(request.as_ref())),
        Err(msg) => {
            set_last_error(&msg);
            ptr::null_mut()
        }
    }
}

/// Return only the FRAM workload scores of a JSON request.
///
/// # Safety
/// - `request_json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `fram_free_string`.
/// - Returns NULL if the request cannot be read; call `fram_last_error` for the reason.
#[no_mangle]
pub unsafe extern "C" fn fram_workload_scores(request_json: *const c_char) -> *mut c_char {
    clear_last_error();

    match read_request(request_json) {
        Ok(request) => write_response(&workload_scores(request.as_ref())),
        Err(msg) => {
            set_last_error(&msg);
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by the engine.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a `fram_` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn fram_free_string(ptr: *mut c_char) {
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
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next `fram_` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn fram_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn fram_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::tests::make_test_request;

    fn request_json(ordinals: &[i32]) -> CString {
        CString::new(serde_json::to_string(&make_test_request(ordinals)).unwrap()).unwrap()
    }

    unsafe fn take_response(ptr: *mut c_char) -> serde_json::Value {
        assert!(!ptr.is_null());
        let value = serde_json::from_str(CStr::from_ptr(ptr).to_str().unwrap()).unwrap();
        fram_free_string(ptr);
        value
    }

    #[test]
    fn test_ffi_generate() {
        let json = request_json(&[1, 2]);
        unsafe {
            let response = take_response(fram_generate(json.as_ptr()));
            assert_eq!(response["ErrorNumber"], 0);
            assert_eq!(response["FRMScore"].as_array().map(Vec::len), Some(2));
            assert_eq!(response["WorkloadScore"].as_array().map(Vec::len), Some(2));
            assert!(fram_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_null_request_is_reported_in_response() {
        let json = CString::new("null").unwrap();
        unsafe {
            let response = take_response(fram_generate(json.as_ptr()));
            assert_eq!(response["ErrorNumber"], 1001);
            assert!(response["FRMScore"].is_null());
        }
    }

    #[test]
    fn test_ffi_workload_scores() {
        let json = request_json(&[1, 2, 3]);
        unsafe {
            let response = take_response(fram_workload_scores(json.as_ptr()));
            assert_eq!(response["ErrorNumber"], 0);
            assert!(response["FRMScore"].is_null());
            assert_eq!(response["WorkloadScore"].as_array().map(Vec::len), Some(3));
        }
    }

    #[test]
    fn test_ffi_generate_with_config() {
        let json = request_json(&[1]);
        let config = CString::new(r#"{"max_filter_steps": 50}"#).unwrap();
        unsafe {
            let response = take_response(fram_generate_with_config(json.as_ptr(), config.as_ptr()));
            assert_eq!(response["ErrorNumber"], 0);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let invalid = CString::new("not json").unwrap();
            assert!(fram_generate(invalid.as_ptr()).is_null());
            let error = fram_last_error();
            assert!(!error.is_null());
            let message = CStr::from_ptr(error).to_str().unwrap();
            assert!(message.starts_with("Invalid request JSON"));

            assert!(fram_generate(ptr::null()).is_null());
            let bad_config = CString::new("[").unwrap();
            let json = request_json(&[1]);
            assert!(fram_generate_with_config(json.as_ptr(), bad_config.as_ptr()).is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = fram_version();
            assert!(!version.is_null());
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
    }
}
