//! FFI bindings for Kinesense
//!
//! This module provides C-compatible functions for calling Kinesense from other
//! languages. All functions use C strings (null-terminated) and return allocated
//! memory that must be freed by the caller using `kinesense_free_string`.
//!
//! Analysis calls always return a JSON result object, even when the detector
//! failed; NULL is reserved for caller errors (bad pointers, bad config).

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use std::ptr;
use std::sync::Arc;

use crate::config::{AppConfig, DetectorConfig};
use crate::error::DetectError;
use crate::estimator::PrecomputedEstimator;
use crate::pipeline::BehaviorAnalyzer;
use crate::posture::{FilePostureStore, PostureStore};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Build an analyzer from optional landmarks JSON, config JSON and state file path.
///
/// A missing state file falls back to the default per-user location. Without
/// landmarks the analyzer sees no hands, feet or faces.
fn build_analyzer(
    landmarks_json: Option<String>,
    config_json: Option<String>,
    state_file: Option<String>,
) -> Result<BehaviorAnalyzer, DetectError> {
    let config = match config_json.filter(|s| !s.trim().is_empty()) {
        Some(json) => DetectorConfig::from_json(&json)?,
        None => DetectorConfig::default(),
    };
    let state_file = state_file
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| AppConfig::default().state_file);
    let analyzer = BehaviorAnalyzer::new(config, Arc::new(FilePostureStore::new(state_file)));
    match landmarks_json.filter(|s| !s.trim().is_empty()) {
        Some(json) => Ok(analyzer.with_estimator(Arc::new(PrecomputedEstimator::from_json(&json)?))),
        None => Ok(analyzer),
    }
}

// ============================================================================
// Analysis API
// ============================================================================

/// Analyze one behavior payload and return the result JSON.
///
/// # Safety
/// - `behavior` and `payload_json` must be valid null-terminated C strings.
/// - `landmarks_json` holds `{"frames": [{"hands", "pose", "face"}]}` keyed by
///   frame index; NULL means no landmarks.
/// - `config_json` and `state_file` may be NULL for defaults.
/// - Returns a newly allocated string that must be freed with `kinesense_free_string`.
/// - Returns NULL on caller error; call `kinesense_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn kinesense_analyze(
    behavior: *const c_char,
    payload_json: *const c_char,
    landmarks_json: *const c_char,
    config_json: *const c_char,
    state_file: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let behavior_str = match cstr_to_string(behavior) {
        Some(s) => s,
        None => {
            set_last_error("Invalid behavior string pointer");
            return ptr::null_mut();
        }
    };

    let payload_str = match cstr_to_string(payload_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid payload string pointer");
            return ptr::null_mut();
        }
    };

    let analyzer = match build_analyzer(
        cstr_to_string(landmarks_json),
        cstr_to_string(config_json),
        cstr_to_string(state_file),
    ) {
        Ok(analyzer) => analyzer,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    let result = analyzer.analyze_json(&behavior_str, &payload_str);
    match serde_json::to_string(&result) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Analyze a batch of tagged entries and return the batch report JSON.
///
/// # Safety
/// - `batch_json` must be a valid null-terminated C string.
/// - `landmarks_json`, `config_json` and `state_file` may be NULL for defaults.
/// - Returns a newly allocated string that must be freed with `kinesense_free_string`.
/// - Returns NULL on error; call `kinesense_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn kinesense_analyze_batch(
    batch_json: *const c_char,
    landmarks_json: *const c_char,
    config_json: *const c_char,
    state_file: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let batch_str = match cstr_to_string(batch_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid batch string pointer");
            return ptr::null_mut();
        }
    };

    let batch = match serde_json::from_str::<serde_json::Value>(&batch_str) {
        Ok(value) => value,
        Err(e) => {
            set_last_error(&DetectError::Json(e).to_string());
            return ptr::null_mut();
        }
    };

    let analyzer = match build_analyzer(
        cstr_to_string(landmarks_json),
        cstr_to_string(config_json),
        cstr_to_string(state_file),
    ) {
        Ok(analyzer) => analyzer,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    match analyzer.analyze_batch(&batch).to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Classifier availability per behavior as a JSON object.
///
/// Reports the registry every C ABI analysis runs with. No gaze classifier is
/// bundled, so `eye_gaze` is `unavailable` and gaze calls use the motion-only
/// fallback. Hosts that load a classifier do so through the Rust API
/// (`BehaviorAnalyzer::with_models`) and query `model_status` there.
///
/// # Safety
/// - Returns a newly allocated string that must be freed with `kinesense_free_string`.
/// - Returns NULL on error; call `kinesense_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn kinesense_model_status() -> *mut c_char {
    clear_last_error();

    let statuses = BehaviorAnalyzer::default().model_status();
    match serde_json::to_string(&statuses) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Reset the persisted posture state to `unknown`.
///
/// # Safety
/// - `state_file` may be NULL for the default location.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `kinesense_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn kinesense_reset_state(state_file: *const c_char) -> i32 {
    clear_last_error();

    let path = cstr_to_string(state_file)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| AppConfig::default().state_file);

    match FilePostureStore::new(path).reset() {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Kinesense functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Kinesense function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn kinesense_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Kinesense function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn kinesense_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Kinesense library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn kinesense_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::tests::data_url;
    use image::{Rgb, RgbImage};
    use serde_json::Value;

    fn take_json(ptr: *mut c_char) -> Value {
        assert!(!ptr.is_null());
        unsafe {
            let json = CStr::from_ptr(ptr).to_str().unwrap().to_string();
            kinesense_free_string(ptr);
            serde_json::from_str(&json).unwrap()
        }
    }

    #[test]
    fn test_ffi_analyze() {
        let dir = tempfile::tempdir().unwrap();
        let state = CString::new(dir.path().join("state.json").to_str().unwrap()).unwrap();
        let behavior = CString::new("rapid_talking").unwrap();
        let payload = CString::new("[180, 190]").unwrap();

        let result = take_json(unsafe {
            kinesense_analyze(behavior.as_ptr(), payload.as_ptr(), ptr::null(), ptr::null(), state.as_ptr())
        });

        assert_eq!(result["detected"], true);
        assert_eq!(result["confidence"], 0.5);
    }

    #[test]
    fn test_ffi_detector_failure_is_still_a_result() {
        let dir = tempfile::tempdir().unwrap();
        let state = CString::new(dir.path().join("state.json").to_str().unwrap()).unwrap();
        let behavior = CString::new("rapid_talking").unwrap();
        let payload = CString::new("not json").unwrap();

        let result = take_json(unsafe {
            kinesense_analyze(behavior.as_ptr(), payload.as_ptr(), ptr::null(), ptr::null(), state.as_ptr())
        });

        assert_eq!(result["detected"], false);
        assert_eq!(result["error"], "invalid_json");
    }

    #[test]
    fn test_ffi_bad_config_sets_last_error() {
        let behavior = CString::new("rapid_talking").unwrap();
        let payload = CString::new("[180]").unwrap();
        let config = CString::new(r#"{ "hands": { "min_methods": 0 } }"#).unwrap();

        unsafe {
            let result =
                kinesense_analyze(
                    behavior.as_ptr(),
                    payload.as_ptr(),
                    ptr::null(),
                    config.as_ptr(),
                    ptr::null(),
                );
            assert!(result.is_null());

            let error = kinesense_last_error();
            assert!(!error.is_null());
            let error_str = CStr::from_ptr(error).to_str().unwrap();
            assert!(error_str.contains("min_methods"));
        }
    }

    fn hand_landmarks(frames: usize) -> String {
        let hand: Vec<[f64; 3]> = vec![[0.5, 0.6, 0.9]; 21];
        let frames: Vec<Value> = (0..frames).map(|_| serde_json::json!({ "hands": [hand] })).collect();
        serde_json::json!({ "frames": frames }).to_string()
    }

    #[test]
    fn test_ffi_landmarks_reach_hand_fusion() {
        let dir = tempfile::tempdir().unwrap();
        let state = CString::new(dir.path().join("state.json").to_str().unwrap()).unwrap();
        let behavior = CString::new("tapping_hands").unwrap();
        let blank = data_url(&RgbImage::from_pixel(32, 24, Rgb([90, 90, 90])));
        let payload = CString::new(serde_json::json!({ "frame_sequence": vec![blank; 4] }).to_string()).unwrap();
        let landmarks = CString::new(hand_landmarks(4)).unwrap();

        let without = take_json(unsafe {
            kinesense_analyze(behavior.as_ptr(), payload.as_ptr(), ptr::null(), ptr::null(), state.as_ptr())
        });
        assert_eq!(without["reason"], "no_hands_detected");

        let with = take_json(unsafe {
            kinesense_analyze(
                behavior.as_ptr(),
                payload.as_ptr(),
                landmarks.as_ptr(),
                ptr::null(),
                state.as_ptr(),
            )
        });
        assert_ne!(with["reason"], "no_hands_detected");
        assert_eq!(with["hand_frames"], 4);
        assert_eq!(with["signals"].as_array().map(Vec::len), Some(3));
        assert_eq!(with["error"], Value::Null);
    }

    #[test]
    fn test_ffi_bad_landmarks_sets_last_error() {
        let batch = CString::new(r#"[{"type": "tapping_hands", "data": []}]"#).unwrap();
        let landmarks = CString::new(r#"{ "frames": 3 }"#).unwrap();

        unsafe {
            let report = kinesense_analyze_batch(batch.as_ptr(), landmarks.as_ptr(), ptr::null(), ptr::null());
            assert!(report.is_null());
            let error = CStr::from_ptr(kinesense_last_error()).to_str().unwrap();
            assert!(error.contains("landmark"));
        }
    }

    #[test]
    fn test_ffi_null_pointer() {
        unsafe {
            let result = kinesense_analyze(ptr::null(), ptr::null(), ptr::null(), ptr::null(), ptr::null());
            assert!(result.is_null());
            assert!(!kinesense_last_error().is_null());
        }
    }

    #[test]
    fn test_ffi_batch_and_reset() {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        let state = CString::new(state_path.to_str().unwrap()).unwrap();
        let batch = CString::new(r#"[{"type": "rapid_talking", "data": [120]}]"#).unwrap();

        let report = take_json(unsafe {
            kinesense_analyze_batch(batch.as_ptr(), ptr::null(), ptr::null(), state.as_ptr())
        });
        assert_eq!(report["total_analyzed"], 1);
        assert_eq!(report["results"][0]["label"], 0);

        assert_eq!(unsafe { kinesense_reset_state(state.as_ptr()) }, 0);
        assert!(state_path.exists());
    }

    #[test]
    fn test_ffi_model_status_and_version() {
        let statuses = take_json(unsafe { kinesense_model_status() });
        assert_eq!(statuses["sit_stand"], "ready");
        assert_eq!(statuses["eye_gaze"], "unavailable");

        unsafe {
            let version = CStr::from_ptr(kinesense_version()).to_str().unwrap();
            assert!(!version.is_empty());
        }
    }
}
