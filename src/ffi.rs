//! FFI interface for a native host
//!
//! Provides C-compatible functions for entity extraction and annotation.
//! All results are passed back as JSON for simplicity and type safety.

use std::ffi::{c_char, CStr, CString};
use std::ptr;

use serde::Serialize;

use crate::annotate::action_links;
use crate::config::PipelineConfig;
use crate::dom::Document;
use crate::extractor::extract_entities;
use crate::orchestrator::{ScanOrchestrator, ScanReport};
use crate::patterns::{EntityKind, PatternLibrary};

/// Result struct returned to the host
/// Both pointers are owned by Rust and must be freed via osint_free_result
#[repr(C)]
pub struct OsintResultFFI {
    /// JSON-serialized result (null-terminated)
    pub json_ptr: *mut c_char,
    /// Error message if the call failed (null-terminated), or null on success
    pub error_ptr: *mut c_char,
}

#[derive(Serialize)]
struct AnnotatedHtml {
    html: String,
    report: ScanReport,
}

/// Extract entities from UTF-8 text with the built-in pattern library.
///
/// # Safety
/// - `text_ptr` must point to valid memory of at least `text_len` bytes
/// - Caller must free the result via `osint_free_result`
#[no_mangle]
pub unsafe extern "C" fn osint_extract_entities(
    text_ptr: *const c_char,
    text_len: usize,
) -> OsintResultFFI {
    let text = match read_utf8(text_ptr, text_len) {
        Ok(s) => s,
        Err(msg) => return make_error_result(msg),
    };
    make_json_result(&extract_entities(text))
}

/// Action links for an entity kind and raw value.
///
/// # Safety
/// - `kind` and `value` must be valid null-terminated C strings
#[no_mangle]
pub unsafe extern "C" fn osint_action_links(
    kind: *const c_char,
    value: *const c_char,
) -> OsintResultFFI {
    let kind = match read_cstr(kind, "kind") {
        Ok(s) => s,
        Err(msg) => return make_error_result(&msg),
    };
    let value = match read_cstr(value, "value") {
        Ok(s) => s,
        Err(msg) => return make_error_result(&msg),
    };
    let kind: EntityKind = match kind.parse() {
        Ok(k) => k,
        Err(msg) => return make_error_result(&msg),
    };
    make_json_result(&action_links(kind, value))
}

/// Run one scan pass over markup and return the annotated markup plus report.
///
/// # Safety
/// - `html_ptr` must point to valid memory of at least `html_len` bytes
/// - `config_json` must be null or a valid null-terminated C string
#[no_mangle]
pub unsafe extern "C" fn osint_annotate_html(
    html_ptr: *const c_char,
    html_len: usize,
    config_json: *const c_char,
) -> OsintResultFFI {
    let html = match read_utf8(html_ptr, html_len) {
        Ok(s) => s,
        Err(msg) => return make_error_result(msg),
    };

    let config = if config_json.is_null() {
        PipelineConfig::default()
    } else {
        let raw = match read_cstr(config_json, "config") {
            Ok(s) => s,
            Err(msg) => return make_error_result(&msg),
        };
        match PipelineConfig::from_json(raw) {
            Ok(c) => c,
            Err(e) => return make_error_result(&e.to_string()),
        }
    };

    let orchestrator = match ScanOrchestrator::from_config(&config, PatternLibrary::builtin()) {
        Ok(o) => o,
        Err(e) => return make_error_result(&e.to_string()),
    };

    let mut document = Document::parse(html);
    let report = orchestrator.scan(&mut document);
    make_json_result(&AnnotatedHtml {
        html: document.to_html(),
        report,
    })
}

/// Free an OsintResultFFI returned by any osint_* function
///
/// # Safety
/// - `result` must have been returned by this library
/// - Must only be called once per result
#[no_mangle]
pub unsafe extern "C" fn osint_free_result(result: OsintResultFFI) {
    if !result.json_ptr.is_null() {
        drop(CString::from_raw(result.json_ptr));
    }
    if !result.error_ptr.is_null() {
        drop(CString::from_raw(result.error_ptr));
    }
}

unsafe fn read_utf8<'a>(ptr: *const c_char, len: usize) -> Result<&'a str, &'static str> {
    if ptr.is_null() || len == 0 {
        return Ok("");
    }
    let slice = std::slice::from_raw_parts(ptr as *const u8, len);
    std::str::from_utf8(slice).map_err(|_| "Invalid UTF-8 in input")
}

unsafe fn read_cstr<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, String> {
    if ptr.is_null() {
        return Err(format!("{} is null", what));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| format!("Invalid UTF-8 in {}", what))
}

fn make_json_result<T: Serialize>(value: &T) -> OsintResultFFI {
    match serde_json::to_string(value) {
        Ok(json) => match CString::new(json) {
            Ok(cstr) => OsintResultFFI {
                json_ptr: cstr.into_raw(),
                error_ptr: ptr::null_mut(),
            },
            Err(_) => make_error_result("Result JSON contains null bytes"),
        },
        Err(e) => make_error_result(&format!("Failed to serialize result: {}", e)),
    }
}

// Helper to create error result
fn make_error_result(msg: &str) -> OsintResultFFI {
    let error_cstr = CString::new(msg).unwrap_or_else(|_| CString::from(c"Unknown error"));
    OsintResultFFI {
        json_ptr: ptr::null_mut(),
        error_ptr: error_cstr.into_raw(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn take(result: OsintResultFFI) -> Result<serde_json::Value, String> {
        let out = if !result.json_ptr.is_null() {
            let json = CStr::from_ptr(result.json_ptr).to_str().unwrap();
            Ok(serde_json::from_str(json).unwrap())
        } else {
            Err(CStr::from_ptr(result.error_ptr).to_str().unwrap().to_string())
        };
        osint_free_result(result);
        out
    }

    #[test]
    fn test_extract_entities_ffi() {
        let text = "Call +1 (555) 123-4567 or email a@b.com";
        let value = unsafe { take(osint_extract_entities(text.as_ptr() as *const c_char, text.len())) }
            .unwrap();
        assert_eq!(value[0]["kind"], "phone");
        assert_eq!(value[0]["value"], "+1 (555) 123-4567");
        assert_eq!(value[1]["kind"], "email");
        assert_eq!(value[1]["offset"], 32);
    }

    #[test]
    fn test_null_text_is_empty() {
        let value = unsafe { take(osint_extract_entities(ptr::null(), 0)) }.unwrap();
        assert_eq!(value, serde_json::json!([]));
    }

    #[test]
    fn test_action_links_ffi() {
        let kind = CString::new("phone").unwrap();
        let value = CString::new("+1 (555) 123-4567").unwrap();
        let links = unsafe { take(osint_action_links(kind.as_ptr(), value.as_ptr())) }.unwrap();
        assert_eq!(links[0]["href"], "https://wa.me/15551234567");

        let bad = CString::new("ssn").unwrap();
        let err = unsafe { take(osint_action_links(bad.as_ptr(), value.as_ptr())) }.unwrap_err();
        assert!(err.contains("unknown entity kind"));
    }

    #[test]
    fn test_annotate_html_ffi() {
        let html = r#"<div class="message-in"><span class="selectable-text">mail a@b.com</span></div>"#;
        let value = unsafe {
            take(osint_annotate_html(
                html.as_ptr() as *const c_char,
                html.len(),
                ptr::null(),
            ))
        }
        .unwrap();
        assert_eq!(value["report"]["indicators_attached"], 1);
        assert!(value["html"].as_str().unwrap().contains("osint-indicator"));
    }

    #[test]
    fn test_annotate_html_bad_config() {
        let html = "<p></p>";
        let config = CString::new(r#"{"text_selector": "span["}"#).unwrap();
        let err = unsafe {
            take(osint_annotate_html(
                html.as_ptr() as *const c_char,
                html.len(),
                config.as_ptr(),
            ))
        }
        .unwrap_err();
        assert!(err.contains("invalid selector"));
    }
}
