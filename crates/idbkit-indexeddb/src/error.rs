//! Error conversion for the IndexedDB engine
//!
//! IndexedDB reports failures as `DOMException`s (or, for a few wrappers
//! we raise ourselves, plain JS `Error`s). Both are mapped to
//! [`EngineError`] by name so callers see the same kinds the in-memory
//! engine produces.

use idbkit_core::{EngineError, EngineErrorKind};
use thiserror::Error;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::DomException;

/// Faults raised on the Rust side of the bridge, before or after a request.
#[derive(Debug, Error)]
pub enum IndexedDbError {
    /// IndexedDB is not available in this environment
    #[error("IndexedDB not available: {0}")]
    NotAvailable(String),

    /// JSON conversion between records and JS values failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JavaScript value was not the shape we expected
    #[error("JS conversion error: {0}")]
    JsValue(String),
}

impl From<IndexedDbError> for EngineError {
    fn from(err: IndexedDbError) -> Self {
        match err {
            IndexedDbError::NotAvailable(msg) => {
                EngineError::new(EngineErrorKind::NotAvailable, msg)
            }
            IndexedDbError::Json(e) => EngineError::data(e.to_string()),
            IndexedDbError::JsValue(msg) => EngineError::data(msg),
        }
    }
}

/// Map a thrown or rejected JS value to an [`EngineError`].
pub fn js_error(value: &JsValue) -> EngineError {
    if let Some(dom) = value.dyn_ref::<DomException>() {
        return EngineError::new(EngineErrorKind::from_name(&dom.name()), dom.message());
    }
    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        let name = String::from(err.name());
        return EngineError::new(EngineErrorKind::from_name(&name), String::from(err.message()));
    }
    let message = value.as_string().unwrap_or_else(|| format!("{:?}", value));
    EngineError::new(EngineErrorKind::Unknown, message)
}

/// Build a JS `Error` carrying an engine error's name and message.
pub fn to_js_error(err: &EngineError) -> js_sys::Error {
    let js = js_sys::Error::new(&err.message);
    js.set_name(err.kind.name());
    js
}
