//! Record and key conversion between serde_json and JS values
//!
//! Records cross the boundary through `JSON.parse`/`JSON.stringify`, which
//! keeps the structured-clone input to plain objects, arrays, strings,
//! numbers, booleans and null.

use idbkit_core::{is_valid_record_id, EngineError, EngineResult, KeyRange, RecordId};
use serde_json::Value;
use std::ops::Bound;
use wasm_bindgen::JsValue;
use web_sys::IdbKeyRange;

use crate::error::{js_error, IndexedDbError};

/// Serialize a record into a JS value.
pub fn to_js(value: &Value) -> EngineResult<JsValue> {
    let json = serde_json::to_string(value).map_err(IndexedDbError::from)?;
    js_sys::JSON::parse(&json).map_err(|e| js_error(&e))
}

/// Deserialize a JS value read from a store.
pub fn from_js(value: &JsValue) -> EngineResult<Value> {
    if value.is_undefined() {
        return Ok(Value::Null);
    }
    let json: String = js_sys::JSON::stringify(value)
        .map_err(|e| js_error(&e))?
        .into();
    Ok(serde_json::from_str(&json).map_err(IndexedDbError::from)?)
}

/// Deserialize the array returned by `getAll`.
pub fn from_js_array(value: &JsValue) -> EngineResult<Vec<Value>> {
    match from_js(value)? {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(IndexedDbError::JsValue(format!("expected array, got {}", other)).into()),
    }
}

/// A record id as a JS number. Ids above 2^53 would be rounded, so they
/// are rejected with `DataError`.
pub fn key_to_js(key: RecordId) -> EngineResult<JsValue> {
    if !is_valid_record_id(key) {
        return Err(EngineError::data(format!("{} is not a valid record key", key)));
    }
    Ok(JsValue::from_f64(key as f64))
}

/// Read the key resolved by an `add`/`put` request.
pub fn key_from_js(value: &JsValue) -> EngineResult<RecordId> {
    match value.as_f64() {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as RecordId),
        _ => Err(EngineError::data(format!(
            "record key {:?} is not a non-negative integer",
            value
        ))),
    }
}

/// Build the `IDBKeyRange` for a query. `None` means every key.
pub fn key_range_to_js(range: &KeyRange) -> EngineResult<Option<IdbKeyRange>> {
    let js_range = match range {
        KeyRange::All => return Ok(None),
        KeyRange::Only(value) => IdbKeyRange::only(&to_js(value)?),
        KeyRange::Bounded { lower, upper } => match (lower, upper) {
            (Bound::Unbounded, Bound::Unbounded) => return Ok(None),
            (lower, Bound::Unbounded) => {
                let (value, open) = bound_parts(lower)?;
                IdbKeyRange::lower_bound_with_open(&value, open)
            }
            (Bound::Unbounded, upper) => {
                let (value, open) = bound_parts(upper)?;
                IdbKeyRange::upper_bound_with_open(&value, open)
            }
            (lower, upper) => {
                let (low, low_open) = bound_parts(lower)?;
                let (high, high_open) = bound_parts(upper)?;
                IdbKeyRange::bound_with_lower_open_and_upper_open(&low, &high, low_open, high_open)
            }
        },
    };
    js_range.map(Some).map_err(|e| js_error(&e))
}

fn bound_parts(bound: &Bound<Value>) -> EngineResult<(JsValue, bool)> {
    match bound {
        Bound::Included(value) => Ok((to_js(value)?, false)),
        Bound::Excluded(value) => Ok((to_js(value)?, true)),
        Bound::Unbounded => Err(EngineError::data("unbounded key range side")),
    }
}
