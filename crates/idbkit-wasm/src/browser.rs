//! wasm-bindgen classes over [`IndexedDb`]
//!
//! Values cross the boundary as JSON: arguments are stringified on the JS
//! side of the bridge and parsed into `serde_json` values, results go back
//! through `JSON.parse`.

use std::ops::Bound;

use idbkit_core::{
    DatabaseConfig, DatabaseError, Document, EngineError, FieldFilter, KeyRange, RecordId,
    StoreHandle, StoreSchema,
};
use idbkit_indexeddb::convert::{from_js, to_js};
use idbkit_indexeddb::error::to_js_error;
use idbkit_indexeddb::{BrowserDatabase, IndexedDb, IndexedDbEngine};
use js_sys::Promise;
use serde::Serialize;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::future_to_promise;
use web_sys::IdbKeyRange;

type Store = StoreHandle<IndexedDbEngine, Document>;

/// A schema-driven IndexedDB database.
///
/// The connection is opened lazily by the first store operation (or by
/// `open()`), at the highest version any schema declares.
#[wasm_bindgen(js_name = Database)]
pub struct JsDatabase {
    inner: IndexedDb,
}

#[wasm_bindgen(js_class = Database)]
impl JsDatabase {
    /// `new Database(name, schemas)`. Throws if `schemas` is not an array of
    /// `{name, fields}` descriptors.
    #[wasm_bindgen(constructor)]
    pub fn new(name: String, schemas: JsValue) -> Result<JsDatabase, JsValue> {
        console_error_panic_hook::set_once();

        let schemas: Vec<StoreSchema> = parse_arg(&schemas)?;
        Ok(JsDatabase {
            inner: IndexedDb::browser(name, schemas),
        })
    }

    /// Build from a `{name, stores, version_change_notice}` manifest.
    #[wasm_bindgen(js_name = fromConfig)]
    pub fn from_config(config: JsValue) -> Result<JsDatabase, JsValue> {
        console_error_panic_hook::set_once();

        let config: DatabaseConfig = parse_arg(&config)?;
        Ok(JsDatabase {
            inner: IndexedDb::browser_from_config(config),
        })
    }

    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.inner.name().to_string()
    }

    /// Version the database is opened at. Throws on invalid schemas.
    #[wasm_bindgen(js_name = targetVersion)]
    pub fn target_version(&self) -> Result<u32, JsValue> {
        self.inner.target_version().map_err(|e| reject(&e))
    }

    /// Resolves once the connection is open.
    pub fn open(&self) -> Promise {
        let db = self.inner.clone();
        future_to_promise(async move {
            db.open().await.map_err(|e| reject(&e))?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Handle to the store `name`. Never fails; an undeclared store fails
    /// at its first operation.
    #[wasm_bindgen(js_name = getStore)]
    pub fn get_store(&self, name: String) -> JsStore {
        JsStore {
            handle: self.inner.documents(name),
        }
    }
}

/// Promise-returning record operations on one store.
#[wasm_bindgen(js_name = Store)]
pub struct JsStore {
    handle: Store,
}

#[wasm_bindgen(js_class = Store)]
impl JsStore {
    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.handle.name().to_string()
    }

    /// Insert `data`; resolves to the stored record including its new `id`.
    pub fn create(&self, data: JsValue) -> Promise {
        let store = self.handle.clone();
        let data = parse_arg::<Document>(&data);
        future_to_promise(async move {
            let record = store.create(data?).await.map_err(|e| reject(&e))?;
            to_js_value(&record)
        })
    }

    /// Resolves to the record, or `undefined` when absent.
    #[wasm_bindgen(js_name = getById)]
    pub fn get_by_id(&self, id: JsValue) -> Promise {
        let store = self.handle.clone();
        future_to_promise(async move {
            match store.get_by_id(parse_id(&id)?).await.map_err(|e| reject(&e))? {
                Some(record) => to_js_value(&record),
                None => Ok(JsValue::UNDEFINED),
            }
        })
    }

    /// Resolves to every record in id order.
    #[wasm_bindgen(js_name = getAll)]
    pub fn get_all(&self) -> Promise {
        let store = self.handle.clone();
        future_to_promise(async move {
            let records = store.get_all().await.map_err(|e| reject(&e))?;
            to_js_value(&records)
        })
    }

    pub fn delete(&self, id: JsValue) -> Promise {
        let store = self.handle.clone();
        future_to_promise(async move {
            store.delete(parse_id(&id)?).await.map_err(|e| reject(&e))?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Replace the record at `id` with `data` (inserting if absent);
    /// resolves to the stored record.
    pub fn update(&self, id: JsValue, data: JsValue) -> Promise {
        let store = self.handle.clone();
        let data = parse_arg::<Document>(&data);
        future_to_promise(async move {
            let id = parse_id(&id)?;
            let record = store.update(id, data?).await.map_err(|e| reject(&e))?;
            to_js_value(&record)
        })
    }

    /// Records whose indexed `field` equals `value`, or falls in it when
    /// `value` is an `IDBKeyRange`.
    #[wasm_bindgen(js_name = getByField)]
    pub fn get_by_field(&self, field: String, value: JsValue) -> Promise {
        let store = self.handle.clone();
        let range = key_range(&value);
        future_to_promise(async move {
            let records = store
                .get_by_field(&field, range?)
                .await
                .map_err(|e| reject(&e))?;
            to_js_value(&records)
        })
    }

    /// Records whose fields equal every entry of `fields`.
    #[wasm_bindgen(js_name = getByFields)]
    pub fn get_by_fields(&self, fields: JsValue) -> Promise {
        let store = self.handle.clone();
        let filter = parse_arg::<FieldFilter>(&fields);
        future_to_promise(async move {
            let records = store
                .get_by_fields(&filter?)
                .await
                .map_err(|e| reject(&e))?;
            to_js_value(&records)
        })
    }
}

/// Map a database error to a rejection value with `name` and `message`.
fn reject(err: &DatabaseError) -> JsValue {
    let (name, message) = match err {
        DatabaseError::Open(e) | DatabaseError::Engine(e) => (e.kind.name(), e.message.clone()),
        DatabaseError::InvalidSchema(msg) => ("InvalidSchemaError", msg.clone()),
        DatabaseError::Serialization(msg) => ("DataError", msg.clone()),
    };
    let js = js_sys::Error::new(&message);
    js.set_name(name);
    js.into()
}

fn engine_reject(err: &EngineError) -> JsValue {
    to_js_error(err).into()
}

fn parse_arg<T: serde::de::DeserializeOwned>(value: &JsValue) -> Result<T, JsValue> {
    let json = from_js(value).map_err(|e| engine_reject(&e))?;
    serde_json::from_value(json).map_err(|e| engine_reject(&EngineError::data(e.to_string())))
}

fn to_js_value<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    let json = serde_json::to_value(value)
        .map_err(|e| engine_reject(&EngineError::data(e.to_string())))?;
    to_js(&json).map_err(|e| engine_reject(&e))
}

fn parse_id(value: &JsValue) -> Result<RecordId, JsValue> {
    match value.as_f64() {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as RecordId),
        _ => Err(engine_reject(&EngineError::data(format!(
            "{:?} is not a valid record id",
            value
        )))),
    }
}

/// A plain key becomes an exact match, `null`/`undefined` every key, and
/// an `IDBKeyRange` keeps its bounds.
fn key_range(value: &JsValue) -> Result<KeyRange, JsValue> {
    if value.is_undefined() || value.is_null() {
        return Ok(KeyRange::All);
    }
    let Some(range) = value.dyn_ref::<IdbKeyRange>() else {
        return Ok(KeyRange::from(parse_arg::<Value>(value)?));
    };

    let bound = |key: Result<JsValue, JsValue>, open: bool| -> Result<Bound<Value>, JsValue> {
        let key = key?;
        if key.is_undefined() {
            return Ok(Bound::Unbounded);
        }
        let key = parse_arg::<Value>(&key)?;
        Ok(if open {
            Bound::Excluded(key)
        } else {
            Bound::Included(key)
        })
    };

    Ok(KeyRange::Bounded {
        lower: bound(range.lower(), range.lower_open())?,
        upper: bound(range.upper(), range.upper_open())?,
    })
}
