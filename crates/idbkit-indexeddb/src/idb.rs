//! Low-level IndexedDB helpers using web-sys
//!
//! Wraps the callback-based IndexedDB API into Rust futures using
//! `wasm_bindgen_futures::JsFuture` and `js_sys::Promise`. Rejections carry
//! the request's `DOMException` so [`js_error`] can classify it by name.

use std::cell::RefCell;
use std::rc::Rc;

use idbkit_core::{
    EngineError, EngineErrorKind, EngineResult, IndexSpec, ScanPredicate, StoreOptions,
    UpgradeHandler, UpgradeTransaction,
};
use js_sys::Promise;
use serde_json::Value;
use tracing::{debug, warn};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    DomStringList, IdbCursorWithValue, IdbDatabase, IdbFactory, IdbObjectStore, IdbOpenDbRequest,
    IdbRequest, IdbTransaction, IdbVersionChangeEvent,
};

use crate::convert::from_js;
use crate::error::{js_error, to_js_error, IndexedDbError};

type EventClosure = Closure<dyn FnMut(web_sys::Event)>;

/// Handlers attached to a pending open request, dropped once it settles.
struct OpenClosures {
    _success: EventClosure,
    _error: EventClosure,
    _blocked: EventClosure,
    _upgrade: Closure<dyn FnMut(IdbVersionChangeEvent)>,
}

/// Get the global IndexedDB factory.
pub fn idb_factory() -> EngineResult<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| IndexedDbError::NotAvailable("no indexedDB on global".into()))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(IndexedDbError::NotAvailable("indexedDB is null/undefined".into()).into());
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| IndexedDbError::NotAvailable("indexedDB is not IdbFactory".into()).into())
}

/// The error a failed request reports, as a JS value suitable for rejection.
fn request_error(req: &IdbRequest) -> JsValue {
    match req.error() {
        Ok(Some(dom)) => dom.into(),
        _ => to_js_error(&EngineError::new(EngineErrorKind::Unknown, "unknown IDB error")).into(),
    }
}

/// Convert an IdbRequest into a JS Promise that settles with the request.
fn request_to_promise(req: &IdbRequest) -> Promise {
    let req = req.clone();

    Promise::new(&mut move |resolve, reject| {
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let req_s = req.clone();
        let closures_for_success = closures.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let result = req_s.result().unwrap_or(JsValue::UNDEFINED);
            let _ = resolve.call1(&JsValue::UNDEFINED, &result);
            *closures_for_success.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req.clone();
        let closures_for_error = closures.clone();
        let on_error = Closure::wrap(Box::new(move |event: web_sys::Event| {
            // Handled here; keep the failure from aborting the transaction.
            event.prevent_default();
            let _ = reject.call1(&JsValue::UNDEFINED, &request_error(&req_e));
            *closures_for_error.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        req.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        *closures.borrow_mut() = Some((on_success, on_error));
    })
}

/// Await an IdbRequest, resolving to its result JsValue.
pub async fn await_request(req: &IdbRequest) -> EngineResult<JsValue> {
    wasm_bindgen_futures::JsFuture::from(request_to_promise(req))
        .await
        .map_err(|e| js_error(&e))
}

/// Schema access inside an `upgradeneeded` event.
struct IdbUpgrade {
    db: IdbDatabase,
    tx: IdbTransaction,
    old_version: u32,
    new_version: u32,
}

impl IdbUpgrade {
    fn object_store(&self, name: &str) -> EngineResult<IdbObjectStore> {
        self.tx.object_store(name).map_err(|e| js_error(&e))
    }
}

impl UpgradeTransaction for IdbUpgrade {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn contains_store(&self, name: &str) -> bool {
        self.db.object_store_names().contains(name)
    }

    fn create_store(&mut self, name: &str, options: &StoreOptions) -> EngineResult<()> {
        let params = web_sys::IdbObjectStoreParameters::new();
        js_sys::Reflect::set(&params, &"keyPath".into(), &options.key_path.as_str().into())
            .map_err(|e| js_error(&e))?;
        js_sys::Reflect::set(
            &params,
            &"autoIncrement".into(),
            &JsValue::from_bool(options.auto_increment),
        )
        .map_err(|e| js_error(&e))?;

        self.db
            .create_object_store_with_optional_parameters(name, &params)
            .map_err(|e| js_error(&e))?;
        Ok(())
    }

    fn index_names(&self, store: &str) -> EngineResult<Vec<String>> {
        Ok(string_list(&self.object_store(store)?.index_names()))
    }

    fn create_index(&mut self, store: &str, index: &IndexSpec) -> EngineResult<()> {
        let params = web_sys::IdbIndexParameters::new();
        js_sys::Reflect::set(&params, &"unique".into(), &JsValue::from_bool(index.unique))
            .map_err(|e| js_error(&e))?;

        self.object_store(store)?
            .create_index_with_str_and_optional_parameters(&index.name, &index.key_path, &params)
            .map_err(|e| js_error(&e))?;
        Ok(())
    }
}

pub fn string_list(list: &DomStringList) -> Vec<String> {
    (0..list.length()).filter_map(|i| list.item(i)).collect()
}

/// Open `name` at `version`, running `upgrade` inside the version-change
/// transaction when the stored version is lower.
///
/// A failing upgrade aborts the transaction and the open reports the
/// upgrade's own error rather than the resulting `AbortError`. An open
/// left waiting on other connections rejects with `Blocked`.
pub async fn open_database(
    factory: &IdbFactory,
    name: &str,
    version: u32,
    upgrade: UpgradeHandler,
) -> EngineResult<IdbDatabase> {
    let open_req: IdbOpenDbRequest = factory
        .open_with_u32(name, version)
        .map_err(|e| js_error(&e))?;

    let upgrade = Rc::new(RefCell::new(upgrade));
    let upgrade_error: Rc<RefCell<Option<EngineError>>> = Rc::new(RefCell::new(None));
    let closures: Rc<RefCell<Option<OpenClosures>>> = Rc::new(RefCell::new(None));

    let req = open_req.clone();
    let db_name = name.to_string();
    let upgrade_error_slot = upgrade_error.clone();
    let closures_slot = closures.clone();
    let promise = Promise::new(&mut move |resolve, reject| {
        let req_s = req.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let result = req_s.result().unwrap_or(JsValue::UNDEFINED);
            let _ = resolve.call1(&JsValue::UNDEFINED, &result);
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req.clone();
        let reject_e = reject.clone();
        let on_error = Closure::wrap(Box::new(move |event: web_sys::Event| {
            event.prevent_default();
            let _ = reject_e.call1(&JsValue::UNDEFINED, &request_error(&req_e));
        }) as Box<dyn FnMut(web_sys::Event)>);

        let blocked_name = db_name.clone();
        let on_blocked = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            warn!(database = %blocked_name, "open blocked by another connection");
            let err = EngineError::new(
                EngineErrorKind::Blocked,
                format!("open of {} blocked by an open connection", blocked_name),
            );
            let _ = reject.call1(&JsValue::UNDEFINED, &to_js_error(&err));
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_u = req.clone();
        let upgrade = upgrade.clone();
        let upgrade_error = upgrade_error_slot.clone();
        let on_upgrade = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
            let outcome = run_upgrade(&req_u, &event, &mut upgrade.borrow_mut());
            if let Err(err) = outcome {
                warn!(error = %err, "upgrade failed, aborting");
                if let Some(tx) = req_u.transaction() {
                    let _ = tx.abort();
                }
                *upgrade_error.borrow_mut() = Some(err);
            }
        }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

        req.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        req.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));
        req.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));

        *closures_slot.borrow_mut() = Some(OpenClosures {
            _success: on_success,
            _error: on_error,
            _blocked: on_blocked,
            _upgrade: on_upgrade,
        });
    });

    let result = wasm_bindgen_futures::JsFuture::from(promise)
        .await
        .map_err(|e| js_error(&e));

    let taken = upgrade_error.borrow_mut().take();
    if let Some(err) = taken {
        *closures.borrow_mut() = None;
        return Err(err);
    }

    match result {
        Ok(db) => {
            *closures.borrow_mut() = None;
            db.dyn_into::<IdbDatabase>()
                .map_err(|_| IndexedDbError::JsValue("open result is not IdbDatabase".into()).into())
        }
        Err(err) => {
            // A blocked request can still proceed once others close.
            if err.kind == EngineErrorKind::Blocked {
                close_when_opened(&open_req);
            }
            *closures.borrow_mut() = None;
            Err(err)
        }
    }
}

/// Detach a rejected open request from the caller.
///
/// If the request later proceeds, the version change is aborted so nothing
/// is applied, and a connection that still arrives is closed.
fn close_when_opened(req: &IdbOpenDbRequest) {
    let req_u = req.clone();
    let on_upgrade = Closure::once_into_js(move |_event: IdbVersionChangeEvent| {
        if let Some(tx) = req_u.transaction() {
            let _ = tx.abort();
        }
    });
    let req_s = req.clone();
    let on_success = Closure::once_into_js(move |_event: web_sys::Event| {
        if let Some(db) = req_s.result().ok().and_then(|r| r.dyn_into::<IdbDatabase>().ok()) {
            debug!(database = %db.name(), "closing connection from blocked open");
            db.close();
        }
    });
    let on_error = Closure::once_into_js(move |event: web_sys::Event| {
        event.prevent_default();
    });

    req.set_onupgradeneeded(Some(on_upgrade.unchecked_ref()));
    req.set_onsuccess(Some(on_success.unchecked_ref()));
    req.set_onerror(Some(on_error.unchecked_ref()));
    req.set_onblocked(None);
}

fn run_upgrade(
    req: &IdbOpenDbRequest,
    event: &IdbVersionChangeEvent,
    upgrade: &mut UpgradeHandler,
) -> EngineResult<()> {
    let db: IdbDatabase = req
        .result()
        .map_err(|e| js_error(&e))?
        .dyn_into()
        .map_err(|_| IndexedDbError::JsValue("upgrade result is not IdbDatabase".into()))?;
    let tx = req
        .transaction()
        .ok_or_else(|| EngineError::invalid_state("upgrade has no version-change transaction"))?;

    let mut upgrade_tx = IdbUpgrade {
        db,
        tx,
        old_version: event.old_version() as u32,
        new_version: event.new_version().unwrap_or_default() as u32,
    };
    upgrade(&mut upgrade_tx)
}

/// Delete an IndexedDB database by name.
pub async fn delete_database(factory: &IdbFactory, name: &str) -> EngineResult<()> {
    let req = factory.delete_database(name).map_err(|e| js_error(&e))?;
    await_request(&req).await?;
    Ok(())
}

/// Walk `store` with a forward cursor, keeping records accepted by
/// `predicate`.
pub async fn scan_store(
    store: &IdbObjectStore,
    predicate: ScanPredicate,
) -> EngineResult<Vec<Value>> {
    let req = store.open_cursor().map_err(|e| js_error(&e))?;
    let predicate = Rc::new(predicate);
    let matches: Rc<RefCell<Vec<Value>>> = Rc::new(RefCell::new(Vec::new()));

    let req_c = req.clone();
    let matches_c = matches.clone();
    let promise = Promise::new(&mut move |resolve, reject| {
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let req_s = req_c.clone();
        let matches_s = matches_c.clone();
        let predicate = predicate.clone();
        let closures_for_success = closures.clone();
        let reject_s = reject.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let cursor = req_s
                .result()
                .ok()
                .and_then(|r| r.dyn_into::<IdbCursorWithValue>().ok());
            let Some(cursor) = cursor else {
                let _ = resolve.call0(&JsValue::UNDEFINED);
                *closures_for_success.borrow_mut() = None;
                return;
            };

            let step = cursor
                .value()
                .map_err(|e| js_error(&e))
                .and_then(|v| from_js(&v))
                .and_then(|record| {
                    if predicate(&record) {
                        matches_s.borrow_mut().push(record);
                    }
                    cursor.continue_().map_err(|e| js_error(&e))
                });
            if let Err(err) = step {
                let _ = reject_s.call1(&JsValue::UNDEFINED, &to_js_error(&err));
                *closures_for_success.borrow_mut() = None;
            }
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req_c.clone();
        let closures_for_error = closures.clone();
        let on_error = Closure::wrap(Box::new(move |event: web_sys::Event| {
            event.prevent_default();
            let _ = reject.call1(&JsValue::UNDEFINED, &request_error(&req_e));
            *closures_for_error.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        req_c.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req_c.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        *closures.borrow_mut() = Some((on_success, on_error));
    });

    wasm_bindgen_futures::JsFuture::from(promise)
        .await
        .map_err(|e| js_error(&e))?;

    let collected = matches.take();
    Ok(collected)
}
