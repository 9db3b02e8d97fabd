//! [`StorageEngine`] over the browser's IndexedDB

use std::cell::RefCell;

use idbkit_core::{
    Connection, EngineFuture, EngineResult, KeyRange, RecordId, ScanPredicate, StorageEngine,
    Transaction, TransactionMode, UpgradeHandler, VersionChangeEvent, VersionChangeHandler,
};
use serde_json::Value;
use tracing::debug;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{IdbDatabase, IdbObjectStore, IdbTransaction, IdbTransactionMode, IdbVersionChangeEvent};

use crate::convert::{from_js, from_js_array, key_from_js, key_range_to_js, key_to_js, to_js};
use crate::error::js_error;
use crate::idb;

/// Opens databases through the global `indexedDB` factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexedDbEngine;

impl IndexedDbEngine {
    pub fn new() -> Self {
        Self
    }
}

impl StorageEngine for IndexedDbEngine {
    type Connection = IndexedDbConnection;

    fn open<'a>(
        &'a self,
        name: &'a str,
        version: u32,
        upgrade: UpgradeHandler,
    ) -> EngineFuture<'a, EngineResult<IndexedDbConnection>> {
        Box::pin(async move {
            let factory = idb::idb_factory()?;
            let db = idb::open_database(&factory, name, version, upgrade).await?;
            debug!(database = name, version, "IndexedDB connection open");
            Ok(IndexedDbConnection::new(db))
        })
    }

    fn delete_database<'a>(&'a self, name: &'a str) -> EngineFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let factory = idb::idb_factory()?;
            idb::delete_database(&factory, name).await
        })
    }
}

/// An open `IDBDatabase`.
pub struct IndexedDbConnection {
    db: IdbDatabase,
    name: String,
    version: u32,
    on_version_change: RefCell<Option<Closure<dyn FnMut(IdbVersionChangeEvent)>>>,
}

impl IndexedDbConnection {
    fn new(db: IdbDatabase) -> Self {
        let name = db.name();
        let version = db.version() as u32;
        Self {
            db,
            name,
            version,
            on_version_change: RefCell::new(None),
        }
    }

    /// Stores present in the database.
    pub fn store_names(&self) -> Vec<String> {
        idb::string_list(&self.db.object_store_names())
    }
}

impl Connection for IndexedDbConnection {
    type Transaction = IndexedDbTransaction;

    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn transaction(&self, store: &str, mode: TransactionMode) -> EngineResult<IndexedDbTransaction> {
        let idb_mode = match mode {
            TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
            TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        };
        let tx = self
            .db
            .transaction_with_str_and_mode(store, idb_mode)
            .map_err(|e| js_error(&e))?;
        let store = tx.object_store(store).map_err(|e| js_error(&e))?;
        Ok(IndexedDbTransaction { _tx: tx, store })
    }

    fn set_version_change_handler(&self, mut handler: VersionChangeHandler) {
        let closure = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
            handler(&VersionChangeEvent {
                old_version: event.old_version() as u32,
                new_version: event.new_version().map(|v| v as u32),
            });
        }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

        self.db
            .set_onversionchange(Some(closure.as_ref().unchecked_ref()));
        *self.on_version_change.borrow_mut() = Some(closure);
    }

    fn close(&self) {
        self.db.close();
    }
}

impl Drop for IndexedDbConnection {
    fn drop(&mut self) {
        self.db.set_onversionchange(None);
    }
}

/// A single-store `IDBTransaction`.
///
/// The transaction commits on its own once its requests settle and control
/// returns to the event loop.
pub struct IndexedDbTransaction {
    _tx: IdbTransaction,
    store: IdbObjectStore,
}

impl Transaction for IndexedDbTransaction {
    fn add(&self, value: Value) -> EngineFuture<'_, EngineResult<RecordId>> {
        Box::pin(async move {
            let req = self.store.add(&to_js(&value)?).map_err(|e| js_error(&e))?;
            key_from_js(&idb::await_request(&req).await?)
        })
    }

    fn put(&self, value: Value) -> EngineFuture<'_, EngineResult<RecordId>> {
        Box::pin(async move {
            let req = self.store.put(&to_js(&value)?).map_err(|e| js_error(&e))?;
            key_from_js(&idb::await_request(&req).await?)
        })
    }

    fn get(&self, key: RecordId) -> EngineFuture<'_, EngineResult<Option<Value>>> {
        Box::pin(async move {
            let req = self.store.get(&key_to_js(key)?).map_err(|e| js_error(&e))?;
            let result = idb::await_request(&req).await?;
            if result.is_undefined() {
                return Ok(None);
            }
            from_js(&result).map(Some)
        })
    }

    fn get_all(&self) -> EngineFuture<'_, EngineResult<Vec<Value>>> {
        Box::pin(async move {
            let req = self.store.get_all().map_err(|e| js_error(&e))?;
            from_js_array(&idb::await_request(&req).await?)
        })
    }

    fn delete(&self, key: RecordId) -> EngineFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            let req = self.store.delete(&key_to_js(key)?).map_err(|e| js_error(&e))?;
            idb::await_request(&req).await?;
            Ok(())
        })
    }

    fn index_get_all<'a>(
        &'a self,
        index: &'a str,
        range: &'a KeyRange,
    ) -> EngineFuture<'a, EngineResult<Vec<Value>>> {
        Box::pin(async move {
            let index = self.store.index(index).map_err(|e| js_error(&e))?;
            let req = match key_range_to_js(range)? {
                Some(range) => index.get_all_with_key(&range),
                None => index.get_all(),
            }
            .map_err(|e| js_error(&e))?;
            from_js_array(&idb::await_request(&req).await?)
        })
    }

    fn scan(&self, predicate: ScanPredicate) -> EngineFuture<'_, EngineResult<Vec<Value>>> {
        Box::pin(idb::scan_store(&self.store, predicate))
    }
}
