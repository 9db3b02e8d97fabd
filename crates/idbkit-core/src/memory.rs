//! In-memory storage engine
//!
//! A `BTreeMap`-based implementation of the engine traits for testing and
//! development. Databases live as long as the `MemoryEngine` value (and its
//! clones), so reopening a database from the same engine sees the data and
//! version left by earlier connections.
//!
//! Behaves like IndexedDB where the database layer can observe it: upgrade
//! passes are atomic, unique indexes reject duplicates, open connections get
//! a version-change notification before an upgrade, and an upgrade is
//! rejected with `Blocked` if any of them stays open.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::engine::{
    Connection, EngineFuture, IndexSpec, ScanPredicate, StorageEngine, StoreOptions, Transaction,
    TransactionMode, UpgradeHandler, UpgradeTransaction, VersionChangeEvent, VersionChangeHandler,
};
use crate::error::{EngineError, EngineErrorKind, EngineResult};
use crate::key::{
    compare_keys, is_valid_key, is_valid_record_id, value_at_path, KeyRange, RecordId,
};

/// In-memory engine.
///
/// Cloning shares the underlying databases.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Rc<RefCell<EngineState>>,
}

#[derive(Default)]
struct EngineState {
    databases: HashMap<String, DatabaseState>,
    connections: Vec<Weak<ConnectionShared>>,
    open_requests: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
struct DatabaseState {
    version: u32,
    stores: BTreeMap<String, ObjectStore>,
}

#[derive(Debug, Clone)]
struct ObjectStore {
    options: StoreOptions,
    next_key: RecordId,
    records: BTreeMap<RecordId, Value>,
    indexes: BTreeMap<String, IndexSpec>,
}

struct ConnectionShared {
    name: String,
    version: u32,
    closed: Cell<bool>,
    on_version_change: RefCell<Option<VersionChangeHandler>>,
}

impl MemoryEngine {
    /// Create an engine with no databases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored version of a database, `None` if it does not exist.
    pub fn version(&self, name: &str) -> Option<u32> {
        self.state.borrow().databases.get(name).map(|db| db.version)
    }

    /// Names of all existing databases, sorted.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.borrow().databases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Store names of a database, sorted.
    pub fn store_names(&self, name: &str) -> Vec<String> {
        self.state
            .borrow()
            .databases
            .get(name)
            .map(|db| db.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Indexes of a store, sorted by name.
    pub fn indexes(&self, name: &str, store: &str) -> Vec<IndexSpec> {
        self.state
            .borrow()
            .databases
            .get(name)
            .and_then(|db| db.stores.get(store))
            .map(|s| s.indexes.values().cloned().collect())
            .unwrap_or_default()
    }

    /// How many open requests were issued for a database.
    pub fn open_count(&self, name: &str) -> usize {
        self.state
            .borrow()
            .open_requests
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    /// Fire version-change handlers on every open connection to `name`.
    ///
    /// Returns `true` if some connection is still open afterwards.
    fn notify_version_change(&self, name: &str, event: VersionChangeEvent) -> bool {
        let open: Vec<Rc<ConnectionShared>> = {
            let mut state = self.state.borrow_mut();
            state
                .connections
                .retain(|weak| weak.upgrade().is_some_and(|c| !c.closed.get()));
            state
                .connections
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|c| c.name == name)
                .collect()
        };

        for conn in &open {
            if let Some(handler) = conn.on_version_change.borrow_mut().as_mut() {
                handler(&event);
            }
        }

        open.iter().any(|c| !c.closed.get())
    }

    fn blocked(name: &str) -> EngineError {
        EngineError::new(
            EngineErrorKind::Blocked,
            format!("open connections to '{}' did not close on version change", name),
        )
    }
}

impl StorageEngine for MemoryEngine {
    type Connection = MemoryConnection;

    fn open<'a>(
        &'a self,
        name: &'a str,
        version: u32,
        mut upgrade: UpgradeHandler,
    ) -> EngineFuture<'a, EngineResult<MemoryConnection>> {
        Box::pin(async move {
            *self
                .state
                .borrow_mut()
                .open_requests
                .entry(name.to_string())
                .or_default() += 1;

            if version == 0 {
                return Err(EngineError::data("version must be a positive integer"));
            }

            let current = self.state.borrow().databases.get(name).cloned();
            let old_version = current.as_ref().map_or(0, |db| db.version);

            if version < old_version {
                return Err(EngineError::new(
                    EngineErrorKind::Version,
                    format!(
                        "requested version ({}) is less than the existing version ({})",
                        version, old_version
                    ),
                ));
            }

            if version > old_version {
                let event = VersionChangeEvent {
                    old_version,
                    new_version: Some(version),
                };
                if self.notify_version_change(name, event) {
                    return Err(Self::blocked(name));
                }

                // Upgrade a copy; dropping it on error aborts the pass.
                let mut db = current.unwrap_or_default();
                {
                    let mut tx = MemoryUpgrade {
                        old_version,
                        new_version: version,
                        db: &mut db,
                    };
                    upgrade(&mut tx)?;
                }
                db.version = version;
                self.state
                    .borrow_mut()
                    .databases
                    .insert(name.to_string(), db);
            }

            let shared = Rc::new(ConnectionShared {
                name: name.to_string(),
                version,
                closed: Cell::new(false),
                on_version_change: RefCell::new(None),
            });
            self.state
                .borrow_mut()
                .connections
                .push(Rc::downgrade(&shared));

            Ok(MemoryConnection {
                shared,
                state: self.state.clone(),
            })
        })
    }

    fn delete_database<'a>(&'a self, name: &'a str) -> EngineFuture<'a, EngineResult<()>> {
        Box::pin(async move {
            let Some(old_version) = self.version(name) else {
                return Ok(());
            };
            let event = VersionChangeEvent {
                old_version,
                new_version: None,
            };
            if self.notify_version_change(name, event) {
                return Err(Self::blocked(name));
            }
            self.state.borrow_mut().databases.remove(name);
            Ok(())
        })
    }
}

struct MemoryUpgrade<'a> {
    old_version: u32,
    new_version: u32,
    db: &'a mut DatabaseState,
}

impl UpgradeTransaction for MemoryUpgrade<'_> {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn contains_store(&self, name: &str) -> bool {
        self.db.stores.contains_key(name)
    }

    fn create_store(&mut self, name: &str, options: &StoreOptions) -> EngineResult<()> {
        if self.db.stores.contains_key(name) {
            return Err(EngineError::constraint(format!(
                "object store '{}' already exists",
                name
            )));
        }
        self.db.stores.insert(
            name.to_string(),
            ObjectStore {
                options: options.clone(),
                next_key: 1,
                records: BTreeMap::new(),
                indexes: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn index_names(&self, store: &str) -> EngineResult<Vec<String>> {
        self.db
            .stores
            .get(store)
            .map(|s| s.indexes.keys().cloned().collect())
            .ok_or_else(|| missing_store(store))
    }

    fn create_index(&mut self, store: &str, index: &IndexSpec) -> EngineResult<()> {
        let object_store = self
            .db
            .stores
            .get_mut(store)
            .ok_or_else(|| missing_store(store))?;
        if object_store.indexes.contains_key(&index.name) {
            return Err(EngineError::constraint(format!(
                "index '{}' already exists on '{}'",
                index.name, store
            )));
        }
        if index.unique {
            let keys: Vec<&Value> = object_store
                .records
                .values()
                .filter_map(|r| value_at_path(r, &index.key_path))
                .filter(|k| is_valid_key(k))
                .collect();
            for (i, a) in keys.iter().enumerate() {
                if keys[i + 1..]
                    .iter()
                    .any(|b| compare_keys(a, b) == Some(Ordering::Equal))
                {
                    return Err(unique_violation(&index.name));
                }
            }
        }
        object_store
            .indexes
            .insert(index.name.clone(), index.clone());
        Ok(())
    }
}

/// A connection to a database held by a [`MemoryEngine`].
pub struct MemoryConnection {
    shared: Rc<ConnectionShared>,
    state: Rc<RefCell<EngineState>>,
}

impl MemoryConnection {
    pub fn is_closed(&self) -> bool {
        self.shared.closed.get()
    }
}

impl Connection for MemoryConnection {
    type Transaction = MemoryTransaction;

    fn name(&self) -> &str {
        &self.shared.name
    }

    fn version(&self) -> u32 {
        self.shared.version
    }

    fn transaction(&self, store: &str, mode: TransactionMode) -> EngineResult<MemoryTransaction> {
        if self.is_closed() {
            return Err(EngineError::invalid_state(
                "the database connection is closing",
            ));
        }
        let exists = self
            .state
            .borrow()
            .databases
            .get(&self.shared.name)
            .is_some_and(|db| db.stores.contains_key(store));
        if !exists {
            return Err(missing_store(store));
        }
        Ok(MemoryTransaction {
            state: self.state.clone(),
            database: self.shared.name.clone(),
            store: store.to_string(),
            mode,
        })
    }

    fn set_version_change_handler(&self, handler: VersionChangeHandler) {
        *self.shared.on_version_change.borrow_mut() = Some(handler);
    }

    fn close(&self) {
        self.shared.closed.set(true);
    }
}

/// A single-store transaction on a [`MemoryConnection`].
pub struct MemoryTransaction {
    state: Rc<RefCell<EngineState>>,
    database: String,
    store: String,
    mode: TransactionMode,
}

impl MemoryTransaction {
    fn with_store<R>(&self, f: impl FnOnce(&ObjectStore) -> EngineResult<R>) -> EngineResult<R> {
        let state = self.state.borrow();
        let store = state
            .databases
            .get(&self.database)
            .and_then(|db| db.stores.get(&self.store))
            .ok_or_else(|| missing_store(&self.store))?;
        f(store)
    }

    fn with_store_mut<R>(
        &self,
        f: impl FnOnce(&mut ObjectStore) -> EngineResult<R>,
    ) -> EngineResult<R> {
        if self.mode == TransactionMode::ReadOnly {
            return Err(EngineError::new(
                EngineErrorKind::ReadOnly,
                "the transaction is read-only",
            ));
        }
        let mut state = self.state.borrow_mut();
        let store = state
            .databases
            .get_mut(&self.database)
            .and_then(|db| db.stores.get_mut(&self.store))
            .ok_or_else(|| missing_store(&self.store))?;
        f(store)
    }
}

impl Transaction for MemoryTransaction {
    fn add(&self, value: Value) -> EngineFuture<'_, EngineResult<RecordId>> {
        Box::pin(async move { self.with_store_mut(|store| store.insert(value, false)) })
    }

    fn put(&self, value: Value) -> EngineFuture<'_, EngineResult<RecordId>> {
        Box::pin(async move { self.with_store_mut(|store| store.insert(value, true)) })
    }

    fn get(&self, key: RecordId) -> EngineFuture<'_, EngineResult<Option<Value>>> {
        Box::pin(async move {
            check_record_id(key)?;
            self.with_store(|store| Ok(store.records.get(&key).cloned()))
        })
    }

    fn get_all(&self) -> EngineFuture<'_, EngineResult<Vec<Value>>> {
        Box::pin(async move { self.with_store(|store| Ok(store.records.values().cloned().collect())) })
    }

    fn delete(&self, key: RecordId) -> EngineFuture<'_, EngineResult<()>> {
        Box::pin(async move {
            check_record_id(key)?;
            self.with_store_mut(|store| {
                store.records.remove(&key);
                Ok(())
            })
        })
    }

    fn index_get_all<'a>(
        &'a self,
        index: &'a str,
        range: &'a KeyRange,
    ) -> EngineFuture<'a, EngineResult<Vec<Value>>> {
        Box::pin(async move { self.with_store(|store| store.index_get_all(index, range)) })
    }

    fn scan(&self, predicate: ScanPredicate) -> EngineFuture<'_, EngineResult<Vec<Value>>> {
        Box::pin(async move {
            self.with_store(|store| {
                Ok(store
                    .records
                    .values()
                    .filter(|record| predicate(record))
                    .cloned()
                    .collect())
            })
        })
    }
}

impl ObjectStore {
    fn insert(&mut self, mut value: Value, overwrite: bool) -> EngineResult<RecordId> {
        let key_path = self.options.key_path.clone();
        let object = value.as_object_mut().ok_or_else(|| {
            EngineError::data("the store uses in-line keys and the value is not an object")
        })?;

        let explicit = object.get(&key_path).cloned();
        let key = match explicit {
            Some(explicit) => explicit
                .as_u64()
                .filter(|k| is_valid_record_id(*k))
                .ok_or_else(|| {
                    EngineError::data(format!("'{}' is not a valid record key", explicit))
                })?,
            None if self.options.auto_increment => {
                let key = self.next_key;
                if !is_valid_record_id(key) {
                    return Err(EngineError::constraint("the key generator is exhausted"));
                }
                object.insert(key_path, Value::from(key));
                key
            }
            None => {
                return Err(EngineError::data(format!(
                    "record has no '{}' and the store has no key generator",
                    key_path
                )))
            }
        };

        if !overwrite && self.records.contains_key(&key) {
            return Err(EngineError::constraint(format!(
                "key {} already exists in the object store",
                key
            )));
        }

        for index in self.indexes.values().filter(|i| i.unique) {
            let Some(new_key) = value_at_path(&value, &index.key_path).filter(|k| is_valid_key(k))
            else {
                continue;
            };
            let taken = self.records.iter().any(|(pk, record)| {
                *pk != key
                    && value_at_path(record, &index.key_path)
                        .is_some_and(|k| compare_keys(k, new_key) == Some(Ordering::Equal))
            });
            if taken {
                return Err(unique_violation(&index.name));
            }
        }

        // key <= MAX_RECORD_ID, so the generator can pass it without overflow.
        if key >= self.next_key {
            self.next_key = key + 1;
        }
        self.records.insert(key, value);
        Ok(key)
    }

    fn index_get_all(&self, index: &str, range: &KeyRange) -> EngineResult<Vec<Value>> {
        let spec = self
            .indexes
            .get(index)
            .ok_or_else(|| EngineError::not_found(format!("index '{}' was not found", index)))?;
        if !range.is_valid() {
            return Err(EngineError::data("the parameter is not a valid key range"));
        }

        let mut hits: Vec<(&Value, RecordId, &Value)> = self
            .records
            .iter()
            .filter_map(|(pk, record)| {
                let key = value_at_path(record, &spec.key_path)?;
                range.contains(key).then_some((key, *pk, record))
            })
            .collect();
        hits.sort_by(|a, b| {
            compare_keys(a.0, b.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        Ok(hits.into_iter().map(|(_, _, record)| record.clone()).collect())
    }
}

fn check_record_id(key: RecordId) -> EngineResult<()> {
    if is_valid_record_id(key) {
        Ok(())
    } else {
        Err(EngineError::data(format!("{} is not a valid record key", key)))
    }
}

fn missing_store(store: &str) -> EngineError {
    EngineError::not_found(format!("no object store named '{}' in this database", store))
}

fn unique_violation(index: &str) -> EngineError {
    EngineError::constraint(format!(
        "unable to add key to index '{}': at least one key does not satisfy the uniqueness requirements",
        index
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upgrade_with_store(store: &'static str, index: Option<IndexSpec>) -> UpgradeHandler {
        Box::new(move |tx: &mut dyn UpgradeTransaction| -> EngineResult<()> {
            if !tx.contains_store(store) {
                tx.create_store(store, &StoreOptions::default())?;
            }
            if let Some(index) = &index {
                tx.create_index(store, index)?;
            }
            Ok(())
        })
    }

    fn no_upgrade() -> UpgradeHandler {
        Box::new(|_: &mut dyn UpgradeTransaction| -> EngineResult<()> { Ok(()) })
    }

    #[tokio::test]
    async fn test_add_assigns_increasing_keys() {
        let engine = MemoryEngine::new();
        let conn = engine
            .open("db", 1, upgrade_with_store("items", None))
            .await
            .unwrap();
        let tx = conn.transaction("items", TransactionMode::ReadWrite).unwrap();

        let a = tx.add(json!({"v": 1})).await.unwrap();
        let b = tx.add(json!({"v": 2})).await.unwrap();
        assert_eq!((a, b), (1, 2));

        let stored = tx.get(a).await.unwrap().unwrap();
        assert_eq!(stored, json!({"v": 1, "id": 1}));
    }

    #[tokio::test]
    async fn test_explicit_key_advances_generator() {
        let engine = MemoryEngine::new();
        let conn = engine
            .open("db", 1, upgrade_with_store("items", None))
            .await
            .unwrap();
        let tx = conn.transaction("items", TransactionMode::ReadWrite).unwrap();

        tx.put(json!({"id": 10})).await.unwrap();
        assert_eq!(tx.add(json!({})).await.unwrap(), 11);

        let dup = tx.add(json!({"id": 10})).await.unwrap_err();
        assert_eq!(dup.kind, EngineErrorKind::Constraint);
    }

    #[tokio::test]
    async fn test_generator_exhausted_at_max_key() {
        use crate::key::MAX_RECORD_ID;

        let engine = MemoryEngine::new();
        let conn = engine
            .open("db", 1, upgrade_with_store("items", None))
            .await
            .unwrap();
        let tx = conn.transaction("items", TransactionMode::ReadWrite).unwrap();

        assert_eq!(tx.put(json!({"id": MAX_RECORD_ID})).await.unwrap(), MAX_RECORD_ID);
        let err = tx.add(json!({"v": 1})).await.unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Constraint);

        // Explicit keys below the limit still work.
        assert_eq!(tx.put(json!({"id": 5})).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_keys_above_limit_rejected() {
        use crate::key::MAX_RECORD_ID;

        let engine = MemoryEngine::new();
        let conn = engine
            .open("db", 1, upgrade_with_store("items", None))
            .await
            .unwrap();
        let tx = conn.transaction("items", TransactionMode::ReadWrite).unwrap();

        let err = tx.put(json!({"id": u64::MAX})).await.unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Data);
        let err = tx.get(MAX_RECORD_ID + 1).await.unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Data);
        let err = tx.delete(u64::MAX).await.unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Data);
        assert!(tx.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_readonly_rejects_writes() {
        let engine = MemoryEngine::new();
        let conn = engine
            .open("db", 1, upgrade_with_store("items", None))
            .await
            .unwrap();
        let tx = conn.transaction("items", TransactionMode::ReadOnly).unwrap();
        let err = tx.add(json!({})).await.unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::ReadOnly);
    }

    #[tokio::test]
    async fn test_unique_index_rejects_duplicates() {
        let engine = MemoryEngine::new();
        let conn = engine
            .open(
                "db",
                1,
                upgrade_with_store("users", Some(IndexSpec::for_field("email", true))),
            )
            .await
            .unwrap();
        let tx = conn.transaction("users", TransactionMode::ReadWrite).unwrap();

        let id = tx.add(json!({"email": "a@x"})).await.unwrap();
        let err = tx.add(json!({"email": "a@x"})).await.unwrap_err();
        assert_eq!(err.kind, EngineErrorKind::Constraint);

        // Rewriting the same record keeps its own value.
        tx.put(json!({"id": id, "email": "a@x", "name": "A"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_index_get_all_orders_by_key() {
        let engine = MemoryEngine::new();
        let conn = engine
            .open(
                "db",
                1,
                upgrade_with_store("items", Some(IndexSpec::for_field("rank", false))),
            )
            .await
            .unwrap();
        let tx = conn.transaction("items", TransactionMode::ReadWrite).unwrap();
        for rank in [json!(3), json!("b"), json!(1), json!(null), json!(3)] {
            tx.add(json!({"rank": rank})).await.unwrap();
        }

        let all = tx.index_get_all("rank", &KeyRange::All).await.unwrap();
        let ids: Vec<u64> = all.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![3, 1, 5, 2]);

        let missing = tx
            .index_get_all("nope", &KeyRange::All)
            .await
            .unwrap_err();
        assert_eq!(missing.kind, EngineErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_failed_upgrade_is_discarded() {
        let engine = MemoryEngine::new();
        let failing: UpgradeHandler = Box::new(|tx: &mut dyn UpgradeTransaction| -> EngineResult<()> {
            tx.create_store("items", &StoreOptions::default())?;
            tx.create_index("missing", &IndexSpec::for_field("x", false))
        });

        let err = engine.open("db", 1, failing).await.err().unwrap();
        assert_eq!(err.kind, EngineErrorKind::NotFound);
        assert_eq!(engine.version("db"), None);
        assert!(engine.database_names().is_empty());
    }

    #[tokio::test]
    async fn test_downgrade_is_version_error() {
        let engine = MemoryEngine::new();
        engine
            .open("db", 2, upgrade_with_store("items", None))
            .await
            .unwrap();
        let err = engine.open("db", 1, no_upgrade()).await.err().unwrap();
        assert_eq!(err.kind, EngineErrorKind::Version);
    }

    #[tokio::test]
    async fn test_version_change_blocks_until_closed() {
        let engine = MemoryEngine::new();
        let first = engine
            .open("db", 1, upgrade_with_store("items", None))
            .await
            .unwrap();

        let err = engine
            .open("db", 2, upgrade_with_store("items", None))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, EngineErrorKind::Blocked);
        assert_eq!(engine.version("db"), Some(1));

        let seen = Rc::new(Cell::new(None));
        let seen_in_handler = seen.clone();
        let first = Rc::new(first);
        let weak = Rc::downgrade(&first);
        first.set_version_change_handler(Box::new(move |event| {
            seen_in_handler.set(event.new_version);
            if let Some(conn) = weak.upgrade() {
                conn.close();
            }
        }));

        engine
            .open("db", 2, upgrade_with_store("items", None))
            .await
            .unwrap();
        assert_eq!(seen.get(), Some(2));
        assert!(first.is_closed());

        let err = first
            .transaction("items", TransactionMode::ReadOnly)
            .err()
            .unwrap();
        assert_eq!(err.kind, EngineErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_delete_database() {
        let engine = MemoryEngine::new();
        let conn = engine
            .open("db", 1, upgrade_with_store("items", None))
            .await
            .unwrap();
        drop(conn);

        engine.delete_database("db").await.unwrap();
        assert_eq!(engine.version("db"), None);
        engine.delete_database("db").await.unwrap();
    }
}
