//! Storage engine abstraction
//!
//! The engine is whatever actually stores records: IndexedDB in a browser,
//! [`MemoryEngine`](crate::MemoryEngine) in tests. These traits describe the
//! capabilities the database layer relies on and nothing more:
//!
//! - named, versioned open with an upgrade callback
//! - object stores keyed by an auto-incrementing integer key
//! - secondary indexes with an optional uniqueness constraint
//! - transactions scoped to one store and an access mode
//! - get / getAll / add / put / delete and a forward cursor scan
//!
//! Everything runs on a single thread, so futures are not `Send`.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::error::EngineResult;
use crate::key::{KeyRange, RecordId};

/// Boxed future returned by engine requests.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Callback run inside the version-change transaction of an open request.
pub type UpgradeHandler = Box<dyn FnMut(&mut dyn UpgradeTransaction) -> EngineResult<()>>;

/// Callback run when another context wants a different version.
pub type VersionChangeHandler = Box<dyn FnMut(&VersionChangeEvent)>;

/// Predicate applied to each record during a cursor scan.
pub type ScanPredicate = Box<dyn Fn(&Value) -> bool>;

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// Key policy of a new object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub key_path: String,
    pub auto_increment: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key_path: "id".to_string(),
            auto_increment: true,
        }
    }
}

/// A secondary index to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub key_path: String,
    pub unique: bool,
}

impl IndexSpec {
    /// Index named after the field it covers.
    pub fn for_field(field: impl Into<String>, unique: bool) -> Self {
        let field = field.into();
        Self {
            name: field.clone(),
            key_path: field,
            unique,
        }
    }
}

/// Notification that another connection requested a version change.
///
/// `new_version` is `None` when the database is being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChangeEvent {
    pub old_version: u32,
    pub new_version: Option<u32>,
}

/// Schema operations available while an upgrade is in progress.
pub trait UpgradeTransaction {
    /// Version stored before this upgrade (0 for a new database).
    fn old_version(&self) -> u32;

    /// Version being upgraded to.
    fn new_version(&self) -> u32;

    fn contains_store(&self, name: &str) -> bool;

    fn create_store(&mut self, name: &str, options: &StoreOptions) -> EngineResult<()>;

    /// Names of the indexes on `store`. Fails with `NotFoundError` if the
    /// store does not exist.
    fn index_names(&self, store: &str) -> EngineResult<Vec<String>>;

    fn create_index(&mut self, store: &str, index: &IndexSpec) -> EngineResult<()>;
}

/// A factory that opens versioned databases.
pub trait StorageEngine {
    type Connection: Connection + 'static;

    /// Open `name` at `version`.
    ///
    /// If the stored version is lower, `upgrade` runs once inside the
    /// version-change transaction before the open resolves; an error from it
    /// aborts the upgrade and fails the open.
    fn open<'a>(
        &'a self,
        name: &'a str,
        version: u32,
        upgrade: UpgradeHandler,
    ) -> EngineFuture<'a, EngineResult<Self::Connection>>;

    /// Delete a database and everything in it.
    fn delete_database<'a>(&'a self, name: &'a str) -> EngineFuture<'a, EngineResult<()>>;
}

/// An open database.
pub trait Connection {
    type Transaction: Transaction;

    fn name(&self) -> &str;

    fn version(&self) -> u32;

    /// Start a transaction over a single store.
    fn transaction(&self, store: &str, mode: TransactionMode) -> EngineResult<Self::Transaction>;

    /// Replace the handler called on version-change notifications.
    fn set_version_change_handler(&self, handler: VersionChangeHandler);

    /// Close the connection. Transactions started afterwards fail with
    /// `InvalidStateError`.
    fn close(&self);
}

/// A transaction over one store. Each method issues exactly one request.
pub trait Transaction {
    /// Insert a new record; the key generator assigns the key unless the
    /// value already carries one. Fails with `ConstraintError` if the key
    /// exists.
    fn add(&self, value: Value) -> EngineFuture<'_, EngineResult<RecordId>>;

    /// Insert or replace the record at the value's key.
    fn put(&self, value: Value) -> EngineFuture<'_, EngineResult<RecordId>>;

    fn get(&self, key: RecordId) -> EngineFuture<'_, EngineResult<Option<Value>>>;

    /// All records in primary-key order.
    fn get_all(&self) -> EngineFuture<'_, EngineResult<Vec<Value>>>;

    /// Remove the record at `key`. Absent keys are not an error.
    fn delete(&self, key: RecordId) -> EngineFuture<'_, EngineResult<()>>;

    /// Records whose `index` key falls in `range`, in index-key order.
    fn index_get_all<'a>(
        &'a self,
        index: &'a str,
        range: &'a KeyRange,
    ) -> EngineFuture<'a, EngineResult<Vec<Value>>>;

    /// Walk every record with a forward cursor and collect those accepted by
    /// `predicate`.
    fn scan(&self, predicate: ScanPredicate) -> EngineFuture<'_, EngineResult<Vec<Value>>>;
}
