//! IndexedDB engine for idbkit (browser WASM)
//!
//! Implements the `idbkit-core` engine traits over web-sys so a
//! [`Database`](idbkit_core::Database) can run against the browser's
//! IndexedDB. Requests are bridged to futures through `js_sys::Promise`,
//! and exceptions are mapped to engine error kinds by their DOM name.
//!
//! # Example
//!
//! ```rust,ignore
//! use idbkit_core::{FieldOptions, StoreSchema};
//! use idbkit_indexeddb::IndexedDb;
//!
//! let db = IndexedDb::browser(
//!     "app",
//!     vec![StoreSchema::new("users").field(1, "email", FieldOptions::unique_index())],
//! );
//!
//! let users = db.documents("users");
//! let found = users.get_by_field("email", "alice@example.com").await?;
//! ```

pub mod convert;
pub mod engine;
pub mod error;
pub mod idb;
pub mod notify;

pub use engine::{IndexedDbConnection, IndexedDbEngine, IndexedDbTransaction};
pub use error::IndexedDbError;
pub use notify::AlertNotifier;

use idbkit_core::{Database, DatabaseConfig, StoreSchema};

/// A [`Database`] backed by the browser's IndexedDB.
pub type IndexedDb = Database<IndexedDbEngine>;

/// Browser constructors: IndexedDB engine, notices shown with `alert`.
pub trait BrowserDatabase {
    fn browser(name: impl Into<String>, schemas: Vec<StoreSchema>) -> Self;

    fn browser_from_config(config: DatabaseConfig) -> Self;
}

impl BrowserDatabase for IndexedDb {
    fn browser(name: impl Into<String>, schemas: Vec<StoreSchema>) -> Self {
        Database::builder(IndexedDbEngine::new(), name)
            .stores(schemas)
            .notifier(AlertNotifier)
            .build()
    }

    fn browser_from_config(config: DatabaseConfig) -> Self {
        Database::builder(IndexedDbEngine::new(), config.name)
            .stores(config.stores)
            .version_change_notice(config.version_change_notice)
            .notifier(AlertNotifier)
            .build()
    }
}
