//! idbkit core
//!
//! Schema-driven CRUD over versioned object-store engines. A [`Database`]
//! takes a name and a list of [`StoreSchema`]s, opens the database once at
//! the highest declared version (creating stores and indexes as needed) and
//! hands out [`StoreHandle`]s whose operations return futures.
//!
//! The engine is injected: [`MemoryEngine`] here, IndexedDB in the
//! `idbkit-indexeddb` crate. Everything is single-threaded, so handles and
//! futures are not `Send`.
//!
//! # Features
//!
//! - `subscriber` (default) - `logging` helpers built on tracing-subscriber
//!
//! # Example
//!
//! ```rust
//! use idbkit_core::{Database, FieldFilter, FieldOptions, MemoryEngine, StoreSchema};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct User {
//!     email: String,
//!     team: String,
//! }
//!
//! # async fn run() -> idbkit_core::Result<()> {
//! let db = Database::new(
//!     MemoryEngine::new(),
//!     "app",
//!     vec![StoreSchema::new("users").field(1, "email", FieldOptions::unique_index())],
//! );
//!
//! let users = db.store::<User>("users");
//! let alice = users
//!     .create(User { email: "alice@example.com".into(), team: "core".into() })
//!     .await?;
//!
//! let found = users.get_by_field("email", "alice@example.com").await?;
//! assert_eq!(found[0].id, alice.id);
//!
//! let core = users.get_by_fields(&FieldFilter::new().with("team", "core")).await?;
//! assert_eq!(core.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod key;
#[cfg(feature = "subscriber")]
pub mod logging;
pub mod memory;
pub mod notify;
pub mod record;
pub mod schema;
pub mod store;

// Re-export main types at crate root
pub use config::{DatabaseConfig, DEFAULT_VERSION_CHANGE_NOTICE};
pub use database::{Database, DatabaseBuilder};
pub use engine::{
    Connection, EngineFuture, IndexSpec, ScanPredicate, StorageEngine, StoreOptions,
    Transaction, TransactionMode, UpgradeHandler, UpgradeTransaction, VersionChangeEvent,
    VersionChangeHandler,
};
pub use error::{DatabaseError, EngineError, EngineErrorKind, EngineResult, Result};
pub use key::{is_valid_record_id, KeyRange, RecordId, MAX_RECORD_ID};
pub use memory::MemoryEngine;
pub use notify::{LogNotifier, Notifier};
pub use record::{Document, Record};
pub use schema::{target_version, FieldDefinition, FieldOptions, StoreSchema};
pub use store::{FieldFilter, StoreHandle};
