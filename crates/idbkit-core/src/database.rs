//! Connection management
//!
//! A [`Database`] owns one lazily opened connection. The first operation
//! that needs it computes the target version from the schemas, opens the
//! database (running the upgrade pass if the stored version is lower) and
//! caches the outcome. Every later caller, concurrent or not, gets the same
//! connection or the same error; a failed open is never retried.

use std::rc::Rc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::config::{DatabaseConfig, DEFAULT_VERSION_CHANGE_NOTICE};
use crate::engine::{
    Connection, IndexSpec, StorageEngine, StoreOptions, UpgradeHandler, UpgradeTransaction,
    VersionChangeEvent,
};
use crate::error::{DatabaseError, EngineResult, Result};
use crate::notify::{LogNotifier, Notifier};
use crate::record::Document;
use crate::schema::{self, StoreSchema};
use crate::store::StoreHandle;

/// Schema-driven database over a storage engine.
///
/// Cheap to clone; clones share the engine and the connection.
pub struct Database<E: StorageEngine> {
    inner: Rc<DatabaseInner<E>>,
}

struct DatabaseInner<E: StorageEngine> {
    engine: E,
    name: String,
    schemas: Rc<[StoreSchema]>,
    version_change_notice: String,
    notifier: Rc<dyn Notifier>,
    connection: OnceCell<Result<Rc<E::Connection>>>,
}

impl<E: StorageEngine> Clone for Database<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: StorageEngine> Database<E> {
    /// Create a database handle. Nothing is opened until first use.
    pub fn new(engine: E, name: impl Into<String>, schemas: Vec<StoreSchema>) -> Self {
        Self::builder(engine, name).stores(schemas).build()
    }

    pub fn builder(engine: E, name: impl Into<String>) -> DatabaseBuilder<E> {
        DatabaseBuilder {
            engine,
            name: name.into(),
            stores: Vec::new(),
            version_change_notice: DEFAULT_VERSION_CHANGE_NOTICE.to_string(),
            notifier: Rc::new(LogNotifier),
        }
    }

    /// Create a database handle from a declarative config.
    pub fn from_config(engine: E, config: DatabaseConfig) -> Self {
        Self::builder(engine, config.name)
            .stores(config.stores)
            .version_change_notice(config.version_change_notice)
            .build()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn schemas(&self) -> &[StoreSchema] {
        &self.inner.schemas
    }

    pub fn engine(&self) -> &E {
        &self.inner.engine
    }

    /// Version the database is opened at.
    pub fn target_version(&self) -> Result<u32> {
        schema::target_version(&self.inner.schemas)
    }

    /// Handle for the store `name`, with records of type `T`.
    ///
    /// The name is not checked here; operations on an undeclared store fail
    /// with `NotFoundError` when they run.
    pub fn store<T>(&self, name: impl Into<String>) -> StoreHandle<E, T> {
        StoreHandle::new(self.clone(), name.into())
    }

    /// Handle for the store `name` with schemaless records.
    pub fn documents(&self, name: impl Into<String>) -> StoreHandle<E, Document> {
        self.store(name)
    }

    /// Wait until the connection is open.
    pub async fn open(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    /// The shared connection, opening it on first call.
    pub async fn connection(&self) -> Result<Rc<E::Connection>> {
        self.inner
            .connection
            .get_or_init(|| self.establish())
            .await
            .clone()
    }

    async fn establish(&self) -> Result<Rc<E::Connection>> {
        let name = self.inner.name.clone();
        let version = self.target_version()?;
        debug!(database = %name, version, "opening database");

        let schemas = self.inner.schemas.clone();
        let upgrade: UpgradeHandler =
            Box::new(move |tx: &mut dyn UpgradeTransaction| run_upgrade(&schemas, tx));

        let connection = self
            .inner
            .engine
            .open(&name, version, upgrade)
            .await
            .map_err(DatabaseError::Open)?;
        let connection = Rc::new(connection);

        let weak = Rc::downgrade(&connection);
        let notifier = self.inner.notifier.clone();
        let notice = self.inner.version_change_notice.clone();
        let database = name.clone();
        connection.set_version_change_handler(Box::new(move |event: &VersionChangeEvent| {
            if let Some(connection) = weak.upgrade() {
                connection.close();
            }
            notifier.version_change(&database, event, &notice);
        }));

        info!(database = %name, version, "database open");
        Ok(connection)
    }
}

/// Create missing stores, then the indexes introduced after the stored
/// version.
///
/// Each schema's upgrade plan is walked highest version first. Indexes that
/// already exist on the store are left as they are.
fn run_upgrade(schemas: &[StoreSchema], tx: &mut dyn UpgradeTransaction) -> EngineResult<()> {
    let old_version = tx.old_version();
    debug!(old_version, new_version = tx.new_version(), "upgrade needed");

    for schema in schemas {
        if !tx.contains_store(&schema.name) {
            tx.create_store(&schema.name, &StoreOptions::default())?;
            debug!(store = %schema.name, "created object store");
        }

        let existing = tx.index_names(&schema.name)?;
        for field in schema
            .upgrade_plan(old_version)
            .into_iter()
            .filter(|f| f.index)
        {
            if existing.contains(&field.name) {
                debug!(store = %schema.name, index = %field.name, "index exists, skipping");
                continue;
            }
            tx.create_index(&schema.name, &IndexSpec::for_field(&field.name, field.unique))?;
            debug!(
                store = %schema.name,
                index = %field.name,
                unique = field.unique,
                version = field.version,
                "created index"
            );
        }
    }

    Ok(())
}

/// Builder for [`Database`].
pub struct DatabaseBuilder<E: StorageEngine> {
    engine: E,
    name: String,
    stores: Vec<StoreSchema>,
    version_change_notice: String,
    notifier: Rc<dyn Notifier>,
}

impl<E: StorageEngine> DatabaseBuilder<E> {
    pub fn store(mut self, schema: StoreSchema) -> Self {
        self.stores.push(schema);
        self
    }

    pub fn stores(mut self, schemas: impl IntoIterator<Item = StoreSchema>) -> Self {
        self.stores.extend(schemas);
        self
    }

    pub fn version_change_notice(mut self, notice: impl Into<String>) -> Self {
        self.version_change_notice = notice.into();
        self
    }

    /// Where version-change notices go (default: [`LogNotifier`]).
    pub fn notifier(mut self, notifier: impl Notifier + 'static) -> Self {
        self.notifier = Rc::new(notifier);
        self
    }

    pub fn build(self) -> Database<E> {
        Database {
            inner: Rc::new(DatabaseInner {
                engine: self.engine,
                name: self.name,
                schemas: self.stores.into(),
                version_change_notice: self.version_change_notice,
                notifier: self.notifier,
                connection: OnceCell::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineErrorKind;
    use crate::memory::MemoryEngine;
    use crate::schema::FieldOptions;

    #[tokio::test]
    async fn test_open_creates_stores_and_indexes() {
        let engine = MemoryEngine::new();
        let db = Database::new(
            engine.clone(),
            "app",
            vec![
                StoreSchema::new("users")
                    .field(1, "email", FieldOptions::unique_index())
                    .field(1, "name", FieldOptions::plain()),
                StoreSchema::new("posts").field(2, "author", FieldOptions::indexed()),
            ],
        );

        db.open().await.unwrap();

        assert_eq!(engine.version("app"), Some(2));
        assert_eq!(engine.store_names("app"), vec!["posts", "users"]);
        assert_eq!(
            engine.indexes("app", "users"),
            vec![IndexSpec::for_field("email", true)]
        );
        assert_eq!(
            engine.indexes("app", "posts"),
            vec![IndexSpec::for_field("author", false)]
        );
    }

    #[tokio::test]
    async fn test_invalid_schema_is_permanent_open_failure() {
        let engine = MemoryEngine::new();
        let db = Database::new(engine.clone(), "app", vec![StoreSchema::new("empty")]);

        assert!(matches!(
            db.open().await,
            Err(DatabaseError::InvalidSchema(_))
        ));
        assert!(matches!(
            db.open().await,
            Err(DatabaseError::InvalidSchema(_))
        ));
        assert_eq!(engine.open_count("app"), 0);
    }

    #[tokio::test]
    async fn test_open_failure_not_retried() {
        let engine = MemoryEngine::new();
        Database::new(
            engine.clone(),
            "app",
            vec![StoreSchema::new("a").version(3)],
        )
        .open()
        .await
        .unwrap();

        let stale = Database::new(engine.clone(), "app", vec![StoreSchema::new("a").version(1)]);
        let first = stale.open().await.unwrap_err();
        let second = stale.open().await.unwrap_err();

        assert_eq!(first.engine_kind(), Some(EngineErrorKind::Version));
        assert_eq!(second.engine_kind(), Some(EngineErrorKind::Version));
        assert_eq!(engine.open_count("app"), 2);
    }
}
