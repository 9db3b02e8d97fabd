//! Shared connection and version-change tests

use std::cell::RefCell;
use std::rc::Rc;

use idbkit_core::memory::MemoryConnection;
use idbkit_core::{
    Database, DatabaseError, Document, EngineErrorKind, EngineFuture, EngineResult, FieldOptions,
    MemoryEngine, StorageEngine, StoreSchema, UpgradeHandler, VersionChangeEvent,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn doc(value: serde_json::Value) -> Document {
    serde_json::from_value(value).unwrap()
}

fn schemas(version: u32) -> Vec<StoreSchema> {
    vec![StoreSchema::new("items")
        .field(1, "kind", FieldOptions::indexed())
        .version(version)]
}

/// Memory engine whose open request stays pending for one poll.
#[derive(Clone, Default)]
struct SlowOpenEngine(MemoryEngine);

impl StorageEngine for SlowOpenEngine {
    type Connection = MemoryConnection;

    fn open<'a>(
        &'a self,
        name: &'a str,
        version: u32,
        upgrade: UpgradeHandler,
    ) -> EngineFuture<'a, EngineResult<MemoryConnection>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.0.open(name, version, upgrade).await
        })
    }

    fn delete_database<'a>(&'a self, name: &'a str) -> EngineFuture<'a, EngineResult<()>> {
        self.0.delete_database(name)
    }
}

#[tokio::test]
async fn test_concurrent_first_use_opens_once() {
    let engine = SlowOpenEngine::default();
    let db = Database::new(engine.clone(), "shared", schemas(1));

    let a = db.documents("items");
    let b = db.documents("items");
    let c = db.clone().documents("items");

    let (ra, rb, rc) = tokio::join!(
        a.create(doc(json!({"kind": "a"}))),
        b.get_all(),
        c.get_by_field("kind", "a"),
    );
    ra.unwrap();
    rb.unwrap();
    rc.unwrap();

    db.open().await.unwrap();
    assert_eq!(db.engine().0.open_count("shared"), 1);
    assert_eq!(engine.0.version("shared"), Some(1));
}

#[tokio::test]
async fn test_concurrent_open_failure_shared() {
    let engine = SlowOpenEngine::default();
    Database::new(engine.0.clone(), "app", schemas(3))
        .open()
        .await
        .unwrap();

    let stale = Database::new(engine.clone(), "app", schemas(1));
    let items = stale.documents("items");
    let (a, b) = tokio::join!(stale.open(), items.get_all());
    assert_eq!(a.unwrap_err().engine_kind(), Some(EngineErrorKind::Version));
    assert_eq!(b.unwrap_err().engine_kind(), Some(EngineErrorKind::Version));
    assert_eq!(engine.0.open_count("app"), 2);
}

#[tokio::test]
async fn test_sequential_operations_reuse_connection() {
    let engine = MemoryEngine::new();
    let db = Database::new(engine.clone(), "shared", schemas(1));
    let items = db.documents("items");

    for i in 0..5 {
        items.create(doc(json!({"kind": i}))).await.unwrap();
    }
    items.get_all().await.unwrap();

    assert_eq!(engine.open_count("shared"), 1);
    let first = db.connection().await.unwrap();
    let second = db.connection().await.unwrap();
    assert!(Rc::ptr_eq(&first, &second));
}

#[tokio::test]
async fn test_open_failure_reobserved_by_every_operation() {
    let engine = MemoryEngine::new();
    Database::new(engine.clone(), "app", schemas(4))
        .open()
        .await
        .unwrap();

    let stale = Database::new(engine.clone(), "app", schemas(2));
    let items = stale.documents("items");

    for _ in 0..3 {
        let err = items.get_all().await.unwrap_err();
        assert!(matches!(err, DatabaseError::Open(_)));
        assert_eq!(err.engine_kind(), Some(EngineErrorKind::Version));
    }
    assert_eq!(engine.open_count("app"), 2);
}

#[tokio::test]
async fn test_version_change_closes_and_notifies() {
    let engine = MemoryEngine::new();
    let notices: Rc<RefCell<Vec<(String, VersionChangeEvent, String)>>> = Rc::default();
    let sink = notices.clone();

    let old = Database::builder(engine.clone(), "app")
        .stores(schemas(1))
        .version_change_notice("Reload to continue")
        .notifier(move |db: &str, event: &VersionChangeEvent, notice: &str| {
            sink.borrow_mut()
                .push((db.to_string(), *event, notice.to_string()));
        })
        .build();
    let old_items = old.documents("items");
    old_items.create(doc(json!({"kind": "x"}))).await.unwrap();

    // Another context upgrades the same database.
    let new = Database::new(engine.clone(), "app", schemas(2));
    let new_items = new.documents("items");
    assert_eq!(new_items.get_all().await.unwrap().len(), 1);

    assert_eq!(
        notices.borrow().as_slice(),
        &[(
            "app".to_string(),
            VersionChangeEvent {
                old_version: 1,
                new_version: Some(2),
            },
            "Reload to continue".to_string(),
        )]
    );

    // The preempted connection is closed; its operations now fail.
    let err = old_items.get_all().await.unwrap_err();
    assert_eq!(err.engine_kind(), Some(EngineErrorKind::InvalidState));
    assert_eq!(engine.open_count("app"), 2);
}

#[tokio::test]
async fn test_delete_database_preempts_connection() {
    let engine = MemoryEngine::new();
    let db = Database::new(engine.clone(), "gone", schemas(1));
    db.open().await.unwrap();

    engine.delete_database("gone").await.unwrap();
    assert_eq!(engine.version("gone"), None);

    let err = db.documents("items").get_all().await.unwrap_err();
    assert_eq!(err.engine_kind(), Some(EngineErrorKind::InvalidState));
}
