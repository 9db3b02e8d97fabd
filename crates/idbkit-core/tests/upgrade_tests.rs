//! Versioning and upgrade pass tests

use idbkit_core::{
    target_version, Database, DatabaseConfig, Document, EngineErrorKind, FieldOptions, IndexSpec,
    MemoryEngine, StoreSchema,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn doc(value: serde_json::Value) -> Document {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_target_version_across_schemas() {
    let schemas = vec![
        StoreSchema::new("a").version(1).version(2),
        StoreSchema::new("b").version(5),
        StoreSchema::new("c").version(3),
    ];
    assert_eq!(target_version(&schemas).unwrap(), 5);
}

#[tokio::test]
async fn test_fresh_open_runs_full_upgrade() {
    let engine = MemoryEngine::new();
    let db = Database::new(
        engine.clone(),
        "fresh",
        vec![StoreSchema::new("A").field(1, "x", FieldOptions::indexed())],
    );

    db.open().await.unwrap();

    assert_eq!(engine.version("fresh"), Some(1));
    assert_eq!(engine.store_names("fresh"), vec!["A"]);
    assert_eq!(
        engine.indexes("fresh", "A"),
        vec![IndexSpec::for_field("x", false)]
    );
}

#[tokio::test]
async fn test_reopen_adds_index_and_keeps_records() {
    let engine = MemoryEngine::new();

    let v1 = vec![StoreSchema::new("people").field(1, "name", FieldOptions::indexed())];
    {
        let db = Database::new(engine.clone(), "app", v1);
        let people = db.documents("people");
        people
            .create(doc(json!({"name": "Ada", "city": "London"})))
            .await
            .unwrap();
        people
            .create(doc(json!({"name": "Grace", "city": "New York"})))
            .await
            .unwrap();
    }

    let v2 = vec![StoreSchema::new("people")
        .field(1, "name", FieldOptions::indexed())
        .field(2, "city", FieldOptions::indexed())];
    let db = Database::new(engine.clone(), "app", v2);
    let people = db.documents("people");

    let all = people.get_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(engine.version("app"), Some(2));

    let londoners = people.get_by_field("city", "London").await.unwrap();
    assert_eq!(londoners.len(), 1);
    assert_eq!(londoners[0].get("name"), Some(&json!("Ada")));

    let names = people.get_by_field("name", "Grace").await.unwrap();
    assert_eq!(names.len(), 1);
}

#[tokio::test]
async fn test_reopen_adds_new_store() {
    let engine = MemoryEngine::new();
    Database::new(
        engine.clone(),
        "app",
        vec![StoreSchema::new("a").version(1)],
    )
    .open()
    .await
    .unwrap();

    let db = Database::new(
        engine.clone(),
        "app",
        vec![
            StoreSchema::new("a").version(1),
            StoreSchema::new("b").field(2, "k", FieldOptions::unique_index()),
        ],
    );
    db.open().await.unwrap();

    assert_eq!(engine.store_names("app"), vec!["a", "b"]);
    assert_eq!(
        engine.indexes("app", "b"),
        vec![IndexSpec::for_field("k", true)]
    );
}

#[tokio::test]
async fn test_same_version_reopen_skips_upgrade() {
    let engine = MemoryEngine::new();
    let schemas = vec![StoreSchema::new("a").field(1, "x", FieldOptions::indexed())];
    Database::new(engine.clone(), "app", schemas.clone())
        .open()
        .await
        .unwrap();

    // Same version with a field the first pass never saw: no upgrade runs.
    let altered = vec![StoreSchema::new("a")
        .field(1, "x", FieldOptions::indexed())
        .field(1, "y", FieldOptions::indexed())];
    Database::new(engine.clone(), "app", altered)
        .open()
        .await
        .unwrap();

    assert_eq!(
        engine.indexes("app", "a"),
        vec![IndexSpec::for_field("x", false)]
    );
}

#[tokio::test]
async fn test_redefined_field_highest_version_wins() {
    let engine = MemoryEngine::new();
    let db = Database::new(
        engine.clone(),
        "app",
        vec![StoreSchema::new("tags")
            .field(1, "slug", FieldOptions::indexed())
            .field(2, "slug", FieldOptions::unique_index())
            .field(1, "label", FieldOptions::indexed())
            .field(3, "label", FieldOptions::plain())],
    );
    db.open().await.unwrap();

    assert_eq!(
        engine.indexes("app", "tags"),
        vec![IndexSpec::for_field("slug", true)]
    );
}

#[tokio::test]
async fn test_existing_index_left_untouched() {
    let engine = MemoryEngine::new();
    Database::new(
        engine.clone(),
        "app",
        vec![StoreSchema::new("tags").field(1, "slug", FieldOptions::indexed())],
    )
    .open()
    .await
    .unwrap();

    // Version 2 redeclares "slug" as unique; the existing index is kept.
    let db = Database::new(
        engine.clone(),
        "app",
        vec![StoreSchema::new("tags")
            .field(1, "slug", FieldOptions::indexed())
            .field(2, "slug", FieldOptions::unique_index())],
    );
    db.open().await.unwrap();

    assert_eq!(engine.version("app"), Some(2));
    assert_eq!(
        engine.indexes("app", "tags"),
        vec![IndexSpec::for_field("slug", false)]
    );
}

#[tokio::test]
async fn test_failed_upgrade_is_open_failure() {
    let engine = MemoryEngine::new();
    {
        let db = Database::new(
            engine.clone(),
            "app",
            vec![StoreSchema::new("users").field(1, "email", FieldOptions::plain())],
        );
        let users = db.documents("users");
        users.create(doc(json!({"email": "dup@x"}))).await.unwrap();
        users.create(doc(json!({"email": "dup@x"}))).await.unwrap();
    }

    // A unique index over duplicate data aborts the upgrade.
    let db = Database::new(
        engine.clone(),
        "app",
        vec![StoreSchema::new("users")
            .field(1, "email", FieldOptions::plain())
            .field(2, "email", FieldOptions::unique_index())],
    );
    let err = db.open().await.unwrap_err();
    assert_eq!(err.engine_kind(), Some(EngineErrorKind::Constraint));

    let users = db.documents("users");
    let err = users.get_all().await.unwrap_err();
    assert_eq!(err.engine_kind(), Some(EngineErrorKind::Constraint));

    // Nothing from the aborted pass was applied.
    assert_eq!(engine.version("app"), Some(1));
    assert!(engine.indexes("app", "users").is_empty());
}

#[tokio::test]
async fn test_from_config_manifest() {
    let engine = MemoryEngine::new();
    let config = DatabaseConfig::from_json(
        r#"{
            "name": "manifest",
            "stores": [
                {"name": "users", "fields": {"1": {"email": {"index": true, "unique": true}}}},
                {"name": "posts", "fields": {"1": {}, "2": {"author": {"index": true}}}}
            ],
            "version_change_notice": "Reload please"
        }"#,
    )
    .unwrap();

    let db = Database::from_config(engine.clone(), config);
    assert_eq!(db.name(), "manifest");
    let names: Vec<&str> = db.schemas().iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["users", "posts"]);
    assert_eq!(db.target_version().unwrap(), 2);
    db.open().await.unwrap();

    assert_eq!(engine.store_names("manifest"), vec!["posts", "users"]);
    assert_eq!(
        engine.indexes("manifest", "posts"),
        vec![IndexSpec::for_field("author", false)]
    );
}
