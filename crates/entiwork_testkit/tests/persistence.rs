//! Durable stores, migrations and the on-disk record layout.

use entiwork_core::{
    Application, EntityDescriptor, EntityReference, EntityStatus, EntityStore, MigrationRules,
    MigrationStep, Module, StateHolder, StoreError, UnitOfWorkFactory, ValueKind,
};
use entiwork_store::{FileMapStore, MapStore, SerializedEntityStore};
use entiwork_testkit::prelude::*;
use std::sync::Arc;
use tempfile::tempdir;

#[test]
fn file_store_survives_reopen() {
    init_test_logging();
    let dir = tempdir().unwrap();
    {
        let app = TestApp::file_at(dir.path());
        let mut uow = app.begin();
        let user = create_user(&mut uow, "user:1", "Ann").unwrap();
        user.add_friend("user:2".into()).unwrap();
        create_user(&mut uow, "user:2", "Bob").unwrap();
        uow.complete().unwrap();
    }

    {
        let app = TestApp::file_at(dir.path());
        let mut uow = app.begin();
        let user = uow.get_as::<User>(&"user:1".into()).unwrap();
        assert_eq!(user.name().as_deref(), Some("Ann"));
        assert_eq!(user.friends(), [EntityReference::new("user:2")]);
        assert_eq!(user.status(), EntityStatus::Loaded);

        let instance = uow.get(&"user:1".into()).unwrap();
        uow.remove_entity(&instance).unwrap();
        uow.complete().unwrap();
    }

    let app = TestApp::file_at(dir.path());
    let mut uow = app.begin();
    assert!(uow.get(&"user:1".into()).is_err());
    assert!(uow.get(&"user:2".into()).is_ok());
}

#[test]
fn open_directory_is_locked() {
    let app = TestApp::file();
    let path = app.store.map().path().to_path_buf();
    assert!(matches!(
        FileMapStore::open(&path, true),
        Err(StoreError::Locked { .. })
    ));
}

#[test]
fn json_layout_is_stable() {
    let app = TestApp::serialized(Default::default());
    let mut uow = app.begin();
    let user = create_user(&mut uow, "user:1", "Ann").unwrap();
    user.set_role("admin", "role:1".into()).unwrap();
    uow.complete().unwrap();

    let bytes = app.store.map().get(&"user:1".into()).unwrap().unwrap();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    let mut keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
    keys.sort();
    assert_eq!(
        keys,
        [
            "applicationVersion",
            "associations",
            "identity",
            "manyAssociations",
            "modified",
            "namedAssociations",
            "properties",
            "type",
            "version",
        ]
    );
    assert_eq!(json["identity"], "user:1");
    assert_eq!(json["type"], USER);
    assert_eq!(json["applicationVersion"], "1.0");
    assert_eq!(json["properties"]["name"], serde_json::json!({ "text": "Ann" }));
    assert_eq!(json["associations"]["manager"], serde_json::Value::Null);
    assert_eq!(json["manyAssociations"]["friends"], serde_json::json!([]));
    assert_eq!(json["namedAssociations"]["roles"], serde_json::json!({ "admin": "role:1" }));
}

fn legacy_application(store: Arc<dyn EntityStore>) -> Arc<Application> {
    let descriptor = EntityDescriptor::builder(USER)
        .property("fullName", ValueKind::Text)
        .build();
    Application::builder("test")
        .version("0.9")
        .module(Module::builder("users", store).entity(descriptor))
        .build()
}

fn current_application(store: Arc<dyn EntityStore>) -> Arc<Application> {
    Application::builder("test")
        .version("1.0")
        .module(with_users(Module::builder("users", store)))
        .build()
}

fn seed_legacy_users(dir: &std::path::Path, count: usize) {
    let store = Arc::new(SerializedEntityStore::new(FileMapStore::open(dir, true).unwrap()));
    let factory = UnitOfWorkFactory::new(legacy_application(store));
    let mut uow = factory.new_unit_of_work();
    for i in 0..count {
        let mut builder = uow.new_entity_builder(USER, Some(format!("user:{i}").into())).unwrap();
        builder.state().unwrap().set_property("fullName", format!("User {i}")).unwrap();
        builder.new_instance(&mut uow).unwrap();
    }
    uow.complete().unwrap();
}

fn renaming_rules() -> MigrationRules {
    let mut rules = MigrationRules::new();
    rules
        .register(Box::new(
            MigrationStep::new("0.9", "1.0", "rename-full-name")
                .rename_property(USER, "fullName", "name"),
        ))
        .unwrap();
    rules
}

#[test]
fn records_migrate_on_read() {
    let dir = tempdir().unwrap();
    seed_legacy_users(dir.path(), 1);

    let store = Arc::new(
        SerializedEntityStore::builder(FileMapStore::open(dir.path(), false).unwrap())
            .migration(renaming_rules())
            .build(),
    );
    let app = current_application(Arc::clone(&store) as Arc<dyn EntityStore>);
    let factory = UnitOfWorkFactory::new(app);
    let mut uow = factory.new_unit_of_work();
    let user = uow.get_as::<User>(&"user:0".into()).unwrap();
    assert_eq!(user.name().as_deref(), Some("User 0"));
    assert_eq!(user.status(), EntityStatus::Updated);
    uow.complete().unwrap();

    let record = store.record(&"user:0".into()).unwrap().unwrap();
    assert_eq!(record.application_version, "1.0");
    assert!(record.properties.contains_key("name"));
    assert!(!record.properties.contains_key("fullName"));
}

#[test]
fn scan_writes_migrated_records_back() {
    let dir = tempdir().unwrap();
    seed_legacy_users(dir.path(), 3);

    let store = Arc::new(
        SerializedEntityStore::builder(FileMapStore::open(dir.path(), false).unwrap())
            .migration(renaming_rules())
            .build(),
    );
    let app = current_application(Arc::clone(&store) as Arc<dyn EntityStore>);
    let module = Arc::clone(&app.modules()[0]);

    let mut names: Vec<_> = store
        .entity_states(&module)
        .unwrap()
        .map(|state| state.unwrap().property("name").and_then(|v| v.as_text().map(String::from)))
        .collect();
    names.sort();
    assert_eq!(
        names,
        [Some("User 0".to_string()), Some("User 1".to_string()), Some("User 2".to_string())]
    );

    for i in 0..3 {
        let record = store.record(&format!("user:{i}").into()).unwrap().unwrap();
        assert_eq!(record.application_version, "1.0");
        assert!(record.properties.contains_key("name"));
    }
}

#[test]
fn reads_are_served_from_the_record_cache() {
    let app = TestApp::serialized(Default::default());
    let mut uow = app.begin();
    create_user(&mut uow, "user:1", "Ann").unwrap();
    uow.complete().unwrap();

    let mut uow = app.begin();
    let user = uow.get(&"user:1".into()).unwrap();
    assert_eq!(user.state().text("name").as_deref(), Some("Ann"));
    assert!(app.store.is_cached(&"user:1".into()));
    assert!(app.store.cache_stats().unwrap().hits >= 1);
}
