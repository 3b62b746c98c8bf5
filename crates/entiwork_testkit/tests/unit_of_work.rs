//! Unit-of-work behaviour over real stores.

use entiwork_core::{
    CompletionStatus, CoreError, Entity, EntityReference, EntityStatus, Identifiable,
    LifecycleError, StateHolder, Usecase,
};
use entiwork_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn repeated_lookups_share_one_instance() {
    init_test_logging();
    let app = TestApp::memory();
    let mut uow = app.begin();
    create_user(&mut uow, "user:1", "Ann").unwrap();
    uow.complete().unwrap();

    let mut uow = app.begin();
    let first = uow.get(&"user:1".into()).unwrap();
    first.state().set_property("name", "Anna").unwrap();
    let second = uow.get(&"user:1".into()).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.state().text("name").as_deref(), Some("Anna"));
}

#[test]
fn built_instance_is_the_cached_instance() {
    let app = TestApp::memory();
    let mut uow = app.begin();
    let user = create_user(&mut uow, "user:1", "Ann").unwrap();
    let fetched = uow.get_as::<User>(&"user:1".into()).unwrap();
    assert!(Arc::ptr_eq(&user, &fetched));
}

#[test]
fn new_until_complete_then_loaded() {
    let app = TestApp::memory();
    let mut uow = app.begin();
    let user = create_user(&mut uow, "user:1", "Ann").unwrap();
    assert_eq!(user.status(), EntityStatus::New);
    assert!(user.state().version().is_none());
    uow.complete().unwrap();

    let mut uow = app.begin();
    let user = uow.get_as::<User>(&"user:1".into()).unwrap();
    assert_eq!(user.status(), EntityStatus::Loaded);
    assert!(!user.state().version().is_none());
    user.set_email(Some("ann@example.com")).unwrap();
    assert_eq!(user.status(), EntityStatus::Updated);
}

#[test]
fn discarded_changes_are_invisible() {
    let app = TestApp::memory();
    let mut uow = app.begin();
    create_user(&mut uow, "user:1", "Ann").unwrap();
    uow.complete().unwrap();

    let mut uow = app.begin();
    let user = uow.get_as::<User>(&"user:1".into()).unwrap();
    user.set_name("Changed").unwrap();
    create_user(&mut uow, "user:2", "Bob").unwrap();
    uow.discard();
    assert!(!uow.is_open());
    assert!(matches!(user.set_name("Later"), Err(CoreError::IllegalState { .. })));

    let mut uow = app.begin();
    let user = uow.get_as::<User>(&"user:1".into()).unwrap();
    assert_eq!(user.name().as_deref(), Some("Ann"));
    assert!(matches!(
        uow.get(&"user:2".into()),
        Err(CoreError::NoSuchEntity { .. })
    ));
    assert_eq!(app.store.len(), 1);
}

#[test]
fn associations_survive_a_round_trip() {
    let app = TestApp::serialized(Default::default());
    let mut uow = app.begin();
    create_user(&mut uow, "user:boss", "Boss").unwrap();
    let user = create_user(&mut uow, "user:1", "Ann").unwrap();
    user.set_manager(Some("user:boss".into())).unwrap();
    user.add_friend("user:2".into()).unwrap();
    user.add_friend("user:3".into()).unwrap();
    user.add_friend("user:2".into()).unwrap();
    user.set_role("admin", "role:1".into()).unwrap();
    uow.complete().unwrap();

    let mut uow = app.begin();
    let user = uow.get_as::<User>(&"user:1".into()).unwrap();
    assert_eq!(user.manager(), Some(EntityReference::new("user:boss")));
    let friends: Vec<_> = user.friends().iter().map(|r| r.as_str().to_string()).collect();
    assert_eq!(friends, ["user:2", "user:3", "user:2"]);
    assert_eq!(user.roles()["admin"], EntityReference::new("role:1"));
    assert_eq!(user.email(), None);
}

#[test]
fn blank_name_fails_creation() {
    let app = TestApp::memory();
    let mut uow = app.begin();
    let err = create_user(&mut uow, "user:1", "  ").err().unwrap();
    assert!(matches!(
        err,
        CoreError::Lifecycle(LifecycleError::ConstraintViolation { .. })
    ));
    assert!(!uow.is_cached(&"user:1".into()));
    uow.complete().unwrap();
    assert!(app.store.is_empty());
}

#[test]
fn removed_entity_is_deleted_on_complete() {
    let app = TestApp::memory();
    let mut uow = app.begin();
    create_user(&mut uow, "user:1", "Ann").unwrap();
    uow.complete().unwrap();

    let mut uow = app.begin();
    let user = uow.get(&"user:1".into()).unwrap();
    uow.remove_entity(&user).unwrap();
    assert_eq!(user.status(), EntityStatus::Removed);
    assert!(matches!(
        uow.get(&"user:1".into()),
        Err(CoreError::NoSuchEntity { .. })
    ));
    uow.complete().unwrap();
    assert!(app.store.is_empty());
}

#[test]
fn pause_and_resume_move_the_context() {
    let app = TestApp::memory();
    let mut outer = app.begin();
    let mut inner = app.begin();
    assert_eq!(app.factory.current_unit_of_work().as_ref(), Some(inner.id()));

    inner.pause().unwrap();
    assert!(inner.is_paused());
    assert_eq!(app.factory.current_unit_of_work().as_ref(), Some(outer.id()));
    assert!(matches!(inner.pause(), Err(CoreError::IllegalState { .. })));

    inner.resume().unwrap();
    assert_eq!(app.factory.current_unit_of_work().as_ref(), Some(inner.id()));
    assert!(matches!(inner.resume(), Err(CoreError::IllegalState { .. })));

    inner.complete().unwrap();
    assert_eq!(app.factory.current_unit_of_work().as_ref(), Some(outer.id()));
    outer.discard();
    assert_eq!(app.factory.current_unit_of_work(), None);
}

#[test]
fn prune_on_pause_drops_only_loaded_instances() {
    let app = TestApp::memory();
    let mut uow = app.begin();
    create_user(&mut uow, "user:1", "Ann").unwrap();
    create_user(&mut uow, "user:2", "Bob").unwrap();
    uow.complete().unwrap();

    let mut uow = app
        .factory
        .new_unit_of_work_for(Usecase::new("browse").prune_on_pause(true));
    uow.get(&"user:1".into()).unwrap();
    uow.get(&"user:2".into()).unwrap().state().set_property("name", "Bobby").unwrap();
    create_user(&mut uow, "user:3", "Cid").unwrap();

    uow.pause().unwrap();
    assert!(!uow.is_cached(&"user:1".into()));
    assert!(uow.is_cached(&"user:2".into()));
    assert!(uow.is_cached(&"user:3".into()));

    uow.resume().unwrap();
    uow.complete().unwrap();
    let stored = app.store.record(&"user:2".into()).unwrap();
    assert_eq!(stored.properties["name"].as_text(), Some("Bobby"));
    assert_eq!(app.store.len(), 3);
}

#[test]
fn callbacks_and_instances_are_notified() {
    let app = TestApp::memory();
    let callback = RecordingCallback::new();
    let mut uow = app.begin();
    uow.add_callback(callback.clone());
    let user = create_user(&mut uow, "user:1", "Ann").unwrap();
    uow.complete().unwrap();

    assert_eq!(callback.events(), ["before", "after:Completed"]);
    assert_eq!(user.completions(), 1);

    let callback = RecordingCallback::new();
    let mut uow = app.begin();
    uow.add_callback(callback.clone());
    uow.discard();
    assert_eq!(callback.events(), [format!("after:{:?}", CompletionStatus::Discarded)]);
}

#[test]
fn veto_keeps_unit_of_work_open() {
    let app = TestApp::memory();
    let callback = RecordingCallback::new();
    callback.veto(true);
    let mut uow = app.begin();
    let as_callback: Arc<dyn entiwork_core::UnitOfWorkCallback> = callback.clone();
    uow.add_callback(Arc::clone(&as_callback));
    create_user(&mut uow, "user:1", "Ann").unwrap();

    let err = uow.complete().unwrap_err();
    assert!(matches!(err, CoreError::Completion { .. }));
    assert!(uow.is_open());
    assert!(app.store.is_empty());

    assert!(uow.remove_callback(&as_callback));
    uow.complete().unwrap();
    assert_eq!(app.store.len(), 1);
}

#[test]
fn references_are_reported_by_facades() {
    let app = TestApp::memory();
    let mut uow = app.begin();
    let user = create_user(&mut uow, "user:1", "Ann").unwrap();
    assert_eq!(user.reference(), EntityReference::new("user:1"));
    assert!(user.completable().is_some());
}
