//! Units of work spanning several stores.

use entiwork_core::{
    Application, CoreError, CoreResult, EntityStore, Identifiable, Module, StateHolder,
    UnitOfWorkFactory,
};
use entiwork_store::MemoryEntityStore;
use entiwork_testkit::prelude::*;
use std::sync::Arc;

struct Shop {
    users: Arc<MemoryEntityStore>,
    orders: Arc<MemoryEntityStore>,
    faulty_users: Arc<FaultyStore>,
    faulty_orders: Arc<FaultyStore>,
    factory: UnitOfWorkFactory,
}

impl Shop {
    fn new() -> Self {
        let users = Arc::new(MemoryEntityStore::new());
        let orders = Arc::new(MemoryEntityStore::new());
        let faulty_users = FaultyStore::new(Arc::clone(&users) as Arc<dyn EntityStore>);
        let faulty_orders = FaultyStore::new(Arc::clone(&orders) as Arc<dyn EntityStore>);
        let factory = UnitOfWorkFactory::new(shop_application(
            Arc::clone(&faulty_users) as Arc<dyn EntityStore>,
            Arc::clone(&faulty_orders) as Arc<dyn EntityStore>,
        ));
        Self {
            users,
            orders,
            faulty_users,
            faulty_orders,
            factory,
        }
    }

    fn place_order(&self) -> CoreResult<()> {
        let mut uow = self.factory.new_unit_of_work();
        let customer = create_user(&mut uow, "user:1", "Ann")?;
        create_order(&mut uow, "order:1", &customer.reference(), 250)?;
        let result = uow.complete();
        assert!(!uow.is_open());
        result
    }
}

#[test]
fn changes_land_in_their_own_stores() {
    init_test_logging();
    let shop = Shop::new();
    shop.place_order().unwrap();

    assert_eq!(shop.users.len(), 1);
    assert_eq!(shop.orders.len(), 1);
    let order = shop.orders.record(&"order:1".into()).unwrap();
    assert_eq!(order.associations["customer"].as_deref(), Some("user:1"));
    assert_eq!(order.properties["total"].as_integer(), Some(250));
    assert_eq!(shop.faulty_users.commits(), 1);
    assert_eq!(shop.faulty_orders.commits(), 1);

    let mut uow = shop.factory.new_unit_of_work();
    let order = uow.get(&"order:1".into()).unwrap();
    assert_eq!(order.state().type_name(), ORDER);
    let customer = order.state().association("customer").unwrap();
    let user = uow.get_as::<User>(&customer).unwrap();
    assert_eq!(user.name().as_deref(), Some("Ann"));
}

#[test]
fn failed_apply_cancels_prepared_stores() {
    let shop = Shop::new();
    shop.faulty_orders.fail_apply(true);

    let err = shop.place_order().unwrap_err();
    assert!(matches!(err, CoreError::Completion { .. }));
    assert_eq!(shop.faulty_users.applies(), 1);
    assert_eq!(shop.faulty_users.cancels(), 1);
    assert_eq!(shop.faulty_users.commits(), 0);
    assert!(shop.users.is_empty());
    assert!(shop.orders.is_empty());
}

#[test]
fn failed_first_apply_prepares_nothing_else() {
    let shop = Shop::new();
    shop.faulty_users.fail_apply(true);

    let err = shop.place_order().unwrap_err();
    assert!(matches!(err, CoreError::Completion { .. }));
    assert_eq!(shop.faulty_orders.applies(), 0);
    assert_eq!(shop.faulty_orders.cancels(), 0);
    assert!(shop.users.is_empty());
    assert!(shop.orders.is_empty());
}

#[test]
fn failed_commit_leaves_earlier_stores_committed() {
    let shop = Shop::new();
    shop.faulty_orders.fail_commit(true);

    let err = shop.place_order().unwrap_err();
    assert!(matches!(err, CoreError::Completion { .. }));
    assert_eq!(shop.faulty_users.commits(), 1);
    assert_eq!(shop.faulty_orders.commits(), 0);
    assert_eq!(shop.faulty_orders.cancels(), 1);
    assert_eq!(shop.users.len(), 1);
    assert!(shop.orders.is_empty());
}

#[test]
fn stores_without_changes_are_not_prepared() {
    let shop = Shop::new();
    shop.place_order().unwrap();

    let mut uow = shop.factory.new_unit_of_work();
    uow.get(&"order:1".into()).unwrap();
    uow.get_as::<User>(&"user:1".into()).unwrap().set_name("Annie").unwrap();
    uow.complete().unwrap();
    assert_eq!(shop.faulty_users.applies(), 2);
    assert_eq!(shop.faulty_orders.applies(), 1);
}

fn seed(store: &Arc<MemoryEntityStore>, id: &str, name: &str) {
    let app = TestApp::new(Arc::clone(store));
    let mut uow = app.begin();
    create_user(&mut uow, id, name).unwrap();
    uow.complete().unwrap();
}

#[test]
fn first_module_wins_for_duplicate_references() {
    let primary = Arc::new(MemoryEntityStore::new());
    let archive = Arc::new(MemoryEntityStore::new());
    seed(&primary, "user:1", "Current");
    seed(&archive, "user:1", "Archived");
    seed(&archive, "user:2", "Only archived");

    let primary_store = Arc::clone(&primary) as Arc<dyn EntityStore>;
    let archive_store = Arc::clone(&archive) as Arc<dyn EntityStore>;
    let app = Application::builder("directory")
        .module(with_users(Module::builder("primary", primary_store)))
        .module(with_users(Module::builder("archive", archive_store)))
        .build();
    let factory = UnitOfWorkFactory::new(app);

    let mut uow = factory.new_unit_of_work();
    let user = uow.get_as::<User>(&"user:1".into()).unwrap();
    assert_eq!(user.name().as_deref(), Some("Current"));
    let archived = uow.get_as::<User>(&"user:2".into()).unwrap();
    assert_eq!(archived.name().as_deref(), Some("Only archived"));

    let archive_module = Arc::clone(factory.application().module("archive").unwrap());
    let mut other = factory.new_unit_of_work();
    let user = other.get_from(&"user:1".into(), &[archive_module]).unwrap();
    assert_eq!(user.state().text("name").as_deref(), Some("Archived"));

    create_user(&mut uow, "user:3", "Fresh").unwrap();
    uow.complete().unwrap();
    assert!(primary.record(&"user:3".into()).is_some());
    assert!(archive.record(&"user:3".into()).is_none());
}
