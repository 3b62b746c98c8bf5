//! Fixtures for this crate's unit tests.

use entiwork_core::{
    Application, EntityDescriptor, EntityStore, Module, UnitOfWorkFactory, ValueKind,
};
use std::sync::Arc;

pub(crate) fn user_descriptor() -> Arc<EntityDescriptor> {
    EntityDescriptor::builder("User")
        .property("name", ValueKind::Text)
        .optional_property("email", ValueKind::Text)
        .many_association("friends")
        .build()
}

pub(crate) fn versioned_app(store: Arc<dyn EntityStore>, version: &str) -> Arc<Application> {
    Application::builder("test")
        .version(version)
        .module(Module::builder("users", store).entity(user_descriptor()))
        .build()
}

pub(crate) fn single_module_app(store: Arc<dyn EntityStore>) -> Arc<Application> {
    versioned_app(store, "1.0")
}

pub(crate) fn create_user(factory: &UnitOfWorkFactory, id: &str, name: &str) {
    let mut uow = factory.new_unit_of_work();
    let mut builder = uow.new_entity_builder("User", Some(id.into())).unwrap();
    builder.state().unwrap().set_property("name", name).unwrap();
    builder.new_instance(&mut uow).unwrap();
    uow.complete().unwrap();
}
