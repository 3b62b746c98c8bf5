//! Applications and modules.
//!
//! An [`Application`] is an ordered list of [`Module`]s. Each module owns
//! one entity store and the entity types visible through it. Lookups that
//! do not name a module query modules in registration order.

use crate::descriptor::EntityDescriptor;
use crate::entity::{EntityFactory, EntityInstance, GenericEntityFactory};
use crate::state::StateHandle;
use crate::store::EntityStore;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Application version used when none is configured.
pub const DEFAULT_APPLICATION_VERSION: &str = "1.0";

/// An entity type registered in a module.
#[derive(Clone)]
pub struct EntityModel {
    descriptor: Arc<EntityDescriptor>,
    factory: Arc<dyn EntityFactory>,
}

impl EntityModel {
    /// Pairs a descriptor with the factory building its facades.
    #[must_use]
    pub fn new(descriptor: Arc<EntityDescriptor>, factory: Arc<dyn EntityFactory>) -> Self {
        Self { descriptor, factory }
    }

    /// The type descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    /// Wraps a state in this type's facade.
    #[must_use]
    pub fn construct(&self, state: StateHandle) -> EntityInstance {
        self.factory.construct(&self.descriptor, state)
    }
}

impl fmt::Debug for EntityModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityModel")
            .field("type", &self.descriptor.type_name())
            .finish_non_exhaustive()
    }
}

/// A group of entity types sharing one store.
#[derive(Debug)]
pub struct Module {
    name: String,
    application_version: String,
    store: Arc<dyn EntityStore>,
    models: HashMap<String, EntityModel>,
}

impl Module {
    /// Starts a module backed by `store`.
    #[must_use]
    pub fn builder(name: impl Into<String>, store: Arc<dyn EntityStore>) -> ModuleBuilder {
        ModuleBuilder {
            name: name.into(),
            store,
            models: Vec::new(),
        }
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version of the owning application, stamped on written records.
    #[must_use]
    pub fn application_version(&self) -> &str {
        &self.application_version
    }

    /// The module's store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EntityStore> {
        &self.store
    }

    /// Looks up a registered type.
    #[must_use]
    pub fn model(&self, type_name: &str) -> Option<&EntityModel> {
        self.models.get(type_name)
    }

    /// Looks up a registered type's descriptor.
    #[must_use]
    pub fn descriptor(&self, type_name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.models.get(type_name).map(EntityModel::descriptor)
    }

    /// Returns true if the type is visible in this module.
    #[must_use]
    pub fn declares(&self, type_name: &str) -> bool {
        self.models.contains_key(type_name)
    }

    /// Names of the registered types.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

/// Builder for [`Module`].
pub struct ModuleBuilder {
    name: String,
    store: Arc<dyn EntityStore>,
    models: Vec<EntityModel>,
}

impl ModuleBuilder {
    /// Registers a type with the generic facade.
    #[must_use]
    pub fn entity(self, descriptor: Arc<EntityDescriptor>) -> Self {
        self.entity_with_factory(descriptor, GenericEntityFactory)
    }

    /// Registers a type with a custom facade factory.
    #[must_use]
    pub fn entity_with_factory(
        mut self,
        descriptor: Arc<EntityDescriptor>,
        factory: impl EntityFactory + 'static,
    ) -> Self {
        self.models.push(EntityModel::new(descriptor, Arc::new(factory)));
        self
    }

    fn build(self, application_version: &str) -> Module {
        let models = self
            .models
            .into_iter()
            .map(|m| (m.descriptor.type_name().to_string(), m))
            .collect();
        Module {
            name: self.name,
            application_version: application_version.to_string(),
            store: self.store,
            models,
        }
    }
}

/// The set of modules an application is assembled from.
#[derive(Debug)]
pub struct Application {
    name: String,
    version: String,
    modules: Vec<Arc<Module>>,
}

impl Application {
    /// Starts an application.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder {
            name: name.into(),
            version: DEFAULT_APPLICATION_VERSION.to_string(),
            modules: Vec::new(),
        }
    }

    /// Application name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Application (schema) version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Modules in registration order.
    #[must_use]
    pub fn modules(&self) -> &[Arc<Module>] {
        &self.modules
    }

    /// Looks up a module by name.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<&Arc<Module>> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Modules declaring the type, in registration order.
    #[must_use]
    pub fn modules_declaring(&self, type_name: &str) -> Vec<Arc<Module>> {
        self.modules
            .iter()
            .filter(|m| m.declares(type_name))
            .cloned()
            .collect()
    }
}

/// Builder for [`Application`].
pub struct ApplicationBuilder {
    name: String,
    version: String,
    modules: Vec<ModuleBuilder>,
}

impl ApplicationBuilder {
    /// Sets the application version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Adds a module.
    #[must_use]
    pub fn module(mut self, module: ModuleBuilder) -> Self {
        self.modules.push(module);
        self
    }

    /// Assembles the application.
    #[must_use]
    pub fn build(self) -> Arc<Application> {
        let version = self.version;
        let modules = self
            .modules
            .into_iter()
            .map(|m| Arc::new(m.build(&version)))
            .collect();
        Arc::new(Application {
            name: self.name,
            version,
            modules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{user_descriptor, TestStore};

    fn two_module_app() -> Arc<Application> {
        Application::builder("shop")
            .version("2.1")
            .module(Module::builder("people", TestStore::new()).entity(user_descriptor()))
            .module(
                Module::builder("archive", TestStore::new())
                    .entity(user_descriptor())
                    .entity(EntityDescriptor::builder("Order").build()),
            )
            .build()
    }

    #[test]
    fn modules_keep_registration_order() {
        let app = two_module_app();
        let names: Vec<_> = app.modules().iter().map(|m| m.name()).collect();
        assert_eq!(names, ["people", "archive"]);
        let declaring: Vec<_> = app
            .modules_declaring("User")
            .iter()
            .map(|m| m.name().to_string())
            .collect();
        assert_eq!(declaring, ["people", "archive"]);
        assert!(app.modules_declaring("Ghost").is_empty());
    }

    #[test]
    fn modules_carry_application_version() {
        let app = two_module_app();
        assert_eq!(app.version(), "2.1");
        assert!(app.modules().iter().all(|m| m.application_version() == "2.1"));
    }

    #[test]
    fn module_lookup() {
        let app = two_module_app();
        let archive = app.module("archive").unwrap();
        assert!(archive.declares("Order"));
        assert!(!app.module("people").unwrap().declares("Order"));
        assert_eq!(archive.descriptor("Order").unwrap().type_name(), "Order");
        let mut types: Vec<_> = archive.type_names().collect();
        types.sort_unstable();
        assert_eq!(types, ["Order", "User"]);
        assert!(app.module("missing").is_none());
    }

    #[test]
    fn default_version_applies() {
        let app = Application::builder("plain").build();
        assert_eq!(app.version(), DEFAULT_APPLICATION_VERSION);
        assert_eq!(app.name(), "plain");
    }
}
