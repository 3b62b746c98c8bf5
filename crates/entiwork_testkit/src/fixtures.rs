//! Test fixtures and application helpers.
//!
//! Provides a typed `User` facade, an `Order` type for multi-store
//! scenarios, and ready-made applications over every bundled store.

use entiwork_core::{
    Application, CallbackError, Completable, CompletionStatus, CoreResult, Entity, EntityDescriptor,
    EntityInstance, EntityReference, EntityStore, LifecycleError, Module, ModuleBuilder,
    StateHandle, StateHolder, UnitOfWorkFactory, UnitOfWorkInstance, ValueKind,
};
use entiwork_store::{
    FileMapStore, MemoryEntityStore, MemoryMapStore, SerializedEntityStore, StoreConfig,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Type name of [`User`].
pub const USER: &str = "User";

/// Type name of orders.
pub const ORDER: &str = "Order";

/// Descriptor of [`User`].
pub fn user_descriptor() -> Arc<EntityDescriptor> {
    EntityDescriptor::builder(USER)
        .property("name", ValueKind::Text)
        .optional_property("email", ValueKind::Text)
        .optional_association("manager")
        .many_association("friends")
        .named_association("roles")
        .build()
}

/// Descriptor of orders: a required customer and an integer total.
pub fn order_descriptor() -> Arc<EntityDescriptor> {
    EntityDescriptor::builder(ORDER)
        .property_with_default("total", ValueKind::Integer, 0i64)
        .association("customer")
        .build()
}

/// A typed facade over a user's state.
///
/// Users reject blank names at creation and count the after-completion
/// notifications they receive.
pub struct User {
    state: StateHandle,
    completions: AtomicUsize,
}

impl User {
    /// Wraps a state.
    pub fn new(state: StateHandle) -> Self {
        Self {
            state,
            completions: AtomicUsize::new(0),
        }
    }

    /// The user's name.
    pub fn name(&self) -> Option<String> {
        self.state.text("name")
    }

    /// Renames the user.
    ///
    /// # Errors
    ///
    /// Fails once the owning unit of work is closed or the user removed.
    pub fn set_name(&self, name: &str) -> CoreResult<()> {
        self.state.set_property("name", name)
    }

    /// The user's email address.
    pub fn email(&self) -> Option<String> {
        self.state.text("email")
    }

    /// Sets or clears the email address.
    ///
    /// # Errors
    ///
    /// Fails once the owning unit of work is closed or the user removed.
    pub fn set_email(&self, email: Option<&str>) -> CoreResult<()> {
        self.state.set_property("email", email)
    }

    /// The user's manager.
    pub fn manager(&self) -> Option<EntityReference> {
        self.state.association("manager")
    }

    /// Sets or clears the manager.
    ///
    /// # Errors
    ///
    /// Fails once the owning unit of work is closed or the user removed.
    pub fn set_manager(&self, manager: Option<EntityReference>) -> CoreResult<()> {
        self.state.set_association("manager", manager)
    }

    /// The user's friends, in insertion order.
    pub fn friends(&self) -> Vec<EntityReference> {
        self.state.many_association("friends")
    }

    /// Appends a friend.
    ///
    /// # Errors
    ///
    /// Fails once the owning unit of work is closed or the user removed.
    pub fn add_friend(&self, friend: EntityReference) -> CoreResult<()> {
        self.state.add_many_association("friends", friend)
    }

    /// The user's roles by key.
    pub fn roles(&self) -> BTreeMap<String, EntityReference> {
        self.state.named_association("roles")
    }

    /// Binds a role.
    ///
    /// # Errors
    ///
    /// Fails once the owning unit of work is closed or the user removed.
    pub fn set_role(&self, key: &str, role: EntityReference) -> CoreResult<()> {
        self.state.set_named_association("roles", key, role).map(|_| ())
    }

    /// Number of after-completion notifications received.
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }
}

impl StateHolder for User {
    fn state(&self) -> &StateHandle {
        &self.state
    }
}

impl Completable for User {
    fn after_completion(&self, _status: CompletionStatus) -> Result<(), CallbackError> {
        self.completions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Entity for User {
    fn completable(&self) -> Option<&dyn Completable> {
        Some(self)
    }

    fn check_constraints(&self) -> Result<(), LifecycleError> {
        if self.name().is_some_and(|n| n.trim().is_empty()) {
            return Err(LifecycleError::ConstraintViolation {
                type_name: USER.to_string(),
                reference: self.state.reference(),
                violations: vec!["name must not be blank".to_string()],
            });
        }
        Ok(())
    }
}

/// Registers [`User`] with its facade factory.
pub fn with_users(module: ModuleBuilder) -> ModuleBuilder {
    module.entity_with_factory(
        user_descriptor(),
        |_: &Arc<EntityDescriptor>, state: StateHandle| -> EntityInstance {
            Arc::new(User::new(state))
        },
    )
}

/// An application with a single `users` module over `store`.
pub fn user_application(store: Arc<dyn EntityStore>) -> Arc<Application> {
    Application::builder("test")
        .module(with_users(Module::builder("users", store)))
        .build()
}

/// An application with `users` over one store and `orders` over another.
pub fn shop_application(
    users: Arc<dyn EntityStore>,
    orders: Arc<dyn EntityStore>,
) -> Arc<Application> {
    Application::builder("shop")
        .module(with_users(Module::builder("users", users)))
        .module(Module::builder("orders", orders).entity(order_descriptor()))
        .build()
}

/// Builds and registers a user.
///
/// # Errors
///
/// Returns the builder's error, e.g. `Lifecycle` for a blank name.
pub fn create_user(uow: &mut UnitOfWorkInstance, id: &str, name: &str) -> CoreResult<Arc<User>> {
    let mut builder = uow.new_entity_builder(USER, Some(id.into()))?;
    builder.instance_as::<User>()?.set_name(name)?;
    builder.new_instance_as::<User>(uow)
}

/// Builds and registers an order for `customer`.
///
/// # Errors
///
/// Returns the builder's error.
pub fn create_order(
    uow: &mut UnitOfWorkInstance,
    id: &str,
    customer: &EntityReference,
    total: i64,
) -> CoreResult<EntityInstance> {
    let mut builder = uow.new_entity_builder(ORDER, Some(id.into()))?;
    let state = builder.state()?;
    state.set_association("customer", Some(customer.clone()))?;
    state.set_property("total", total)?;
    builder.new_instance(uow)
}

/// A store plus a factory over a `users` application.
pub struct TestApp<S> {
    /// The store.
    pub store: Arc<S>,
    /// Unit of work factory over the application.
    pub factory: UnitOfWorkFactory,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl<S: EntityStore + 'static> TestApp<S> {
    /// Wraps an existing store.
    pub fn new(store: Arc<S>) -> Self {
        let factory =
            UnitOfWorkFactory::new(user_application(Arc::clone(&store) as Arc<dyn EntityStore>));
        Self {
            store,
            factory,
            _temp_dir: None,
        }
    }

    /// Opens a unit of work for the default usecase.
    pub fn begin(&self) -> UnitOfWorkInstance {
        self.factory.new_unit_of_work()
    }
}

impl TestApp<MemoryEntityStore> {
    /// An application over a [`MemoryEntityStore`].
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryEntityStore::new()))
    }
}

impl TestApp<SerializedEntityStore<MemoryMapStore>> {
    /// An application over a JSON [`SerializedEntityStore`] in memory.
    pub fn serialized(config: StoreConfig) -> Self {
        Self::new(Arc::new(
            SerializedEntityStore::builder(MemoryMapStore::new()).config(config).build(),
        ))
    }
}

impl TestApp<SerializedEntityStore<FileMapStore>> {
    /// An application over a file-backed store in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let mut app = Self::file_at(temp_dir.path());
        app._temp_dir = Some(temp_dir);
        app
    }

    /// An application over a file-backed store in `path`.
    pub fn file_at(path: &Path) -> Self {
        let map = FileMapStore::open(path, true).expect("Failed to open file map store");
        Self::new(Arc::new(SerializedEntityStore::new(map)))
    }
}

/// A unit-of-work callback that records what it was told.
#[derive(Debug, Default)]
pub struct RecordingCallback {
    events: Mutex<Vec<String>>,
    veto: AtomicBool,
}

impl RecordingCallback {
    /// Creates a callback that lets completion proceed.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes `before_completion` fail.
    pub fn veto(&self, veto: bool) {
        self.veto.store(veto, Ordering::SeqCst);
    }

    /// Events so far: `"before"` and `"after:<status>"`.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl Completable for RecordingCallback {
    fn before_completion(&self) -> Result<(), CallbackError> {
        self.events.lock().push("before".to_string());
        if self.veto.load(Ordering::SeqCst) {
            return Err(CallbackError::new("vetoed by test"));
        }
        Ok(())
    }

    fn after_completion(&self, status: CompletionStatus) -> Result<(), CallbackError> {
        self.events.lock().push(format!("after:{status:?}"));
        Ok(())
    }
}
