//! Entity instances and facades.
//!
//! Typed facades are plain structs holding a [`StateHandle`]; they
//! implement [`Entity`] and are produced by an [`EntityFactory`]. The unit
//! of work hands them out as [`EntityInstance`] and callers recover the
//! concrete type with [`downcast_instance`].

use crate::descriptor::EntityDescriptor;
use crate::error::{CallbackError, LifecycleError};
use crate::reference::EntityReference;
use crate::state::{EntityStatus, StateHandle};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Outcome reported to after-completion notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// All changes were committed.
    Completed,
    /// The unit of work was discarded.
    Discarded,
}

/// Participant in unit-of-work completion.
///
/// Implemented by registered callbacks and, optionally, by entities.
pub trait Completable: Send + Sync {
    /// Called before any store is touched. An error vetoes completion.
    ///
    /// # Errors
    ///
    /// Returns a `CallbackError` to abort completion.
    fn before_completion(&self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Called after the unit of work closed. Errors are logged and
    /// otherwise ignored.
    ///
    /// # Errors
    ///
    /// Any error is logged by the unit of work.
    fn after_completion(&self, _status: CompletionStatus) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Access to the state behind an entity.
pub trait StateHolder {
    /// The shared state handle.
    fn state(&self) -> &StateHandle;

    /// Current lifecycle status.
    fn status(&self) -> EntityStatus {
        self.state().status()
    }
}

/// Access to the identity of an entity.
pub trait Identifiable {
    /// The entity reference.
    fn reference(&self) -> EntityReference;
}

impl<T: StateHolder + ?Sized> Identifiable for T {
    fn reference(&self) -> EntityReference {
        self.state().reference()
    }
}

/// Upcast to `Any` for typed facade recovery.
pub trait AsAny: Any + Send + Sync {
    /// Borrows as `Any`.
    fn as_any(&self) -> &dyn Any;

    /// Converts a shared instance into `Arc<dyn Any>`.
    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// An entity facade.
pub trait Entity: StateHolder + AsAny {
    /// The entity as a completion participant, if it is one.
    fn completable(&self) -> Option<&dyn Completable> {
        None
    }

    /// Creation hook, run once before a new entity enters its unit of work.
    ///
    /// # Errors
    ///
    /// A `LifecycleError` aborts creation.
    fn on_create(&self) -> Result<(), LifecycleError> {
        Ok(())
    }

    /// Constraint check, run after [`on_create`](Self::on_create).
    ///
    /// # Errors
    ///
    /// A `LifecycleError` aborts creation.
    fn check_constraints(&self) -> Result<(), LifecycleError> {
        Ok(())
    }
}

/// A shared entity facade.
pub type EntityInstance = Arc<dyn Entity>;

/// Recovers the concrete facade type of an instance.
#[must_use]
pub fn downcast_instance<T: Entity>(instance: EntityInstance) -> Option<Arc<T>> {
    instance.into_any_arc().downcast::<T>().ok()
}

/// Builds facades around entity states.
pub trait EntityFactory: Send + Sync {
    /// Wraps a state in a facade.
    fn construct(&self, descriptor: &Arc<EntityDescriptor>, state: StateHandle) -> EntityInstance;
}

impl<F> EntityFactory for F
where
    F: Fn(&Arc<EntityDescriptor>, StateHandle) -> EntityInstance + Send + Sync,
{
    fn construct(&self, descriptor: &Arc<EntityDescriptor>, state: StateHandle) -> EntityInstance {
        self(descriptor, state)
    }
}

/// Facade used for types registered without a factory.
pub struct GenericEntity {
    state: StateHandle,
}

impl GenericEntity {
    /// Wraps a state.
    #[must_use]
    pub fn new(state: StateHandle) -> Self {
        Self { state }
    }
}

impl StateHolder for GenericEntity {
    fn state(&self) -> &StateHandle {
        &self.state
    }
}

impl Entity for GenericEntity {}

impl fmt::Debug for GenericEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("GenericEntity").field(&self.state).finish()
    }
}

/// Factory producing [`GenericEntity`] facades.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericEntityFactory;

impl EntityFactory for GenericEntityFactory {
    fn construct(&self, _descriptor: &Arc<EntityDescriptor>, state: StateHandle) -> EntityInstance {
        Arc::new(GenericEntity::new(state))
    }
}
