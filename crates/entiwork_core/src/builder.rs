//! Staging for new entities.

use crate::entity::{downcast_instance, Entity, EntityInstance};
use crate::error::{CoreError, CoreResult, LifecycleError};
use crate::module::{EntityModel, Module};
use crate::reference::EntityReference;
use crate::state::{EntityState, EntityStatus, StateHandle};
use crate::types::{Timestamp, UnitOfWorkId};
use crate::unit_of_work::UnitOfWorkInstance;
use std::any::type_name;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Builds one new entity.
///
/// The builder owns a staging state and a facade over it. Populate the
/// staging state through [`state`](Self::state) or the facade from
/// [`instance`](Self::instance), then call
/// [`new_instance`](Self::new_instance) to run the lifecycle hooks and
/// register the entity. A builder is single-use.
pub struct EntityBuilder {
    uow_id: UnitOfWorkId,
    module: Arc<Module>,
    model: EntityModel,
    reference: EntityReference,
    staging: StateHandle,
    prototype: EntityInstance,
    finished: bool,
}

impl EntityBuilder {
    pub(crate) fn new(
        uow_id: UnitOfWorkId,
        module: Arc<Module>,
        model: EntityModel,
        reference: EntityReference,
        now: Timestamp,
    ) -> Self {
        let staging = StateHandle::new(EntityState::new(
            reference.clone(),
            Arc::clone(model.descriptor()),
            now,
        ));
        let prototype = model.construct(staging.clone());
        Self {
            uow_id,
            module,
            model,
            reference,
            staging,
            prototype,
            finished: false,
        }
    }

    /// Reference of the entity being built.
    #[must_use]
    pub fn reference(&self) -> &EntityReference {
        &self.reference
    }

    /// Type of the entity being built.
    #[must_use]
    pub fn type_name(&self) -> &str {
        self.model.descriptor().type_name()
    }

    /// Returns true once [`new_instance`](Self::new_instance) was called.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The staging state.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` once finished.
    pub fn state(&self) -> CoreResult<&StateHandle> {
        self.ensure_active()?;
        Ok(&self.staging)
    }

    /// Facade over the staging state.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` once finished.
    pub fn instance(&self) -> CoreResult<EntityInstance> {
        self.ensure_active()?;
        Ok(Arc::clone(&self.prototype))
    }

    /// Typed facade over the staging state.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` once finished and `EntityTypeNotFound` if
    /// the facade is not a `T`.
    pub fn instance_as<T: Entity>(&self) -> CoreResult<Arc<T>> {
        let instance = self.instance()?;
        self.downcast(instance)
    }

    /// Creates the entity in `uow`.
    ///
    /// Runs `on_create`, the required-member check and
    /// `check_constraints` on the staging facade. On success the staging
    /// members are copied into a state allocated by the module's store and
    /// the new instance is added to the identity map. The builder is
    /// finished whether or not the hooks succeed.
    ///
    /// # Errors
    ///
    /// Returns `Lifecycle` if a hook fails, `EntityAlreadyExists` if the
    /// reference is already live in `uow`, and `IllegalState` if the
    /// builder is finished, belongs to another unit of work, or `uow` is
    /// closed.
    pub fn new_instance(&mut self, uow: &mut UnitOfWorkInstance) -> CoreResult<EntityInstance> {
        self.ensure_active()?;
        if uow.id() != &self.uow_id {
            return Err(CoreError::illegal_state(format!(
                "builder for {} belongs to another unit of work",
                self.reference
            )));
        }
        uow.ensure_open()?;
        self.finished = true;
        let lifecycle = self.run_lifecycle();
        self.staging.write().seal();
        lifecycle?;

        if uow
            .cached(&self.reference)
            .is_some_and(|existing| existing.status() != EntityStatus::Removed)
        {
            return Err(CoreError::EntityAlreadyExists {
                reference: self.reference.clone(),
            });
        }

        let state = uow
            .store_unit_of_work(self.module.store())
            .new_entity_state(&self.reference, self.model.descriptor())?;
        state.write().copy_members_from(&self.staging.read());
        let instance = self.model.construct(state);
        uow.add_entity(Arc::clone(&instance))?;
        debug!(
            uow = %self.uow_id,
            reference = %self.reference,
            entity_type = self.type_name(),
            "entity created"
        );
        Ok(instance)
    }

    /// Creates the entity and recovers its concrete facade type.
    ///
    /// # Errors
    ///
    /// See [`new_instance`](Self::new_instance); additionally
    /// `EntityTypeNotFound` if the facade is not a `T`.
    pub fn new_instance_as<T: Entity>(
        &mut self,
        uow: &mut UnitOfWorkInstance,
    ) -> CoreResult<Arc<T>> {
        let instance = self.new_instance(uow)?;
        self.downcast(instance)
    }

    fn run_lifecycle(&self) -> CoreResult<()> {
        self.prototype.on_create()?;
        let missing = self.staging.read().missing_required();
        if !missing.is_empty() {
            return Err(LifecycleError::ConstraintViolation {
                type_name: self.type_name().to_string(),
                reference: self.reference.clone(),
                violations: missing,
            }
            .into());
        }
        self.prototype.check_constraints()?;
        Ok(())
    }

    fn downcast<T: Entity>(&self, instance: EntityInstance) -> CoreResult<Arc<T>> {
        downcast_instance::<T>(instance).ok_or_else(|| CoreError::EntityTypeNotFound {
            type_name: type_name::<T>().to_string(),
            module: self.module.name().to_string(),
        })
    }

    fn ensure_active(&self) -> CoreResult<()> {
        if self.finished {
            Err(CoreError::illegal_state(format!(
                "builder for {} was already used",
                self.reference
            )))
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for EntityBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityBuilder")
            .field("reference", &self.reference)
            .field("type", &self.type_name())
            .field("module", &self.module.name())
            .field("finished", &self.finished)
            .finish()
    }
}
