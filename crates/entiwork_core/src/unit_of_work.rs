//! The unit of work.
//!
//! A [`UnitOfWorkInstance`] is the transaction seen by application code.
//! It owns:
//!
//! - the identity map, so that every lookup of a reference returns the
//!   same instance
//! - one [`EntityStoreUnitOfWork`] per store it touched, in touch order
//! - the registered completion callbacks
//!
//! Completion runs in two phases across every touched store: all
//! sub-transactions validate and stage their changes, then all committers
//! commit. If any staging step fails, every committer obtained so far is
//! cancelled.

use crate::builder::EntityBuilder;
use crate::config::Usecase;
use crate::context::UnitOfWorkContext;
use crate::entity::{
    downcast_instance, Completable, CompletionStatus, Entity, EntityInstance, Identifiable,
};
use crate::error::{CallbackError, CoreError, CoreResult};
use crate::module::{Application, Module};
use crate::reference::EntityReference;
use crate::state::EntityStatus;
use crate::store::{EntityStore, StateCommitter, StoreUnitOfWorkInfo};
use crate::store_uow::EntityStoreUnitOfWork;
use crate::types::{Timestamp, UnitOfWorkId};
use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A transaction over one or more entity stores.
///
/// Created open and pushed onto its context. [`complete`](Self::complete)
/// and [`discard`](Self::discard) close it permanently; dropping an open
/// unit of work discards it.
pub struct UnitOfWorkInstance {
    id: UnitOfWorkId,
    application: Arc<Application>,
    context: UnitOfWorkContext,
    usecase: Usecase,
    current_time: Timestamp,
    identity_map: HashMap<EntityReference, EntityInstance>,
    store_units: Vec<EntityStoreUnitOfWork>,
    callbacks: Vec<Arc<dyn Completable>>,
    open: bool,
    paused: bool,
}

impl UnitOfWorkInstance {
    pub(crate) fn new(
        application: Arc<Application>,
        context: UnitOfWorkContext,
        usecase: Usecase,
        current_time: Timestamp,
    ) -> Self {
        let id = UnitOfWorkId::generate();
        context.push(id.clone());
        debug!(uow = %id, usecase = %usecase.name, "unit of work opened");
        Self {
            id,
            application,
            context,
            usecase,
            current_time,
            identity_map: HashMap::new(),
            store_units: Vec::new(),
            callbacks: Vec::new(),
            open: true,
            paused: false,
        }
    }

    /// Identity of this unit of work.
    #[must_use]
    pub fn id(&self) -> &UnitOfWorkId {
        &self.id
    }

    /// The usecase this unit of work was opened for.
    #[must_use]
    pub fn usecase(&self) -> &Usecase {
        &self.usecase
    }

    /// Logical time of this unit of work.
    #[must_use]
    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    /// The application whose modules are searched.
    #[must_use]
    pub fn application(&self) -> &Arc<Application> {
        &self.application
    }

    /// Returns true until completed or discarded.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Returns true while paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Returns true if the reference is in the identity map.
    #[must_use]
    pub fn is_cached(&self, reference: &EntityReference) -> bool {
        self.identity_map.contains_key(reference)
    }

    /// Number of instances in the identity map.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.identity_map.len()
    }

    /// Looks up an entity in every module of the application.
    ///
    /// # Errors
    ///
    /// See [`get_from`](Self::get_from).
    pub fn get(&mut self, reference: &EntityReference) -> CoreResult<EntityInstance> {
        let candidates = self.application.modules().to_vec();
        self.get_from(reference, &candidates)
    }

    /// Looks up an entity in the modules declaring `type_name`.
    ///
    /// # Errors
    ///
    /// Returns `EntityTypeNotFound` if no module declares the type, and
    /// otherwise see [`get_from`](Self::get_from).
    pub fn get_of_type(
        &mut self,
        reference: &EntityReference,
        type_name: &str,
    ) -> CoreResult<EntityInstance> {
        let candidates = self.application.modules_declaring(type_name);
        if candidates.is_empty() {
            return Err(CoreError::EntityTypeNotFound {
                type_name: type_name.to_string(),
                module: self.application.name().to_string(),
            });
        }
        self.get_from(reference, &candidates)
    }

    /// Looks up an entity and recovers its concrete facade type.
    ///
    /// # Errors
    ///
    /// Returns `EntityTypeNotFound` if the entity's facade is not a `T`,
    /// and otherwise see [`get_from`](Self::get_from).
    pub fn get_as<T: Entity>(&mut self, reference: &EntityReference) -> CoreResult<Arc<T>> {
        let instance = self.get(reference)?;
        downcast_instance::<T>(instance).ok_or_else(|| CoreError::EntityTypeNotFound {
            type_name: type_name::<T>().to_string(),
            module: self.application.name().to_string(),
        })
    }

    /// Looks up an entity, probing `candidates` in order on an identity
    /// map miss. The first store that has the entity wins.
    ///
    /// # Errors
    ///
    /// Returns `NoSuchEntity` if no candidate has the entity or it was
    /// removed in this unit of work, `EntityTypeNotFound` if the stored
    /// type is not visible, and `IllegalState` once closed.
    pub fn get_from(
        &mut self,
        reference: &EntityReference,
        candidates: &[Arc<Module>],
    ) -> CoreResult<EntityInstance> {
        self.ensure_open()?;
        if let Some(instance) = self.identity_map.get(reference) {
            if instance.status() == EntityStatus::Removed {
                return Err(self.no_such_entity(reference));
            }
            return Ok(Arc::clone(instance));
        }

        for module in candidates {
            let result = self
                .store_unit_of_work(module.store())
                .entity_state(module, reference);
            let state = match result {
                Ok(state) => state,
                Err(CoreError::EntityNotFound { .. }) => continue,
                Err(e) => return Err(e),
            };
            if state.status() == EntityStatus::Removed {
                return Err(self.no_such_entity(reference));
            }
            let stored_type = state.type_name();
            let model = module
                .model(&stored_type)
                .ok_or_else(|| CoreError::EntityTypeNotFound {
                    type_name: stored_type.clone(),
                    module: module.name().to_string(),
                })?;
            let instance = model.construct(state);
            self.identity_map.insert(reference.clone(), Arc::clone(&instance));
            debug!(uow = %self.id, %reference, module = module.name(), "entity loaded");
            return Ok(instance);
        }
        Err(self.no_such_entity(reference))
    }

    /// Starts building a new entity of a type.
    ///
    /// The first module declaring the type owns the entity. Without a
    /// reference a random one is generated.
    ///
    /// # Errors
    ///
    /// Returns `EntityTypeNotFound` if no module declares the type, and
    /// `IllegalState` once closed.
    pub fn new_entity_builder(
        &mut self,
        type_name: &str,
        reference: Option<EntityReference>,
    ) -> CoreResult<EntityBuilder> {
        self.ensure_open()?;
        let module = self
            .application
            .modules_declaring(type_name)
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::EntityTypeNotFound {
                type_name: type_name.to_string(),
                module: self.application.name().to_string(),
            })?;
        let model = module
            .model(type_name)
            .cloned()
            .ok_or_else(|| CoreError::EntityTypeNotFound {
                type_name: type_name.to_string(),
                module: module.name().to_string(),
            })?;
        let reference = reference.unwrap_or_else(EntityReference::generate);
        Ok(EntityBuilder::new(
            self.id.clone(),
            module,
            model,
            reference,
            self.current_time,
        ))
    }

    /// Builds and registers a new entity with default state.
    ///
    /// # Errors
    ///
    /// See [`new_entity_builder`](Self::new_entity_builder) and
    /// [`EntityBuilder::new_instance`].
    pub fn new_entity(
        &mut self,
        type_name: &str,
        reference: Option<EntityReference>,
    ) -> CoreResult<EntityInstance> {
        let mut builder = self.new_entity_builder(type_name, reference)?;
        builder.new_instance(self)
    }

    /// Adds an instance to the identity map.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` once closed.
    pub fn add_entity(&mut self, instance: EntityInstance) -> CoreResult<()> {
        self.ensure_open()?;
        self.identity_map.insert(instance.reference(), instance);
        Ok(())
    }

    /// Evicts an instance from the identity map.
    ///
    /// The state stays in its store sub-transaction, so a later lookup
    /// returns a fresh instance over the same state.
    pub fn remove(&mut self, reference: &EntityReference) -> Option<EntityInstance> {
        self.identity_map.remove(reference)
    }

    /// Marks an entity for removal.
    ///
    /// The instance stays in the identity map as a tombstone; lookups of
    /// its reference yield `NoSuchEntity`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` once closed or if the entity was already
    /// removed.
    pub fn remove_entity(&mut self, instance: &EntityInstance) -> CoreResult<()> {
        self.ensure_open()?;
        instance.state().remove()?;
        self.identity_map
            .entry(instance.reference())
            .or_insert_with(|| Arc::clone(instance));
        debug!(uow = %self.id, reference = %instance.reference(), "entity removed");
        Ok(())
    }

    /// Registers a completion callback.
    pub fn add_callback(&mut self, callback: Arc<dyn Completable>) {
        self.callbacks.push(callback);
    }

    /// Unregisters a completion callback by identity.
    ///
    /// Returns whether it was registered.
    pub fn remove_callback(&mut self, callback: &Arc<dyn Completable>) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|c| !Arc::ptr_eq(c, callback));
        self.callbacks.len() != before
    }

    /// Detaches this unit of work from its context.
    ///
    /// With `prune_on_pause`, unchanged instances are dropped from the
    /// identity map. Their states stay buffered in the store
    /// sub-transactions, so a retained instance can still be changed.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if already paused or closed.
    pub fn pause(&mut self) -> CoreResult<()> {
        self.ensure_open()?;
        if self.paused {
            return Err(CoreError::illegal_state("unit of work is already paused"));
        }
        self.paused = true;
        self.context.pop(&self.id);

        if self.usecase.options.prune_on_pause {
            let loaded: Vec<EntityReference> = self
                .identity_map
                .iter()
                .filter(|(_, instance)| instance.status() == EntityStatus::Loaded)
                .map(|(reference, _)| reference.clone())
                .collect();
            for reference in &loaded {
                self.identity_map.remove(reference);
            }
            debug!(uow = %self.id, pruned = loaded.len(), "unit of work paused");
        } else {
            debug!(uow = %self.id, "unit of work paused");
        }
        Ok(())
    }

    /// Re-attaches a paused unit of work to its context.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if not paused or closed.
    pub fn resume(&mut self) -> CoreResult<()> {
        self.ensure_open()?;
        if !self.paused {
            return Err(CoreError::illegal_state("unit of work is not paused"));
        }
        self.paused = false;
        self.context.push(self.id.clone());
        debug!(uow = %self.id, "unit of work resumed");
        Ok(())
    }

    /// Writes every change to its store and closes.
    ///
    /// If a callback vetoes, nothing is touched and the unit of work stays
    /// open. If staging or committing fails, every committer not yet
    /// committed is cancelled and the unit of work is discarded.
    ///
    /// # Errors
    ///
    /// Returns `Completion` wrapping the cause, or
    /// `ConcurrentEntityModification` naming the conflicting instances.
    pub fn complete(&mut self) -> CoreResult<()> {
        self.ensure_open()?;

        let callbacks = self.callbacks.clone();
        let instances = self.live_instances();
        if let Err(e) = Self::before_completion(&callbacks, &instances) {
            warn!(uow = %self.id, error = %e, "completion vetoed");
            return Err(CoreError::Completion {
                usecase: self.usecase.name.clone(),
                source: Box::new(CoreError::Callback(e)),
            });
        }

        let committers = match self.apply_changes() {
            Ok(committers) => committers,
            Err(e) => {
                self.discard();
                return Err(e);
            }
        };
        if let Err(e) = self.commit(committers) {
            self.discard();
            return Err(e);
        }

        let instances = self.live_instances();
        self.close();
        info!(
            uow = %self.id,
            usecase = %self.usecase.name,
            entities = instances.len(),
            "unit of work completed"
        );
        Self::after_completion(CompletionStatus::Completed, &callbacks, &instances);
        Ok(())
    }

    /// Closes without writing anything. No-op once closed.
    pub fn discard(&mut self) {
        if !self.open {
            return;
        }
        let callbacks = self.callbacks.clone();
        let instances = self.live_instances();
        self.close();
        for unit in &mut self.store_units {
            unit.discard();
        }
        debug!(uow = %self.id, usecase = %self.usecase.name, "unit of work discarded");
        Self::after_completion(CompletionStatus::Discarded, &callbacks, &instances);
    }

    pub(crate) fn ensure_open(&self) -> CoreResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(CoreError::illegal_state(format!("unit of work {} is closed", self.id)))
        }
    }

    pub(crate) fn cached(&self, reference: &EntityReference) -> Option<&EntityInstance> {
        self.identity_map.get(reference)
    }

    pub(crate) fn store_unit_of_work(
        &mut self,
        store: &Arc<dyn EntityStore>,
    ) -> &mut EntityStoreUnitOfWork {
        let store_id = store.id();
        let index = match self.store_units.iter().position(|u| u.store_id() == store_id) {
            Some(index) => index,
            None => {
                let info = StoreUnitOfWorkInfo::new(
                    self.id.clone(),
                    self.usecase.clone(),
                    self.current_time,
                )
                .with_application_version(self.application.version());
                self.store_units.push(EntityStoreUnitOfWork::new(Arc::clone(store), info));
                self.store_units.len() - 1
            }
        };
        &mut self.store_units[index]
    }

    fn live_instances(&self) -> Vec<EntityInstance> {
        self.identity_map
            .values()
            .filter(|i| i.status() != EntityStatus::Removed)
            .cloned()
            .collect()
    }

    fn before_completion(
        callbacks: &[Arc<dyn Completable>],
        instances: &[EntityInstance],
    ) -> Result<(), CallbackError> {
        for callback in callbacks {
            callback.before_completion()?;
        }
        for instance in instances {
            if let Some(participant) = instance.completable() {
                participant.before_completion()?;
            }
        }
        Ok(())
    }

    fn after_completion(
        status: CompletionStatus,
        callbacks: &[Arc<dyn Completable>],
        instances: &[EntityInstance],
    ) {
        for callback in callbacks {
            notify(&**callback, status);
        }
        for instance in instances {
            if let Some(participant) = instance.completable() {
                notify(participant, status);
            }
        }
    }

    fn apply_changes(&mut self) -> CoreResult<Vec<Box<dyn StateCommitter>>> {
        let mut committers = Vec::with_capacity(self.store_units.len());
        let mut failure = None;
        for unit in &mut self.store_units {
            match unit.apply_changes() {
                Ok(committer) => committers.push(committer),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        let Some(err) = failure else {
            return Ok(committers);
        };

        warn!(
            uow = %self.id,
            error = %err,
            cancelled = committers.len(),
            "applying changes failed"
        );
        for committer in committers {
            committer.cancel();
        }
        Err(self.completion_error(err))
    }

    fn commit(&mut self, committers: Vec<Box<dyn StateCommitter>>) -> CoreResult<()> {
        let mut pending = committers.into_iter();
        while let Some(committer) = pending.next() {
            if let Err(e) = committer.commit() {
                let remaining: Vec<_> = pending.by_ref().collect();
                error!(uow = %self.id, error = %e, cancelled = remaining.len(), "commit failed");
                for committer in remaining {
                    committer.cancel();
                }
                let err = CoreError::from_store(e, &self.usecase.name);
                return Err(self.completion_error(err));
            }
        }
        Ok(())
    }

    fn completion_error(&self, err: CoreError) -> CoreError {
        match err {
            CoreError::ConcurrentEntityModification { entities, usecase } => {
                CoreError::ConcurrentEntityModification {
                    entities: entities.resolve(&self.identity_map),
                    usecase,
                }
            }
            other => CoreError::Completion {
                usecase: self.usecase.name.clone(),
                source: Box::new(other),
            },
        }
    }

    fn close(&mut self) {
        if !self.paused {
            self.context.pop(&self.id);
        }
        self.open = false;
        for instance in self.identity_map.values() {
            instance.state().write().seal();
        }
        for unit in &self.store_units {
            unit.seal();
        }
    }

    fn no_such_entity(&self, reference: &EntityReference) -> CoreError {
        CoreError::NoSuchEntity {
            reference: reference.clone(),
            usecase: self.usecase.name.clone(),
        }
    }
}

fn notify(participant: &dyn Completable, status: CompletionStatus) {
    match panic::catch_unwind(AssertUnwindSafe(|| participant.after_completion(status))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, ?status, "after-completion notification failed"),
        Err(_) => warn!(?status, "after-completion notification panicked"),
    }
}

impl Drop for UnitOfWorkInstance {
    fn drop(&mut self) {
        if self.open {
            warn!(
                uow = %self.id,
                usecase = %self.usecase.name,
                "open unit of work dropped; discarding"
            );
            self.discard();
        }
    }
}

impl fmt::Debug for UnitOfWorkInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitOfWorkInstance")
            .field("id", &self.id)
            .field("usecase", &self.usecase.name)
            .field("open", &self.open)
            .field("paused", &self.paused)
            .field("entities", &self.identity_map.len())
            .field("stores", &self.store_units.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::UnitOfWorkFactory;
    use crate::entity::StateHolder;
    use crate::testing::{application, TestStore};
    use parking_lot::Mutex;

    fn setup() -> (Arc<TestStore>, UnitOfWorkFactory) {
        let store = TestStore::new();
        let factory = UnitOfWorkFactory::new(application(Arc::clone(&store)));
        (store, factory)
    }

    fn create_user(factory: &UnitOfWorkFactory, reference: &str, name: &str) {
        let mut uow = factory.new_unit_of_work();
        let mut builder = uow
            .new_entity_builder("User", Some(EntityReference::new(reference)))
            .unwrap();
        builder.state().unwrap().set_property("name", name).unwrap();
        builder.new_instance(&mut uow).unwrap();
        uow.complete().unwrap();
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        veto: bool,
    }

    impl Completable for Recorder {
        fn before_completion(&self) -> Result<(), CallbackError> {
            self.events.lock().push("before".into());
            if self.veto {
                Err(CallbackError::new("vetoed"))
            } else {
                Ok(())
            }
        }

        fn after_completion(&self, status: CompletionStatus) -> Result<(), CallbackError> {
            self.events.lock().push(format!("after:{status:?}"));
            Ok(())
        }
    }

    struct Panicker;

    impl Completable for Panicker {
        fn after_completion(&self, _status: CompletionStatus) -> Result<(), CallbackError> {
            panic!("listener bug");
        }
    }

    #[test]
    fn repeated_get_returns_same_instance() {
        let (_store, factory) = setup();
        create_user(&factory, "user:1", "Ann");

        let mut uow = factory.new_unit_of_work();
        let reference = EntityReference::new("user:1");
        let a = uow.get(&reference).unwrap();
        let b = uow.get(&reference).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.status(), EntityStatus::Loaded);

        a.state().set_property("name", "Bob").unwrap();
        let c = uow.get(&reference).unwrap();
        assert!(Arc::ptr_eq(&a, &c));
        assert_eq!(c.status(), EntityStatus::Updated);
        uow.discard();
    }

    #[test]
    fn built_entity_is_new_until_complete() {
        let (store, factory) = setup();
        let mut uow = factory.new_unit_of_work();
        assert!(matches!(
            uow.new_entity("User", Some(EntityReference::new("u"))),
            Err(CoreError::Lifecycle(_))
        ));

        let mut builder = uow.new_entity_builder("User", None).unwrap();
        builder.state().unwrap().set_property("name", "Ann").unwrap();
        let user = builder.new_instance(&mut uow).unwrap();
        assert_eq!(user.status(), EntityStatus::New);
        assert!(Arc::ptr_eq(&user, &uow.get(&user.reference()).unwrap()));
        assert_eq!(store.len(), 0);
        uow.complete().unwrap();
        assert_eq!(store.len(), 1);

        let mut next = factory.new_unit_of_work();
        assert_eq!(next.get(&user.reference()).unwrap().status(), EntityStatus::Loaded);
        next.discard();
    }

    #[test]
    fn removed_entity_is_gone() {
        let (store, factory) = setup();
        create_user(&factory, "user:1", "Ann");

        let mut uow = factory.new_unit_of_work();
        let reference = EntityReference::new("user:1");
        let user = uow.get(&reference).unwrap();
        uow.remove_entity(&user).unwrap();
        assert!(matches!(uow.get(&reference), Err(CoreError::NoSuchEntity { .. })));
        assert!(uow.remove_entity(&user).is_err());
        uow.complete().unwrap();
        assert!(store.stored("user:1").is_none());
    }

    #[test]
    fn new_then_removed_writes_nothing() {
        let (store, factory) = setup();
        let mut uow = factory.new_unit_of_work();
        let mut builder = uow.new_entity_builder("User", None).unwrap();
        builder.state().unwrap().set_property("name", "Tmp").unwrap();
        let user = builder.new_instance(&mut uow).unwrap();
        uow.remove_entity(&user).unwrap();
        uow.complete().unwrap();
        assert_eq!(store.len(), 0);
        assert_eq!(store.commits.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_reference_is_no_such_entity() {
        let (_store, factory) = setup();
        let mut uow = factory.new_unit_of_work();
        assert!(matches!(
            uow.get(&EntityReference::new("nope")),
            Err(CoreError::NoSuchEntity { ref usecase, .. }) if usecase == "default"
        ));
        assert!(matches!(
            uow.get_of_type(&EntityReference::new("nope"), "Team"),
            Err(CoreError::EntityTypeNotFound { .. })
        ));
    }

    #[test]
    fn evicted_instance_is_rewrapped_over_same_state() {
        let (_store, factory) = setup();
        create_user(&factory, "user:1", "Ann");
        let mut uow = factory.new_unit_of_work();
        let reference = EntityReference::new("user:1");
        let first = uow.get(&reference).unwrap();
        assert!(uow.remove(&reference).is_some());
        assert!(!uow.is_cached(&reference));
        let second = uow.get(&reference).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.state().ptr_eq(second.state()));
    }

    #[test]
    fn pause_and_resume_track_context() {
        let (_store, factory) = setup();
        let mut uow = factory.new_unit_of_work();
        assert_eq!(factory.current_unit_of_work().as_ref(), Some(uow.id()));

        uow.pause().unwrap();
        assert!(uow.is_paused());
        assert!(factory.current_unit_of_work().is_none());
        assert!(matches!(uow.pause(), Err(CoreError::IllegalState { .. })));

        uow.resume().unwrap();
        assert_eq!(factory.current_unit_of_work().as_ref(), Some(uow.id()));
        assert!(matches!(uow.resume(), Err(CoreError::IllegalState { .. })));

        uow.discard();
        assert!(factory.current_unit_of_work().is_none());
    }

    #[test]
    fn nested_units_of_work_stack() {
        let (_store, factory) = setup();
        let mut outer = factory.new_unit_of_work();
        let mut inner = factory.new_unit_of_work();
        assert_eq!(factory.current_unit_of_work().as_ref(), Some(inner.id()));
        inner.discard();
        assert_eq!(factory.current_unit_of_work().as_ref(), Some(outer.id()));
        outer.discard();
        assert_eq!(factory.context().depth(), 0);
    }

    #[test]
    fn prune_on_pause_keeps_changed_entities() {
        let (_store, factory) = setup();
        create_user(&factory, "user:1", "Ann");
        create_user(&factory, "user:2", "Bob");

        let mut uow = factory.new_unit_of_work_for(Usecase::new("prune").prune_on_pause(true));
        let (one, two) = (EntityReference::new("user:1"), EntityReference::new("user:2"));
        let first = uow.get(&one).unwrap();
        uow.get(&two).unwrap().state().set_property("name", "Bobby").unwrap();

        uow.pause().unwrap();
        assert!(!uow.is_cached(&one));
        assert!(uow.is_cached(&two));
        uow.resume().unwrap();

        let again = uow.get(&one).unwrap();
        assert!(!Arc::ptr_eq(&first, &again));
        uow.complete().unwrap();
    }

    #[test]
    fn pruned_instance_still_writes_through() {
        let (store, factory) = setup();
        create_user(&factory, "user:1", "Ann");

        let mut uow = factory.new_unit_of_work_for(Usecase::new("prune").prune_on_pause(true));
        let reference = EntityReference::new("user:1");
        let user = uow.get(&reference).unwrap();
        uow.pause().unwrap();
        assert!(!uow.is_cached(&reference));
        uow.resume().unwrap();

        user.state().set_property("name", "Changed").unwrap();
        assert_eq!(user.status(), EntityStatus::Updated);
        let again = uow.get(&reference).unwrap();
        assert!(again.state().ptr_eq(user.state()));
        uow.complete().unwrap();
        assert_eq!(
            store.stored("user:1").unwrap().properties["name"],
            entiwork_codec::Value::from("Changed")
        );
    }

    #[test]
    fn pause_without_pruning_keeps_everything() {
        let (_store, factory) = setup();
        create_user(&factory, "user:1", "Ann");
        let mut uow = factory.new_unit_of_work();
        uow.get(&EntityReference::new("user:1")).unwrap();
        uow.pause().unwrap();
        assert_eq!(uow.cached_count(), 1);
        uow.resume().unwrap();
        uow.discard();
    }

    #[test]
    fn callbacks_see_completion() {
        let (_store, factory) = setup();
        let recorder = Arc::new(Recorder::default());
        let mut uow = factory.new_unit_of_work();
        uow.add_callback(recorder.clone());
        uow.add_callback(Arc::new(Panicker));
        uow.complete().unwrap();
        assert_eq!(*recorder.events.lock(), ["before", "after:Completed"]);
    }

    #[test]
    fn veto_leaves_unit_of_work_open() {
        let (store, factory) = setup();
        let veto: Arc<dyn Completable> = Arc::new(Recorder {
            veto: true,
            ..Recorder::default()
        });
        let mut uow = factory.new_unit_of_work();
        let mut builder = uow.new_entity_builder("User", None).unwrap();
        builder.state().unwrap().set_property("name", "Ann").unwrap();
        builder.new_instance(&mut uow).unwrap();
        uow.add_callback(Arc::clone(&veto));

        let err = uow.complete().unwrap_err();
        assert!(matches!(err, CoreError::Completion { .. }));
        assert!(uow.is_open());
        assert_eq!(store.len(), 0);

        assert!(uow.remove_callback(&veto));
        assert!(!uow.remove_callback(&veto));
        uow.complete().unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn discard_notifies_and_seals() {
        let (store, factory) = setup();
        create_user(&factory, "user:1", "Ann");
        let recorder = Arc::new(Recorder::default());

        let mut uow = factory.new_unit_of_work();
        uow.add_callback(recorder.clone());
        let user = uow.get(&EntityReference::new("user:1")).unwrap();
        user.state().set_property("name", "Changed").unwrap();
        uow.discard();
        uow.discard();

        assert!(!uow.is_open());
        assert_eq!(*recorder.events.lock(), ["after:Discarded"]);
        assert!(matches!(
            user.state().set_property("name", "Again"),
            Err(CoreError::IllegalState { .. })
        ));
        assert!(matches!(uow.complete(), Err(CoreError::IllegalState { .. })));
        assert!(matches!(
            uow.get(&EntityReference::new("user:1")),
            Err(CoreError::IllegalState { .. })
        ));
        assert_eq!(
            store.stored("user:1").unwrap().properties["name"],
            entiwork_codec::Value::from("Ann")
        );
    }

    #[test]
    fn conflicting_completion_names_live_instances() {
        let (store, factory) = setup();
        create_user(&factory, "user:1", "Ann");
        let reference = EntityReference::new("user:1");

        let mut t1 = factory.new_unit_of_work();
        let mut t2 = factory.new_unit_of_work();
        t1.get(&reference).unwrap().state().set_property("name", "T1").unwrap();
        let e2 = t2.get(&reference).unwrap();
        e2.state().set_property("name", "T2").unwrap();

        t1.complete().unwrap();
        let err = t2.complete().unwrap_err();
        match err {
            CoreError::ConcurrentEntityModification { entities, .. } => {
                assert!(entities.contains(&reference));
                assert_eq!(entities.instances().len(), 1);
                assert!(Arc::ptr_eq(&entities.instances()[0], &e2));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(!t2.is_open());
        assert_eq!(
            store.stored("user:1").unwrap().properties["name"],
            entiwork_codec::Value::from("T1")
        );
    }

    #[test]
    fn apply_failure_discards() {
        let (store, factory) = setup();
        create_user(&factory, "user:1", "Ann");
        let mut uow = factory.new_unit_of_work();
        uow.get(&EntityReference::new("user:1"))
            .unwrap()
            .state()
            .set_property("name", "X")
            .unwrap();
        store.fail_apply(true);
        let err = uow.complete().unwrap_err();
        assert!(matches!(err, CoreError::Completion { .. }));
        assert!(!uow.is_open());
        assert!(factory.current_unit_of_work().is_none());
    }

    #[test]
    fn dropping_open_unit_of_work_discards() {
        let (_store, factory) = setup();
        {
            let _uow = factory.new_unit_of_work();
            assert_eq!(factory.context().depth(), 1);
        }
        assert_eq!(factory.context().depth(), 0);
    }

    #[test]
    fn get_as_recovers_generic_facade() {
        let (_store, factory) = setup();
        create_user(&factory, "user:1", "Ann");
        let mut uow = factory.new_unit_of_work();
        let user = uow
            .get_as::<crate::entity::GenericEntity>(&EntityReference::new("user:1"))
            .unwrap();
        assert_eq!(user.state().text("name").as_deref(), Some("Ann"));
    }
}
