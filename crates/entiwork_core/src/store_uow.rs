//! Per-store sub-transaction.

use crate::descriptor::EntityDescriptor;
use crate::error::{CoreError, CoreResult};
use crate::module::Module;
use crate::reference::EntityReference;
use crate::state::{EntityState, EntityStatus, StateHandle};
use crate::store::{EntityStore, NoopCommitter, StateCommitter, StoreUnitOfWorkInfo};
use crate::types::StoreId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// The part of a unit of work that talks to one store.
///
/// Buffers every state read or created through it so repeated reads see
/// the same handle, and hands the changed ones to the store on
/// [`apply_changes`](Self::apply_changes).
#[derive(Debug)]
pub struct EntityStoreUnitOfWork {
    store: Arc<dyn EntityStore>,
    info: StoreUnitOfWorkInfo,
    states: HashMap<EntityReference, StateHandle>,
    order: Vec<EntityReference>,
    applied: bool,
    discarded: bool,
}

impl EntityStoreUnitOfWork {
    /// Opens a sub-transaction on `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EntityStore>, info: StoreUnitOfWorkInfo) -> Self {
        Self {
            store,
            info,
            states: HashMap::new(),
            order: Vec::new(),
            applied: false,
            discarded: false,
        }
    }

    /// Identity of the underlying store.
    #[must_use]
    pub fn store_id(&self) -> StoreId {
        self.store.id()
    }

    /// What the store sees of this sub-transaction.
    #[must_use]
    pub fn info(&self) -> &StoreUnitOfWorkInfo {
        &self.info
    }

    /// Number of buffered states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Returns the state of an entity, reading it from the store on first
    /// access.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the store has no record,
    /// `EntityTypeNotFound` if the stored type is not visible in `module`,
    /// and `IllegalState` once the sub-transaction was applied or
    /// discarded.
    pub fn entity_state(
        &mut self,
        module: &Module,
        reference: &EntityReference,
    ) -> CoreResult<StateHandle> {
        self.ensure_usable()?;
        if let Some(handle) = self.states.get(reference) {
            return Ok(handle.clone());
        }
        let state = self
            .store
            .entity_state_of(&self.info, module, reference)
            .map_err(|e| CoreError::from_store(e, self.info.usecase().name()))?;
        trace!(%reference, status = %state.status(), store = %self.store.id(), "state read");
        Ok(self.track(StateHandle::new(state)))
    }

    /// Allocates the state of a new entity.
    ///
    /// # Errors
    ///
    /// Returns `EntityAlreadyExists` if a live state for the reference is
    /// already buffered, and `IllegalState` once the sub-transaction was
    /// applied or discarded.
    pub fn new_entity_state(
        &mut self,
        reference: &EntityReference,
        descriptor: &Arc<EntityDescriptor>,
    ) -> CoreResult<StateHandle> {
        self.ensure_usable()?;
        if let Some(existing) = self.states.get(reference) {
            if existing.status() != EntityStatus::Removed {
                return Err(CoreError::EntityAlreadyExists {
                    reference: reference.clone(),
                });
            }
        }
        let state = self.store.new_entity_state(&self.info, reference, descriptor);
        Ok(self.track(StateHandle::new(state)))
    }

    /// Hands every changed state to the store.
    ///
    /// New states removed before completion are dropped without a write.
    /// With nothing to write the store is not contacted.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` on a second call or after discard, and the
    /// translated store error if validation fails.
    pub fn apply_changes(&mut self) -> CoreResult<Box<dyn StateCommitter>> {
        self.ensure_usable()?;
        self.applied = true;

        let changes: Vec<EntityState> = self
            .order
            .iter()
            .filter_map(|r| self.states.get(r))
            .map(StateHandle::snapshot)
            .filter(|s| match s.status() {
                EntityStatus::Loaded => false,
                EntityStatus::Removed => !s.version().is_none(),
                EntityStatus::New | EntityStatus::Updated => true,
            })
            .collect();

        if changes.is_empty() {
            trace!(store = %self.store.id(), "no changes to apply");
            return Ok(Box::new(NoopCommitter));
        }
        debug!(
            store = %self.store.id(),
            changes = changes.len(),
            uow = %self.info.id(),
            "applying changes"
        );
        self.store
            .apply_changes(&self.info, changes)
            .map_err(|e| CoreError::from_store(e, self.info.usecase().name()))
    }

    /// Releases every buffered state. Idempotent.
    pub fn discard(&mut self) {
        if self.discarded {
            return;
        }
        self.discarded = true;
        self.seal();
        self.states.clear();
        self.order.clear();
    }

    pub(crate) fn seal(&self) {
        for handle in self.states.values() {
            handle.write().seal();
        }
    }

    fn track(&mut self, handle: StateHandle) -> StateHandle {
        let reference = handle.reference();
        if self.states.insert(reference.clone(), handle.clone()).is_none() {
            self.order.push(reference);
        }
        handle
    }

    fn ensure_usable(&self) -> CoreResult<()> {
        if self.discarded {
            return Err(CoreError::illegal_state("store unit of work was discarded"));
        }
        if self.applied {
            return Err(CoreError::illegal_state("store unit of work already applied its changes"));
        }
        Ok(())
    }
}
