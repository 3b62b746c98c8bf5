//! Entity store SPI.
//!
//! Backends implement [`EntityStore`]. A unit of work talks to each store
//! it touches through one sub-transaction, identified by a
//! [`StoreUnitOfWorkInfo`], and completes with the two-phase
//! `apply_changes` / [`StateCommitter`] protocol.

mod error;

pub use error::{StoreError, StoreResult};

use crate::config::Usecase;
use crate::descriptor::EntityDescriptor;
use crate::module::{Module, DEFAULT_APPLICATION_VERSION};
use crate::reference::EntityReference;
use crate::state::EntityState;
use crate::types::{StoreId, Timestamp, UnitOfWorkId};
use std::fmt;
use std::sync::Arc;

/// What a store knows about the unit of work it serves.
#[derive(Debug, Clone)]
pub struct StoreUnitOfWorkInfo {
    id: UnitOfWorkId,
    usecase: Usecase,
    current_time: Timestamp,
    application_version: String,
}

impl StoreUnitOfWorkInfo {
    /// Creates the info for a new sub-transaction.
    #[must_use]
    pub fn new(id: UnitOfWorkId, usecase: Usecase, current_time: Timestamp) -> Self {
        Self {
            id,
            usecase,
            current_time,
            application_version: DEFAULT_APPLICATION_VERSION.to_string(),
        }
    }

    /// Sets the application version stamped on written records.
    #[must_use]
    pub fn with_application_version(mut self, version: impl Into<String>) -> Self {
        self.application_version = version.into();
        self
    }

    /// Identity of the sub-transaction.
    #[must_use]
    pub fn id(&self) -> &UnitOfWorkId {
        &self.id
    }

    /// Usecase of the owning unit of work.
    #[must_use]
    pub fn usecase(&self) -> &Usecase {
        &self.usecase
    }

    /// Logical time of the owning unit of work.
    #[must_use]
    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    /// Application version of the owning unit of work.
    #[must_use]
    pub fn application_version(&self) -> &str {
        &self.application_version
    }
}

/// Second phase of completion.
///
/// Exactly one of `commit` or `cancel` is called on every committer a
/// store returns.
pub trait StateCommitter: Send {
    /// Makes the prepared changes durable and visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the changes could not be written. Stores that
    /// re-validate versions report `Conflict` here.
    fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Releases the prepared changes without writing them.
    fn cancel(self: Box<Self>);
}

/// Committer for a sub-transaction with nothing to write.
#[derive(Debug, Default)]
pub struct NoopCommitter;

impl StateCommitter for NoopCommitter {
    fn commit(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }

    fn cancel(self: Box<Self>) {}
}

/// Lazily produced stream of stored states.
pub type StateIter<'a> = Box<dyn Iterator<Item = StoreResult<EntityState>> + 'a>;

/// A backend holding entity states.
///
/// # Invariants
///
/// - `entity_state_of` returns `Loaded` states, or `Updated` ones when the
///   record was migrated on read
/// - `apply_changes` validates versions and rejects conflicts with
///   `Conflict`, naming every conflicting reference
/// - New states that collide with a stored record fail with
///   `AlreadyExists`
/// - Nothing is visible to other readers until the committer commits
pub trait EntityStore: Send + Sync + fmt::Debug {
    /// Process-unique identity of this store.
    fn id(&self) -> StoreId;

    /// Reads the state of an entity.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record exists and `UnknownType` if the
    /// stored type is not visible in `module`.
    fn entity_state_of(
        &self,
        uow: &StoreUnitOfWorkInfo,
        module: &Module,
        reference: &EntityReference,
    ) -> StoreResult<EntityState>;

    /// Allocates the state of a new entity.
    fn new_entity_state(
        &self,
        uow: &StoreUnitOfWorkInfo,
        reference: &EntityReference,
        descriptor: &Arc<EntityDescriptor>,
    ) -> EntityState {
        EntityState::new(reference.clone(), Arc::clone(descriptor), uow.current_time())
    }

    /// Validates and prepares changed states.
    ///
    /// `states` holds only `New`, `Updated` and `Removed` states.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` or `AlreadyExists` when validation fails, and
    /// codec or I/O errors when preparation fails.
    fn apply_changes(
        &self,
        uow: &StoreUnitOfWorkInfo,
        states: Vec<EntityState>,
    ) -> StoreResult<Box<dyn StateCommitter>>;

    /// Streams every stored state of types visible in `module`.
    ///
    /// Records of other types are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan cannot start; per-record failures are
    /// yielded by the iterator.
    fn entity_states<'a>(&'a self, module: &'a Module) -> StoreResult<StateIter<'a>>;
}
