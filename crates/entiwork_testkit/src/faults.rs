//! Fault injection for store failure tests.

use entiwork_core::{
    EntityReference, EntityState, EntityStore, Module, StateCommitter, StateIter, StoreError,
    StoreId, StoreResult, StoreUnitOfWorkInfo,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
struct Counters {
    applies: AtomicUsize,
    commits: AtomicUsize,
    cancels: AtomicUsize,
    fail_commit: AtomicBool,
}

/// A store wrapper that fails on demand.
///
/// Reads pass through to the wrapped store. `apply_changes` and commits
/// fail while the matching switch is on; a failing commit cancels the
/// wrapped committer first. Every outcome is counted.
#[derive(Debug)]
pub struct FaultyStore {
    id: StoreId,
    inner: Arc<dyn EntityStore>,
    fail_apply: AtomicBool,
    counters: Arc<Counters>,
}

impl FaultyStore {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn EntityStore>) -> Arc<Self> {
        Arc::new(Self {
            id: StoreId::next(),
            inner,
            fail_apply: AtomicBool::new(false),
            counters: Arc::default(),
        })
    }

    /// Makes `apply_changes` fail.
    pub fn fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    /// Makes commits fail.
    pub fn fail_commit(&self, fail: bool) {
        self.counters.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Successful `apply_changes` calls.
    pub fn applies(&self) -> usize {
        self.counters.applies.load(Ordering::SeqCst)
    }

    /// Successful commits.
    pub fn commits(&self) -> usize {
        self.counters.commits.load(Ordering::SeqCst)
    }

    /// Cancelled committers, including those cancelled by a failing commit.
    pub fn cancels(&self) -> usize {
        self.counters.cancels.load(Ordering::SeqCst)
    }
}

impl EntityStore for FaultyStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn entity_state_of(
        &self,
        uow: &StoreUnitOfWorkInfo,
        module: &Module,
        reference: &EntityReference,
    ) -> StoreResult<EntityState> {
        self.inner.entity_state_of(uow, module, reference)
    }

    fn apply_changes(
        &self,
        uow: &StoreUnitOfWorkInfo,
        states: Vec<EntityState>,
    ) -> StoreResult<Box<dyn StateCommitter>> {
        if self.fail_apply.load(Ordering::SeqCst) {
            debug!(store = %self.id, "injecting apply failure");
            return Err(StoreError::backend("injected apply failure"));
        }
        let committer = self.inner.apply_changes(uow, states)?;
        self.counters.applies.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FaultyCommitter {
            store: self.id,
            inner: committer,
            counters: Arc::clone(&self.counters),
        }))
    }

    fn entity_states<'a>(&'a self, module: &'a Module) -> StoreResult<StateIter<'a>> {
        self.inner.entity_states(module)
    }
}

struct FaultyCommitter {
    store: StoreId,
    inner: Box<dyn StateCommitter>,
    counters: Arc<Counters>,
}

impl StateCommitter for FaultyCommitter {
    fn commit(self: Box<Self>) -> StoreResult<()> {
        let Self { store, inner, counters } = *self;
        if counters.fail_commit.load(Ordering::SeqCst) {
            debug!(store = %store, "injecting commit failure");
            inner.cancel();
            counters.cancels.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::backend("injected commit failure"));
        }
        inner.commit()?;
        counters.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel(self: Box<Self>) {
        self.inner.cancel();
        self.counters.cancels.fetch_add(1, Ordering::SeqCst);
    }
}
