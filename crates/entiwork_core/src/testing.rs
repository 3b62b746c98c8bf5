//! Minimal store and fixtures for this crate's unit tests.

use crate::descriptor::EntityDescriptor;
use crate::module::{Application, Module};
use crate::reference::EntityReference;
use crate::state::{EntityState, EntityStatus};
use crate::store::{
    EntityStore, StateCommitter, StateIter, StoreError, StoreResult, StoreUnitOfWorkInfo,
};
use crate::types::{StoreId, Timestamp};
use entiwork_codec::{StateRecord, ValueKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct Shared {
    records: HashMap<EntityReference, StateRecord>,
    next_version: u64,
}

#[derive(Debug)]
pub(crate) struct TestStore {
    id: StoreId,
    shared: Arc<Mutex<Shared>>,
    fail_apply: AtomicBool,
    pub(crate) commits: Arc<AtomicUsize>,
    pub(crate) cancels: Arc<AtomicUsize>,
}

impl TestStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: StoreId::next(),
            shared: Arc::default(),
            fail_apply: AtomicBool::new(false),
            commits: Arc::default(),
            cancels: Arc::default(),
        })
    }

    pub(crate) fn fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn stored(&self, reference: &str) -> Option<StateRecord> {
        self.shared.lock().records.get(&EntityReference::new(reference)).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.shared.lock().records.len()
    }
}

impl EntityStore for TestStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn entity_state_of(
        &self,
        _uow: &StoreUnitOfWorkInfo,
        module: &Module,
        reference: &EntityReference,
    ) -> StoreResult<EntityState> {
        let shared = self.shared.lock();
        let record = shared.records.get(reference).ok_or_else(|| StoreError::NotFound {
            reference: reference.clone(),
        })?;
        let descriptor = module
            .descriptor(&record.entity_type)
            .ok_or_else(|| StoreError::UnknownType {
                type_name: record.entity_type.clone(),
                module: module.name().to_string(),
            })?;
        Ok(EntityState::from_record(record, Arc::clone(descriptor), EntityStatus::Loaded))
    }

    fn apply_changes(
        &self,
        uow: &StoreUnitOfWorkInfo,
        states: Vec<EntityState>,
    ) -> StoreResult<Box<dyn StateCommitter>> {
        if self.fail_apply.load(Ordering::SeqCst) {
            return Err(StoreError::backend("injected apply failure"));
        }
        let shared = self.shared.lock();
        let mut conflicts = Vec::new();
        for state in &states {
            let stored = shared.records.get(state.reference());
            if state.status() == EntityStatus::New {
                if stored.is_some() {
                    return Err(StoreError::AlreadyExists {
                        reference: state.reference().clone(),
                    });
                }
            } else if stored.map(|r| r.version.as_str()) != Some(state.version().as_str()) {
                conflicts.push(state.reference().clone());
            }
        }
        if !conflicts.is_empty() {
            return Err(StoreError::Conflict { references: conflicts });
        }
        Ok(Box::new(TestCommitter {
            shared: Arc::clone(&self.shared),
            states,
            application_version: uow.application_version().to_string(),
            modified: uow.current_time(),
            commits: Arc::clone(&self.commits),
            cancels: Arc::clone(&self.cancels),
        }))
    }

    fn entity_states<'a>(&'a self, module: &'a Module) -> StoreResult<StateIter<'a>> {
        let shared = self.shared.lock();
        let states: Vec<_> = shared
            .records
            .values()
            .filter_map(|r| {
                module
                    .descriptor(&r.entity_type)
                    .map(|d| Ok(EntityState::from_record(r, Arc::clone(d), EntityStatus::Loaded)))
            })
            .collect();
        Ok(Box::new(states.into_iter()))
    }
}

struct TestCommitter {
    shared: Arc<Mutex<Shared>>,
    states: Vec<EntityState>,
    application_version: String,
    modified: Timestamp,
    commits: Arc<AtomicUsize>,
    cancels: Arc<AtomicUsize>,
}

impl StateCommitter for TestCommitter {
    fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut shared = self.shared.lock();
        for state in &self.states {
            if state.status() == EntityStatus::Removed {
                shared.records.remove(state.reference());
                continue;
            }
            shared.next_version += 1;
            let record = state
                .to_record(&self.application_version)
                .with_version(shared.next_version.to_string(), self.modified);
            shared.records.insert(state.reference().clone(), record);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel(self: Box<Self>) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn user_descriptor() -> Arc<EntityDescriptor> {
    EntityDescriptor::builder("User")
        .property("name", ValueKind::Text)
        .optional_property("email", ValueKind::Text)
        .many_association("friends")
        .build()
}

pub(crate) fn application(store: Arc<TestStore>) -> Arc<Application> {
    Application::builder("test")
        .module(Module::builder("users", store).entity(user_descriptor()))
        .build()
}
