//! In-memory entity store.

use entiwork_codec::StateRecord;
use entiwork_core::{
    EntityReference, EntityState, EntityStatus, EntityStore, Module, StateCommitter, StateIter,
    StoreError, StoreId, StoreResult, StoreUnitOfWorkInfo, Timestamp,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct Inner {
    records: RwLock<HashMap<EntityReference, StateRecord>>,
    counter: AtomicU64,
}

/// An entity store holding records in memory.
///
/// Version tokens are decimal strings drawn from a counter shared by all
/// records of the store. Validation runs when changes are applied and
/// again under the write lock when they are committed, so a committer
/// never overwrites a record another unit of work committed in between.
///
/// # Example
///
/// ```rust
/// use entiwork_store::MemoryEntityStore;
///
/// let store = MemoryEntityStore::new();
/// assert!(store.is_empty());
/// ```
#[derive(Debug)]
pub struct MemoryEntityStore {
    id: StoreId,
    inner: Arc<Inner>,
}

impl Default for MemoryEntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEntityStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: StoreId::next(),
            inner: Arc::default(),
        }
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.records.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.records.read().is_empty()
    }

    /// Returns a copy of the stored record.
    #[must_use]
    pub fn record(&self, reference: &EntityReference) -> Option<StateRecord> {
        self.inner.records.read().get(reference).cloned()
    }

    /// Removes every record.
    pub fn clear(&self) {
        self.inner.records.write().clear();
    }
}

fn check_versions(
    records: &HashMap<EntityReference, StateRecord>,
    states: &[EntityState],
) -> StoreResult<()> {
    let mut conflicts = Vec::new();
    for state in states {
        let stored = records.get(state.reference());
        match state.status() {
            EntityStatus::New => {
                if stored.is_some() {
                    return Err(StoreError::AlreadyExists {
                        reference: state.reference().clone(),
                    });
                }
            }
            _ => {
                if stored.map(|r| r.version.as_str()) != Some(state.version().as_str()) {
                    conflicts.push(state.reference().clone());
                }
            }
        }
    }
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(StoreError::Conflict { references: conflicts })
    }
}

impl EntityStore for MemoryEntityStore {
    fn id(&self) -> StoreId {
        self.id
    }

    fn entity_state_of(
        &self,
        _uow: &StoreUnitOfWorkInfo,
        module: &Module,
        reference: &EntityReference,
    ) -> StoreResult<EntityState> {
        let records = self.inner.records.read();
        let record = records.get(reference).ok_or_else(|| StoreError::NotFound {
            reference: reference.clone(),
        })?;
        let descriptor = module
            .descriptor(&record.entity_type)
            .ok_or_else(|| StoreError::UnknownType {
                type_name: record.entity_type.clone(),
                module: module.name().to_string(),
            })?;
        let mut state =
            EntityState::from_record(record, Arc::clone(descriptor), EntityStatus::Loaded);
        if record.application_version != module.application_version() {
            state.mark_updated();
        }
        Ok(state)
    }

    fn apply_changes(
        &self,
        uow: &StoreUnitOfWorkInfo,
        states: Vec<EntityState>,
    ) -> StoreResult<Box<dyn StateCommitter>> {
        check_versions(&self.inner.records.read(), &states)?;
        trace!(
            store = %self.id,
            uow = %uow.id(),
            changes = states.len(),
            "memory changes validated"
        );
        Ok(Box::new(MemoryCommitter {
            store: self.id,
            inner: Arc::clone(&self.inner),
            states,
            application_version: uow.application_version().to_string(),
            modified: uow.current_time(),
        }))
    }

    fn entity_states<'a>(&'a self, module: &'a Module) -> StoreResult<StateIter<'a>> {
        let records: Vec<StateRecord> = self.inner.records.read().values().cloned().collect();
        Ok(Box::new(records.into_iter().filter_map(move |record| {
            module
                .descriptor(&record.entity_type)
                .map(|d| Ok(EntityState::from_record(&record, Arc::clone(d), EntityStatus::Loaded)))
        })))
    }
}

struct MemoryCommitter {
    store: StoreId,
    inner: Arc<Inner>,
    states: Vec<EntityState>,
    application_version: String,
    modified: Timestamp,
}

impl StateCommitter for MemoryCommitter {
    fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut records = self.inner.records.write();
        check_versions(&records, &self.states)?;
        for state in &self.states {
            if state.status() == EntityStatus::Removed {
                records.remove(state.reference());
                continue;
            }
            let version = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
            let record = state
                .to_record(&self.application_version)
                .with_version(version.to_string(), self.modified);
            records.insert(state.reference().clone(), record);
        }
        debug!(store = %self.store, changes = self.states.len(), "memory changes committed");
        Ok(())
    }

    fn cancel(self: Box<Self>) {
        trace!(store = %self.store, changes = self.states.len(), "memory changes cancelled");
    }
}
