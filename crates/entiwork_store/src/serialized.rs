//! Entity store over a key/value map of encoded records.

use crate::config::{StoreConfig, VersionStrategy};
use crate::map::{MapChange, MapEntries, MapStore};
use entiwork_codec::{JsonCodec, RecordCodec, StateRecord};
use entiwork_core::{
    CacheOptions, CacheStats, EntityCache, EntityReference, EntityState, EntityStatus, EntityStore,
    Migration, Module, StateCommitter, StateIter, StoreError, StoreId, StoreResult,
    StoreUnitOfWorkInfo, Version,
};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::mem;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// An entity store that encodes records into a [`MapStore`].
///
/// # Versioning
///
/// Every written record carries a version token chosen by the configured
/// [`VersionStrategy`]. `apply_changes` compares the tokens of changed
/// states with the stored ones, reading the map directly, and the
/// committer repeats the check under the store's commit lock.
///
/// # Migration
///
/// Records written under another application version are upgraded on
/// read, through the configured [`Migration`] if any, and returned as
/// `Updated` so the next commit rewrites them. Full scans write migrated
/// records back in batches of [`StoreConfig::scan_sync_batch`], keeping
/// their version tokens.
///
/// # Caching
///
/// With a non-zero [`StoreConfig::cache_capacity`] encoded records are
/// kept in an LRU cache. The usecase's [`CacheOptions`] decide whether
/// reads, writes and new records populate it; writes that are not cached
/// invalidate the entry.
pub struct SerializedEntityStore<M> {
    id: StoreId,
    inner: Arc<Inner<M>>,
}

struct Inner<M> {
    map: M,
    codec: Box<dyn RecordCodec>,
    migration: Option<Arc<dyn Migration>>,
    cache: Option<EntityCache>,
    config: StoreConfig,
    commit_lock: Mutex<()>,
}

/// Builder for [`SerializedEntityStore`].
pub struct SerializedStoreBuilder<M> {
    map: M,
    codec: Box<dyn RecordCodec>,
    migration: Option<Arc<dyn Migration>>,
    config: StoreConfig,
}

impl<M: MapStore> SerializedStoreBuilder<M> {
    /// Sets the record codec. Defaults to JSON.
    #[must_use]
    pub fn codec(mut self, codec: impl RecordCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Sets the migration applied to records of other application versions.
    #[must_use]
    pub fn migration(mut self, migration: impl Migration + 'static) -> Self {
        self.migration = Some(Arc::new(migration));
        self
    }

    /// Sets the store configuration.
    #[must_use]
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Creates the store.
    #[must_use]
    pub fn build(self) -> SerializedEntityStore<M> {
        let cache = EntityCache::with_capacity(self.config.cache_capacity);
        let id = StoreId::next();
        debug!(
            store = %id,
            codec = self.codec.name(),
            cache_capacity = self.config.cache_capacity,
            migration = self.migration.is_some(),
            "serialized store created"
        );
        SerializedEntityStore {
            id,
            inner: Arc::new(Inner {
                map: self.map,
                codec: self.codec,
                migration: self.migration,
                cache,
                config: self.config,
                commit_lock: Mutex::new(()),
            }),
        }
    }
}

impl<M: MapStore> SerializedEntityStore<M> {
    /// Starts a store over `map` with the JSON codec and default config.
    #[must_use]
    pub fn builder(map: M) -> SerializedStoreBuilder<M> {
        SerializedStoreBuilder {
            map,
            codec: Box::new(JsonCodec),
            migration: None,
            config: StoreConfig::default(),
        }
    }

    /// Creates a store over `map` with the JSON codec and default config.
    #[must_use]
    pub fn new(map: M) -> Self {
        Self::builder(map).build()
    }

    /// The underlying map store.
    #[must_use]
    pub fn map(&self) -> &M {
        &self.inner.map
    }

    /// Name of the record codec.
    #[must_use]
    pub fn codec_name(&self) -> &'static str {
        self.inner.codec.name()
    }

    /// The store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Record cache statistics, if the cache is enabled.
    #[must_use]
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.inner.cache.as_ref().map(EntityCache::stats)
    }

    /// Returns true if the encoded record of `reference` is cached.
    #[must_use]
    pub fn is_cached(&self, reference: &EntityReference) -> bool {
        self.inner.cache.as_ref().is_some_and(|c| c.contains(reference))
    }

    /// Decodes the stored record of `reference`, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be read or decoded.
    pub fn record(&self, reference: &EntityReference) -> StoreResult<Option<StateRecord>> {
        self.inner.stored_record(reference)
    }
}

impl<M> fmt::Debug for SerializedEntityStore<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializedEntityStore")
            .field("id", &self.id)
            .field("codec", &self.inner.codec.name())
            .field("config", &self.inner.config)
            .field("migration", &self.inner.migration.is_some())
            .finish_non_exhaustive()
    }
}

/// What a committer expects to find in the map.
struct Expected {
    reference: EntityReference,
    version: Version,
    new: bool,
}

impl<M: MapStore> Inner<M> {
    fn load(
        &self,
        reference: &EntityReference,
        options: CacheOptions,
    ) -> StoreResult<Option<Arc<[u8]>>> {
        if let Some(bytes) = self.cache.as_ref().and_then(|c| c.get(reference)) {
            return Ok(Some(bytes));
        }
        let Some(bytes) = self.map.get(reference)? else {
            return Ok(None);
        };
        let bytes: Arc<[u8]> = Arc::from(bytes);
        if options.cache_on_read {
            if let Some(cache) = &self.cache {
                // A commit may have replaced the record since it was read.
                let _guard = self.commit_lock.lock();
                if self.map.get(reference)?.as_deref() == Some(&*bytes) {
                    cache.put(reference.clone(), Arc::clone(&bytes));
                }
            }
        }
        Ok(Some(bytes))
    }

    fn stored_record(&self, reference: &EntityReference) -> StoreResult<Option<StateRecord>> {
        match self.map.get(reference)? {
            Some(bytes) => Ok(Some(self.codec.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Brings a record to `to_version`; returns whether it changed.
    fn upgrade(
        &self,
        mut record: StateRecord,
        to_version: &str,
    ) -> StoreResult<(StateRecord, bool)> {
        if record.application_version == to_version {
            return Ok((record, false));
        }
        let from_version = record.application_version.clone();
        let record = match &self.migration {
            Some(migration) => migration.migrate(record, &from_version, to_version)?,
            None => {
                record.application_version = to_version.to_string();
                record
            }
        };
        Ok((record, true))
    }

    fn check_versions(&self, expected: &[Expected]) -> StoreResult<()> {
        let mut conflicts = Vec::new();
        for entry in expected {
            let stored = self.stored_record(&entry.reference)?;
            if entry.new {
                if stored.is_some() {
                    return Err(StoreError::AlreadyExists {
                        reference: entry.reference.clone(),
                    });
                }
            } else if stored.map(|r| r.version).as_deref() != Some(entry.version.as_str()) {
                conflicts.push(entry.reference.clone());
            }
        }
        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Conflict { references: conflicts })
        }
    }

    fn encode_state(&self, uow: &StoreUnitOfWorkInfo, state: &EntityState) -> StoreResult<Vec<u8>> {
        let record = state.to_record(uow.application_version());
        let record = match self.config.version_strategy {
            VersionStrategy::UnitOfWorkId => {
                record.with_version(uow.id().as_str(), uow.current_time())
            }
            VersionStrategy::ContentHash => {
                let unversioned = record.with_version("", uow.current_time());
                let digest = Sha256::digest(self.codec.encode(&unversioned)?);
                unversioned.with_version(format!("{digest:x}"), uow.current_time())
            }
        };
        Ok(self.codec.encode(&record)?)
    }

    fn invalidate(&self, keys: impl IntoIterator<Item = EntityReference>) {
        if let Some(cache) = &self.cache {
            for key in keys {
                cache.invalidate(&key);
            }
        }
    }
}

impl<M: MapStore + 'static> EntityStore for SerializedEntityStore<M> {
    fn id(&self) -> StoreId {
        self.id
    }

    fn entity_state_of(
        &self,
        uow: &StoreUnitOfWorkInfo,
        module: &Module,
        reference: &EntityReference,
    ) -> StoreResult<EntityState> {
        let bytes = self
            .inner
            .load(reference, uow.usecase().cache)?
            .ok_or_else(|| StoreError::NotFound {
                reference: reference.clone(),
            })?;
        let record = self.inner.codec.decode(&bytes)?;
        let (record, migrated) = self.inner.upgrade(record, module.application_version())?;
        let descriptor = module
            .descriptor(&record.entity_type)
            .ok_or_else(|| StoreError::UnknownType {
                type_name: record.entity_type.clone(),
                module: module.name().to_string(),
            })?;
        let mut state =
            EntityState::from_record(&record, Arc::clone(descriptor), EntityStatus::Loaded);
        if migrated {
            state.mark_updated();
            debug!(
                store = %self.id,
                %reference,
                version = module.application_version(),
                "record upgraded on read"
            );
        }
        Ok(state)
    }

    fn apply_changes(
        &self,
        uow: &StoreUnitOfWorkInfo,
        states: Vec<EntityState>,
    ) -> StoreResult<Box<dyn StateCommitter>> {
        let expected: Vec<Expected> = states
            .iter()
            .map(|s| Expected {
                reference: s.reference().clone(),
                version: s.version().clone(),
                new: s.status() == EntityStatus::New,
            })
            .collect();
        self.inner.check_versions(&expected)?;

        let mut changes = Vec::with_capacity(states.len());
        for state in &states {
            let key = state.reference().clone();
            if state.status() == EntityStatus::Removed {
                changes.push(MapChange::Remove { key });
            } else {
                let bytes = self.inner.encode_state(uow, state)?;
                changes.push(MapChange::Put { key, bytes });
            }
        }
        trace!(
            store = %self.id,
            uow = %uow.id(),
            changes = changes.len(),
            "serialized changes prepared"
        );
        Ok(Box::new(SerializedCommitter {
            store: self.id,
            inner: Arc::clone(&self.inner),
            expected,
            changes,
            cache_options: uow.usecase().cache,
        }))
    }

    fn entity_states<'a>(&'a self, module: &'a Module) -> StoreResult<StateIter<'a>> {
        let entries = self.inner.map.entries()?;
        Ok(Box::new(ScanIter {
            store: self.id,
            inner: &self.inner,
            module,
            entries,
            pending: Vec::new(),
            batch: self.inner.config.scan_sync_batch.max(1),
        }))
    }
}

struct SerializedCommitter<M> {
    store: StoreId,
    inner: Arc<Inner<M>>,
    expected: Vec<Expected>,
    changes: Vec<MapChange>,
    cache_options: CacheOptions,
}

impl<M: MapStore + 'static> StateCommitter for SerializedCommitter<M> {
    fn commit(self: Box<Self>) -> StoreResult<()> {
        let Self {
            store,
            inner,
            expected,
            changes,
            cache_options,
        } = *self;
        let _guard = inner.commit_lock.lock();
        inner.check_versions(&expected)?;

        // One change per expected state, in the same order.
        let cache_updates: Vec<(EntityReference, Option<Arc<[u8]>>)> = changes
            .iter()
            .zip(&expected)
            .map(|(change, entry)| match change {
                MapChange::Put { key, bytes } => {
                    let keep = if entry.new {
                        cache_options.cache_on_new
                    } else {
                        cache_options.cache_on_write
                    };
                    (key.clone(), keep.then(|| Arc::from(bytes.as_slice())))
                }
                MapChange::Remove { key } => (key.clone(), None),
            })
            .collect();

        let count = changes.len();
        if let Err(e) = inner.map.apply_changes(changes) {
            inner.invalidate(cache_updates.into_iter().map(|(key, _)| key));
            return Err(e);
        }
        if let Some(cache) = &inner.cache {
            for (key, bytes) in cache_updates {
                match bytes {
                    Some(bytes) => cache.put(key, bytes),
                    None => cache.invalidate(&key),
                }
            }
        }
        debug!(store = %store, changes = count, "serialized changes committed");
        Ok(())
    }

    fn cancel(self: Box<Self>) {
        trace!(store = %self.store, changes = self.changes.len(), "serialized changes cancelled");
    }
}

/// Full scan that writes migrated records back in batches.
struct ScanIter<'a, M> {
    store: StoreId,
    inner: &'a Inner<M>,
    module: &'a Module,
    entries: MapEntries<'a>,
    pending: Vec<(EntityReference, String, Vec<u8>)>,
    batch: usize,
}

impl<M: MapStore> ScanIter<'_, M> {
    fn decode(&mut self, key: EntityReference, bytes: &[u8]) -> StoreResult<Option<EntityState>> {
        let record = self.inner.codec.decode(bytes)?;
        let (record, migrated) = self.inner.upgrade(record, self.module.application_version())?;
        let Some(descriptor) = self.module.descriptor(&record.entity_type) else {
            return Ok(None);
        };
        let state = EntityState::from_record(&record, Arc::clone(descriptor), EntityStatus::Loaded);
        if migrated {
            let encoded = self.inner.codec.encode(&record)?;
            self.pending.push((key, record.version, encoded));
            if self.pending.len() >= self.batch {
                self.flush()?;
            }
        }
        Ok(Some(state))
    }

    fn flush(&mut self) -> StoreResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = mem::take(&mut self.pending);
        let _guard = self.inner.commit_lock.lock();
        let mut changes = Vec::with_capacity(pending.len());
        for (key, version, bytes) in pending {
            let current = self.inner.stored_record(&key)?.map(|r| r.version);
            if current.as_deref() == Some(version.as_str()) {
                changes.push(MapChange::Put { key, bytes });
            } else {
                trace!(
                    store = %self.store,
                    reference = %key,
                    "record changed during scan, not written back"
                );
            }
        }
        let count = changes.len();
        let keys: Vec<EntityReference> = changes.iter().map(|c| c.key().clone()).collect();
        let result = self.inner.map.apply_changes(changes);
        self.inner.invalidate(keys);
        result?;
        debug!(store = %self.store, records = count, "migrated records written back");
        Ok(())
    }
}

impl<M: MapStore> Iterator for ScanIter<'_, M> {
    type Item = StoreResult<EntityState>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(entry) = self.entries.next() else {
                return self.flush().err().map(Err);
            };
            let (key, bytes) = match entry {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            match self.decode(key, &bytes) {
                Ok(Some(state)) => return Some(Ok(state)),
                Ok(None) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl<M> Drop for ScanIter<'_, M> {
    fn drop(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        warn!(
            store = %self.store,
            records = self.pending.len(),
            "scan dropped before completion, migrated records not written back"
        );
    }
}
