//! Entity state.
//!
//! An [`EntityState`] is the mutable state of one entity inside one unit
//! of work. It tracks a lifecycle status:
//!
//! ```text
//! New ──────────────► Removed
//! Loaded ─► Updated ─► Removed
//! Loaded ───────────► Removed
//! ```
//!
//! Setters move `Loaded` to `Updated`. Once a unit of work closes, its
//! states are sealed and reject further mutation.

use crate::descriptor::EntityDescriptor;
use crate::error::{CoreError, CoreResult};
use crate::reference::EntityReference;
use crate::types::{Timestamp, Version};
use entiwork_codec::{StateRecord, Value};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle status of an entity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityStatus {
    /// Created in this unit of work, not yet persisted.
    New,
    /// Read from a store, unchanged.
    Loaded,
    /// Read from a store and modified.
    Updated,
    /// Marked for removal.
    Removed,
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Loaded => "loaded",
            Self::Updated => "updated",
            Self::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Mutable state of one entity.
#[derive(Debug, Clone)]
pub struct EntityState {
    reference: EntityReference,
    descriptor: Arc<EntityDescriptor>,
    version: Version,
    last_modified: Timestamp,
    status: EntityStatus,
    properties: BTreeMap<String, Value>,
    associations: BTreeMap<String, Option<EntityReference>>,
    many_associations: BTreeMap<String, Vec<EntityReference>>,
    named_associations: BTreeMap<String, BTreeMap<String, EntityReference>>,
    sealed: bool,
}

impl EntityState {
    /// Creates a `New` state populated with the descriptor's defaults.
    #[must_use]
    pub fn new(
        reference: EntityReference,
        descriptor: Arc<EntityDescriptor>,
        now: Timestamp,
    ) -> Self {
        let properties = descriptor
            .properties()
            .map(|p| (p.name().to_string(), p.default_value().clone()))
            .collect();
        let associations = descriptor
            .associations()
            .map(|a| (a.name().to_string(), None))
            .collect();
        let many_associations = descriptor
            .many_associations()
            .map(|a| (a.name().to_string(), Vec::new()))
            .collect();
        let named_associations = descriptor
            .named_associations()
            .map(|a| (a.name().to_string(), BTreeMap::new()))
            .collect();
        Self {
            reference,
            descriptor,
            version: Version::none(),
            last_modified: now,
            status: EntityStatus::New,
            properties,
            associations,
            many_associations,
            named_associations,
            sealed: false,
        }
    }

    /// Builds a state from a persisted record.
    ///
    /// The record is shaped by the descriptor: declared members missing
    /// from the record take their defaults and undeclared members are
    /// dropped.
    #[must_use]
    pub fn from_record(
        record: &StateRecord,
        descriptor: Arc<EntityDescriptor>,
        status: EntityStatus,
    ) -> Self {
        let mut state = Self::new(
            EntityReference::new(&record.identity),
            descriptor,
            record.modified,
        );
        state.version = Version::new(record.version.clone());
        state.status = status;

        for (name, value) in &mut state.properties {
            if let Some(stored) = record.properties.get(name) {
                value.clone_from(stored);
            }
        }
        for (name, target) in &mut state.associations {
            if let Some(stored) = record.associations.get(name) {
                *target = stored.as_deref().map(EntityReference::new);
            }
        }
        for (name, target) in &mut state.many_associations {
            if let Some(stored) = record.many_associations.get(name) {
                *target = stored.iter().map(EntityReference::new).collect();
            }
        }
        for (name, target) in &mut state.named_associations {
            if let Some(stored) = record.named_associations.get(name) {
                *target = stored
                    .iter()
                    .map(|(k, v)| (k.clone(), EntityReference::new(v)))
                    .collect();
            }
        }
        state
    }

    /// Converts the state to its persisted shape.
    #[must_use]
    pub fn to_record(&self, application_version: &str) -> StateRecord {
        let mut record = StateRecord::new(
            self.reference.as_str(),
            self.descriptor.type_name(),
            application_version,
        )
        .with_version(self.version.as_str(), self.last_modified);
        record.properties = self.properties.clone();
        record.associations = self
            .associations
            .iter()
            .map(|(k, v)| (k.clone(), v.as_ref().map(|r| r.as_str().to_string())))
            .collect();
        record.many_associations = self
            .many_associations
            .iter()
            .map(|(k, v)| (k.clone(), v.iter().map(|r| r.as_str().to_string()).collect()))
            .collect();
        record.named_associations = self
            .named_associations
            .iter()
            .map(|(k, v)| {
                let entries = v
                    .iter()
                    .map(|(key, r)| (key.clone(), r.as_str().to_string()))
                    .collect();
                (k.clone(), entries)
            })
            .collect();
        record
    }

    /// The entity reference.
    #[must_use]
    pub fn reference(&self) -> &EntityReference {
        &self.reference
    }

    /// The entity type descriptor.
    #[must_use]
    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    /// The store-assigned version token.
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Last modification time.
    #[must_use]
    pub fn last_modified(&self) -> Timestamp {
        self.last_modified
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> EntityStatus {
        self.status
    }

    /// Returns true once the owning unit of work has closed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Returns a property value.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// All property values.
    #[must_use]
    pub fn properties(&self) -> &BTreeMap<String, Value> {
        &self.properties
    }

    /// Returns the target of a single-valued association.
    #[must_use]
    pub fn association(&self, name: &str) -> Option<&EntityReference> {
        self.associations.get(name).and_then(Option::as_ref)
    }

    /// Returns the targets of a many-association.
    #[must_use]
    pub fn many_association(&self, name: &str) -> &[EntityReference] {
        self.many_associations
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns the entries of a named association.
    #[must_use]
    pub fn named_association(&self, name: &str) -> Option<&BTreeMap<String, EntityReference>> {
        self.named_associations.get(name)
    }

    /// Sets a property value.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the state is sealed or removed,
    /// `UndeclaredMember` for unknown names and `PropertyType` if the
    /// value kind does not match the declaration.
    pub fn set_property(&mut self, name: &str, value: Value) -> CoreResult<()> {
        self.before_mutation()?;
        let declared = self
            .descriptor
            .property(name)
            .ok_or_else(|| self.undeclared("property", name))?;
        if !declared.kind().accepts(&value) {
            return Err(CoreError::PropertyType {
                type_name: self.descriptor.type_name().to_string(),
                name: name.to_string(),
                expected: declared.kind(),
                actual: value.kind(),
            });
        }
        self.properties.insert(name.to_string(), value);
        self.mark_updated();
        Ok(())
    }

    /// Sets or clears a single-valued association.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the state is sealed or removed and
    /// `UndeclaredMember` for unknown names.
    pub fn set_association(
        &mut self,
        name: &str,
        target: Option<EntityReference>,
    ) -> CoreResult<()> {
        self.before_mutation()?;
        let slot = self
            .associations
            .get_mut(name)
            .ok_or_else(|| undeclared(&self.descriptor, "association", name))?;
        *slot = target;
        self.mark_updated();
        Ok(())
    }

    /// Inserts a reference into a many-association.
    ///
    /// `None` appends; an index past the end is clamped to the end.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the state is sealed or removed and
    /// `UndeclaredMember` for unknown names.
    pub fn add_many_association(
        &mut self,
        name: &str,
        index: Option<usize>,
        target: EntityReference,
    ) -> CoreResult<()> {
        self.before_mutation()?;
        let list = self
            .many_associations
            .get_mut(name)
            .ok_or_else(|| undeclared(&self.descriptor, "many-association", name))?;
        let at = index.map_or(list.len(), |i| i.min(list.len()));
        list.insert(at, target);
        self.mark_updated();
        Ok(())
    }

    /// Removes the first occurrence of a reference from a many-association.
    ///
    /// Returns whether anything was removed; the status only changes when
    /// it was.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the state is sealed or removed and
    /// `UndeclaredMember` for unknown names.
    pub fn remove_many_association(
        &mut self,
        name: &str,
        target: &EntityReference,
    ) -> CoreResult<bool> {
        self.before_mutation()?;
        let list = self
            .many_associations
            .get_mut(name)
            .ok_or_else(|| undeclared(&self.descriptor, "many-association", name))?;
        let Some(pos) = list.iter().position(|r| r == target) else {
            return Ok(false);
        };
        list.remove(pos);
        self.mark_updated();
        Ok(true)
    }

    /// Binds a key of a named association, returning the previous target.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the state is sealed or removed and
    /// `UndeclaredMember` for unknown names.
    pub fn set_named_association(
        &mut self,
        name: &str,
        key: impl Into<String>,
        target: EntityReference,
    ) -> CoreResult<Option<EntityReference>> {
        self.before_mutation()?;
        let map = self
            .named_associations
            .get_mut(name)
            .ok_or_else(|| undeclared(&self.descriptor, "named-association", name))?;
        let previous = map.insert(key.into(), target);
        self.mark_updated();
        Ok(previous)
    }

    /// Unbinds a key of a named association.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the state is sealed or removed and
    /// `UndeclaredMember` for unknown names.
    pub fn remove_named_association(&mut self, name: &str, key: &str) -> CoreResult<bool> {
        self.before_mutation()?;
        let map = self
            .named_associations
            .get_mut(name)
            .ok_or_else(|| undeclared(&self.descriptor, "named-association", name))?;
        if map.remove(key).is_none() {
            return Ok(false);
        }
        self.mark_updated();
        Ok(true)
    }

    /// Marks the state for removal.
    ///
    /// # Errors
    ///
    /// Returns `IllegalState` if the state is sealed or already removed.
    pub fn remove(&mut self) -> CoreResult<()> {
        self.before_mutation()?;
        self.status = EntityStatus::Removed;
        Ok(())
    }

    /// Moves a `Loaded` state to `Updated`; other statuses are kept.
    ///
    /// Stores call this for states they migrated on read.
    pub fn mark_updated(&mut self) {
        if self.status == EntityStatus::Loaded {
            self.status = EntityStatus::Updated;
        }
    }

    /// Lists violated declaration constraints.
    ///
    /// Required properties must be non-null and required associations
    /// must be set.
    #[must_use]
    pub fn missing_required(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .descriptor
            .properties()
            .filter(|p| !p.is_optional())
            .filter(|p| self.properties.get(p.name()).map_or(true, Value::is_null))
            .map(|p| format!("property {} is required", p.name()))
            .collect();
        missing.extend(
            self.descriptor
                .associations()
                .filter(|a| !a.is_optional())
                .filter(|a| self.association(a.name()).is_none())
                .map(|a| format!("association {} is required", a.name())),
        );
        missing
    }

    pub(crate) fn copy_members_from(&mut self, other: &EntityState) {
        self.properties.clone_from(&other.properties);
        self.associations.clone_from(&other.associations);
        self.many_associations.clone_from(&other.many_associations);
        self.named_associations.clone_from(&other.named_associations);
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    fn before_mutation(&self) -> CoreResult<()> {
        if self.sealed {
            return Err(CoreError::illegal_state(format!(
                "entity {} belongs to a closed unit of work",
                self.reference
            )));
        }
        if self.status == EntityStatus::Removed {
            return Err(CoreError::illegal_state(format!(
                "entity {} has been removed",
                self.reference
            )));
        }
        Ok(())
    }

    fn undeclared(&self, kind: &'static str, name: &str) -> CoreError {
        undeclared(&self.descriptor, kind, name)
    }
}

fn undeclared(descriptor: &EntityDescriptor, kind: &'static str, name: &str) -> CoreError {
    CoreError::UndeclaredMember {
        type_name: descriptor.type_name().to_string(),
        kind,
        name: name.to_string(),
    }
}

/// Shared handle to an entity state.
///
/// The identity map, the per-store sub-transaction and entity facades all
/// hold the same handle, so a mutation through a facade is what the store
/// later sees.
#[derive(Clone)]
pub struct StateHandle(Arc<RwLock<EntityState>>);

impl StateHandle {
    /// Wraps a state.
    #[must_use]
    pub fn new(state: EntityState) -> Self {
        Self(Arc::new(RwLock::new(state)))
    }

    /// Acquires a read guard.
    pub fn read(&self) -> RwLockReadGuard<'_, EntityState> {
        self.0.read()
    }

    /// Acquires a write guard.
    pub fn write(&self) -> RwLockWriteGuard<'_, EntityState> {
        self.0.write()
    }

    /// Returns true if both handles point at the same state.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Copies the current state.
    #[must_use]
    pub fn snapshot(&self) -> EntityState {
        self.0.read().clone()
    }

    /// The entity reference.
    #[must_use]
    pub fn reference(&self) -> EntityReference {
        self.0.read().reference.clone()
    }

    /// The entity type name.
    #[must_use]
    pub fn type_name(&self) -> String {
        self.0.read().descriptor.type_name().to_string()
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> EntityStatus {
        self.0.read().status
    }

    /// The store-assigned version token.
    #[must_use]
    pub fn version(&self) -> Version {
        self.0.read().version.clone()
    }

    /// Returns a copy of a property value.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<Value> {
        self.0.read().property(name).cloned()
    }

    /// Returns a text property.
    #[must_use]
    pub fn text(&self, name: &str) -> Option<String> {
        self.0.read().property(name).and_then(Value::as_text).map(str::to_string)
    }

    /// Sets a property value.
    ///
    /// # Errors
    ///
    /// See [`EntityState::set_property`].
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> CoreResult<()> {
        self.0.write().set_property(name, value.into())
    }

    /// Returns the target of a single-valued association.
    #[must_use]
    pub fn association(&self, name: &str) -> Option<EntityReference> {
        self.0.read().association(name).cloned()
    }

    /// Sets or clears a single-valued association.
    ///
    /// # Errors
    ///
    /// See [`EntityState::set_association`].
    pub fn set_association(&self, name: &str, target: Option<EntityReference>) -> CoreResult<()> {
        self.0.write().set_association(name, target)
    }

    /// Returns the targets of a many-association.
    #[must_use]
    pub fn many_association(&self, name: &str) -> Vec<EntityReference> {
        self.0.read().many_association(name).to_vec()
    }

    /// Appends to a many-association.
    ///
    /// # Errors
    ///
    /// See [`EntityState::add_many_association`].
    pub fn add_many_association(&self, name: &str, target: EntityReference) -> CoreResult<()> {
        self.0.write().add_many_association(name, None, target)
    }

    /// Removes from a many-association.
    ///
    /// # Errors
    ///
    /// See [`EntityState::remove_many_association`].
    pub fn remove_many_association(
        &self,
        name: &str,
        target: &EntityReference,
    ) -> CoreResult<bool> {
        self.0.write().remove_many_association(name, target)
    }

    /// Returns a copy of a named association.
    #[must_use]
    pub fn named_association(&self, name: &str) -> BTreeMap<String, EntityReference> {
        self.0.read().named_association(name).cloned().unwrap_or_default()
    }

    /// Binds a key of a named association.
    ///
    /// # Errors
    ///
    /// See [`EntityState::set_named_association`].
    pub fn set_named_association(
        &self,
        name: &str,
        key: impl Into<String>,
        target: EntityReference,
    ) -> CoreResult<Option<EntityReference>> {
        self.0.write().set_named_association(name, key, target)
    }

    /// Unbinds a key of a named association.
    ///
    /// # Errors
    ///
    /// See [`EntityState::remove_named_association`].
    pub fn remove_named_association(&self, name: &str, key: &str) -> CoreResult<bool> {
        self.0.write().remove_named_association(name, key)
    }

    /// Marks the state for removal.
    ///
    /// # Errors
    ///
    /// See [`EntityState::remove`].
    pub fn remove(&self) -> CoreResult<()> {
        self.0.write().remove()
    }
}

impl fmt::Debug for StateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.read();
        f.debug_struct("StateHandle")
            .field("reference", &state.reference)
            .field("type", &state.descriptor.type_name())
            .field("status", &state.status)
            .finish()
    }
}
