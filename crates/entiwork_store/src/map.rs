//! Key/value storage under serialized entity stores.

use entiwork_core::{EntityReference, StoreResult};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;

/// One change in a batch handed to [`MapStore::apply_changes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapChange {
    /// Inserts or replaces the value of `key`.
    Put {
        /// The entity reference.
        key: EntityReference,
        /// The encoded record.
        bytes: Vec<u8>,
    },
    /// Deletes `key`; deleting a missing key is not an error.
    Remove {
        /// The entity reference.
        key: EntityReference,
    },
}

impl MapChange {
    /// The key this change touches.
    #[must_use]
    pub fn key(&self) -> &EntityReference {
        match self {
            Self::Put { key, .. } | Self::Remove { key } => key,
        }
    }
}

/// Lazily produced stream of stored entries.
pub type MapEntries<'a> = Box<dyn Iterator<Item = StoreResult<(EntityReference, Vec<u8>)>> + 'a>;

/// A byte store keyed by entity reference.
///
/// Map stores are **opaque**: they never interpret the bytes they hold.
/// Record encoding, versioning and caching belong to
/// [`SerializedEntityStore`](crate::SerializedEntityStore).
///
/// # Invariants
///
/// - `get` returns exactly the bytes of the last applied `Put`
/// - a batch passed to `apply_changes` is applied in order
/// - map stores must be `Send + Sync`
///
/// # Implementors
///
/// - [`MemoryMapStore`] - for tests and ephemeral data
/// - [`FileMapStore`](crate::FileMapStore) - one file per record
pub trait MapStore: Send + Sync + fmt::Debug {
    /// Reads the value of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value exists but cannot be read.
    fn get(&self, key: &EntityReference) -> StoreResult<Option<Vec<u8>>>;

    /// Applies a batch of changes.
    ///
    /// # Errors
    ///
    /// Returns an error if a change cannot be written. Changes preceding
    /// the failing one may already be applied.
    fn apply_changes(&self, changes: Vec<MapChange>) -> StoreResult<()>;

    /// Streams every entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the scan cannot start.
    fn entries(&self) -> StoreResult<MapEntries<'_>>;
}

/// A [`MapStore`] holding values in memory.
#[derive(Debug, Default)]
pub struct MemoryMapStore {
    entries: RwLock<BTreeMap<EntityReference, Vec<u8>>>,
}

impl MemoryMapStore {
    /// Creates an empty map store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl MapStore for MemoryMapStore {
    fn get(&self, key: &EntityReference) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn apply_changes(&self, changes: Vec<MapChange>) -> StoreResult<()> {
        let mut entries = self.entries.write();
        for change in changes {
            match change {
                MapChange::Put { key, bytes } => {
                    entries.insert(key, bytes);
                }
                MapChange::Remove { key } => {
                    entries.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn entries(&self) -> StoreResult<MapEntries<'_>> {
        let snapshot: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(snapshot.into_iter().map(Ok)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn put(key: &str, bytes: &[u8]) -> MapChange {
        MapChange::Put {
            key: key.into(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn batch_is_applied_in_order() {
        let map = MemoryMapStore::new();
        map.apply_changes(vec![
            put("a", b"1"),
            put("a", b"2"),
            put("b", b"3"),
            MapChange::Remove { key: "b".into() },
        ])
        .unwrap();
        assert_eq!(map.get(&"a".into()).unwrap(), Some(b"2".to_vec()));
        assert_eq!(map.get(&"b".into()).unwrap(), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn removing_missing_key_is_ok() {
        let map = MemoryMapStore::new();
        map.apply_changes(vec![MapChange::Remove { key: "x".into() }]).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn entries_are_a_snapshot() {
        let map = MemoryMapStore::new();
        map.apply_changes(vec![put("a", b"1")]).unwrap();
        let entries = map.entries().unwrap();
        map.apply_changes(vec![put("b", b"2")]).unwrap();
        assert_eq!(entries.count(), 1);
    }

    proptest! {
        #[test]
        fn behaves_like_a_btree_map(
            ops in prop::collection::vec(
                (0u8..8, prop::option::of(prop::collection::vec(any::<u8>(), 0..16))),
                0..64,
            ),
        ) {
            let map = MemoryMapStore::new();
            let mut model = BTreeMap::new();
            for (key, value) in ops {
                let key = EntityReference::new(format!("k{key}"));
                let change = match value {
                    Some(bytes) => {
                        model.insert(key.clone(), bytes.clone());
                        MapChange::Put { key, bytes }
                    }
                    None => {
                        model.remove(&key);
                        MapChange::Remove { key }
                    }
                };
                map.apply_changes(vec![change]).unwrap();
            }
            let stored: BTreeMap<_, _> = map.entries().unwrap().map(Result::unwrap).collect();
            prop_assert_eq!(stored, model);
        }
    }
}
