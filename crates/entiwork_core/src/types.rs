//! Core type definitions for EntiWork.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Returns the current wall-clock time in epoch milliseconds.
#[must_use]
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Optimistic-lock token assigned by a store.
///
/// The token is opaque to the unit of work: stores may use a counter, a
/// unit-of-work identity or a content hash. States that were never
/// persisted carry the empty token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(String);

impl Version {
    /// The token of a state that has never been persisted.
    #[must_use]
    pub const fn none() -> Self {
        Self(String::new())
    }

    /// Creates a token from a string.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns true for the empty token.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("<none>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<String> for Version {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for Version {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl From<u64> for Version {
    fn from(counter: u64) -> Self {
        Self(counter.to_string())
    }
}

/// Unique identifier for a unit of work.
///
/// Identifiers are random UUIDs; serialized stores use them as the
/// version token of the records a unit of work writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitOfWorkId(String);

impl UnitOfWorkId {
    /// Creates a new random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitOfWorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uow:{}", self.0)
    }
}

/// Identity of one entity store instance.
///
/// Store IDs are process-unique and are used to key the per-store
/// sub-transactions of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StoreId(u64);

static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

impl StoreId {
    /// Allocates a fresh store ID.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store:{}", self.0)
    }
}
