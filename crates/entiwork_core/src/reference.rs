//! Entity reference.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque, globally unique identity of one logical entity.
///
/// References are:
/// - Independent of the store holding the entity
/// - Immutable once created
/// - Compared by value
///
/// Cloning is cheap; the string is shared.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityReference(Arc<str>);

impl EntityReference {
    /// Creates a reference from an identity string.
    #[must_use]
    pub fn new(identity: impl AsRef<str>) -> Self {
        Self(Arc::from(identity.as_ref()))
    }

    /// Creates a new random reference.
    #[must_use]
    pub fn generate() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Parses a reference, rejecting empty identities.
    #[must_use]
    pub fn parse(identity: &str) -> Option<Self> {
        let trimmed = identity.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self::new(trimmed))
        }
    }

    /// Returns the identity string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityReference({})", self.0)
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityReference {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

impl From<String> for EntityReference {
    fn from(identity: String) -> Self {
        Self(Arc::from(identity))
    }
}

impl AsRef<str> for EntityReference {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
