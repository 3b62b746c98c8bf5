//! Error types for EntiWork core.

use crate::entity::EntityInstance;
use crate::reference::EntityReference;
use crate::store::StoreError;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by units of work, entity builders and entity states.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A store has no state for the reference.
    #[error("entity not found: {reference}")]
    EntityNotFound {
        /// The missing reference.
        reference: EntityReference,
    },

    /// No candidate module yields the entity, or it was removed in this
    /// unit of work.
    #[error("no such entity {reference} in usecase {usecase}")]
    NoSuchEntity {
        /// The requested reference.
        reference: EntityReference,
        /// Usecase of the unit of work.
        usecase: String,
    },

    /// The type is not visible in the module.
    #[error("entity type {type_name} not found in {module}")]
    EntityTypeNotFound {
        /// The unknown type name.
        type_name: String,
        /// The module (or application) that was searched.
        module: String,
    },

    /// A new entity collides with an existing one.
    #[error("entity already exists: {reference}")]
    EntityAlreadyExists {
        /// The colliding reference.
        reference: EntityReference,
    },

    /// Optimistic version check failed for one or more entities.
    #[error("concurrent modification of {entities} in usecase {usecase}")]
    ConcurrentEntityModification {
        /// The entities whose versions changed underneath.
        entities: ModifiedEntities,
        /// Usecase of the unit of work.
        usecase: String,
    },

    /// Completion failed in a backend; every prepared change was cancelled.
    #[error("completion failed in usecase {usecase}: {source}")]
    Completion {
        /// Usecase of the unit of work.
        usecase: String,
        /// The underlying failure.
        #[source]
        source: Box<CoreError>,
    },

    /// A lifecycle hook rejected a new entity.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A before-completion callback vetoed completion.
    #[error("callback failed: {0}")]
    Callback(#[from] CallbackError),

    /// Operation is not valid in the current state.
    #[error("illegal state: {message}")]
    IllegalState {
        /// What was attempted.
        message: String,
    },

    /// The name is not declared by the entity type.
    #[error("{kind} {name} is not declared by {type_name}")]
    UndeclaredMember {
        /// Entity type name.
        type_name: String,
        /// Member kind ("property", "association", ...).
        kind: &'static str,
        /// The undeclared name.
        name: String,
    },

    /// A property value has the wrong kind.
    #[error("property {name} of {type_name} expects {expected}, got {actual}")]
    PropertyType {
        /// Entity type name.
        type_name: String,
        /// Property name.
        name: String,
        /// Declared kind.
        expected: entiwork_codec::ValueKind,
        /// Kind of the rejected value.
        actual: entiwork_codec::ValueKind,
    },

    /// Store backend error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CoreError {
    /// Creates an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Maps a store error onto the core taxonomy.
    pub(crate) fn from_store(err: StoreError, usecase: &str) -> Self {
        match err {
            StoreError::NotFound { reference } => Self::EntityNotFound { reference },
            StoreError::UnknownType { type_name, module } => {
                Self::EntityTypeNotFound { type_name, module }
            }
            StoreError::AlreadyExists { reference } => Self::EntityAlreadyExists { reference },
            StoreError::Conflict { references } => Self::ConcurrentEntityModification {
                entities: ModifiedEntities::new(references),
                usecase: usecase.to_string(),
            },
            other => Self::Store(other),
        }
    }

    /// Returns true for optimistic-lock conflicts, including wrapped ones.
    #[must_use]
    pub fn is_concurrent_modification(&self) -> bool {
        match self {
            Self::ConcurrentEntityModification { .. } => true,
            Self::Completion { source, .. } => source.is_concurrent_modification(),
            _ => false,
        }
    }
}

/// The entities named by a concurrent-modification failure.
///
/// References always come from the store; instances are filled in from
/// the identity map of the failing unit of work.
#[derive(Clone, Default)]
pub struct ModifiedEntities {
    references: Vec<EntityReference>,
    instances: Vec<EntityInstance>,
}

impl ModifiedEntities {
    /// Creates the set from store-reported references.
    #[must_use]
    pub fn new(references: Vec<EntityReference>) -> Self {
        Self {
            references,
            instances: Vec::new(),
        }
    }

    /// References of the conflicting entities.
    #[must_use]
    pub fn references(&self) -> &[EntityReference] {
        &self.references
    }

    /// Live instances of the conflicting entities.
    #[must_use]
    pub fn instances(&self) -> &[EntityInstance] {
        &self.instances
    }

    /// Returns true if the reference conflicted.
    #[must_use]
    pub fn contains(&self, reference: &EntityReference) -> bool {
        self.references.contains(reference)
    }

    /// Number of conflicting entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.references.len()
    }

    /// Returns true if nothing conflicted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    pub(crate) fn resolve(
        mut self,
        identity_map: &HashMap<EntityReference, EntityInstance>,
    ) -> Self {
        self.instances = self
            .references
            .iter()
            .filter_map(|r| identity_map.get(r).cloned())
            .collect();
        self
    }
}

impl fmt::Debug for ModifiedEntities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModifiedEntities")
            .field("references", &self.references)
            .field("resolved", &self.instances.len())
            .finish()
    }
}

impl fmt::Display for ModifiedEntities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, reference) in self.references.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{reference}")?;
        }
        f.write_str("]")
    }
}

/// Failure of a creation or constraint hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    /// The creation hook failed.
    #[error("creation of {type_name} {reference} failed: {message}")]
    CreationFailed {
        /// Entity type name.
        type_name: String,
        /// Reference of the entity being built.
        reference: EntityReference,
        /// Hook message.
        message: String,
    },

    /// Constraints were violated.
    #[error("constraint violation on {type_name} {reference}: {}", .violations.join(", "))]
    ConstraintViolation {
        /// Entity type name.
        type_name: String,
        /// Reference of the entity being built.
        reference: EntityReference,
        /// One entry per violated constraint.
        violations: Vec<String>,
    },
}

/// A callback refused completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    /// Creates a callback error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The callback's message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
