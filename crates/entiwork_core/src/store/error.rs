//! Error types for entity store backends.

use crate::migration::MigrationError;
use crate::reference::EntityReference;
use entiwork_codec::CodecError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in an entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No record exists for the reference.
    #[error("no state stored for {reference}")]
    NotFound {
        /// The missing reference.
        reference: EntityReference,
    },

    /// The stored type is not visible in the module.
    #[error("stored type {type_name} is not visible in module {module}")]
    UnknownType {
        /// The stored type name.
        type_name: String,
        /// The module that was asked.
        module: String,
    },

    /// A new state collides with a stored record.
    #[error("a record already exists for {reference}")]
    AlreadyExists {
        /// The colliding reference.
        reference: EntityReference,
    },

    /// Stored versions differ from the versions the states were read at.
    #[error("version conflict on {} entities", .references.len())]
    Conflict {
        /// The conflicting references.
        references: Vec<EntityReference>,
    },

    /// Record (de)serialization failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A stored record is unreadable.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// Record migration failed.
    #[error("migration failed: {0}")]
    Migration(#[from] MigrationError),

    /// Another process holds the store directory.
    #[error("store directory {path} is locked by another process")]
    Locked {
        /// The store directory.
        path: PathBuf,
    },

    /// Injected or backend-specific failure.
    #[error("store failure: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates a backend failure.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
