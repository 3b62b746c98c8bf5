//! # EntiWork Store
//!
//! Entity store backends for EntiWork.
//!
//! ## Available Stores
//!
//! - [`MemoryEntityStore`] - records in memory, counter version tokens
//! - [`SerializedEntityStore`] - encoded records over any [`MapStore`],
//!   with record cache, migration on read and configurable version tokens
//! - [`SqlEntityStore`] - one SQLite row per entity, row-version tokens
//!
//! ## Map Stores
//!
//! - [`MemoryMapStore`] - for testing and ephemeral data
//! - [`FileMapStore`] - one file per record in a locked directory
//!
//! ## Example
//!
//! ```rust
//! use entiwork_core::{Application, EntityDescriptor, Module, UnitOfWorkFactory, ValueKind};
//! use entiwork_store::{MemoryMapStore, SerializedEntityStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(SerializedEntityStore::new(MemoryMapStore::new()));
//! let user = EntityDescriptor::builder("User").property("name", ValueKind::Text).build();
//! let app = Application::builder("demo")
//!     .module(Module::builder("users", store).entity(user))
//!     .build();
//!
//! let factory = UnitOfWorkFactory::new(app);
//! let mut uow = factory.new_unit_of_work();
//! let mut builder = uow.new_entity_builder("User", Some("user:1".into())).unwrap();
//! builder.state().unwrap().set_property("name", "Ann").unwrap();
//! builder.new_instance(&mut uow).unwrap();
//! uow.complete().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod file;
mod map;
mod memory;
mod serialized;
mod sql;

#[cfg(test)]
mod testing;

pub use config::{StoreConfig, VersionStrategy, DEFAULT_CACHE_CAPACITY, DEFAULT_SCAN_SYNC_BATCH};
pub use file::FileMapStore;
pub use map::{MapChange, MapEntries, MapStore, MemoryMapStore};
pub use memory::MemoryEntityStore;
pub use serialized::{SerializedEntityStore, SerializedStoreBuilder};
pub use sql::SqlEntityStore;
