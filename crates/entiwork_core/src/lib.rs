//! # EntiWork Core
//!
//! The transactional object cache of EntiWork.
//!
//! This crate provides:
//! - [`UnitOfWorkInstance`]: identity map, pause/resume and the
//!   complete/discard protocol over every store a transaction touches
//! - [`EntityStoreUnitOfWork`]: the per-store sub-transaction
//! - [`EntityBuilder`]: staging for new entities
//! - [`EntityStore`] and [`StateCommitter`]: the backend SPI
//! - [`migration`]: version-to-version record migrations
//!
//! ## Usage
//!
//! ```ignore
//! let factory = UnitOfWorkFactory::new(application);
//!
//! let mut uow = factory.new_unit_of_work();
//! let mut builder = uow.new_entity_builder("User", Some("user:42".into()))?;
//! builder.state()?.set_property("name", "Ann")?;
//! builder.new_instance(&mut uow)?;
//! uow.complete()?;
//!
//! let mut uow = factory.new_unit_of_work();
//! let user = uow.get(&"user:42".into())?;
//! assert_eq!(user.status(), EntityStatus::Loaded);
//! uow.discard();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod cache;
mod config;
mod context;
mod descriptor;
mod entity;
mod error;
mod factory;
pub mod migration;
mod module;
mod reference;
mod state;
mod store;
mod store_uow;
mod types;
mod unit_of_work;

#[cfg(test)]
mod testing;

pub use builder::EntityBuilder;
pub use cache::{CacheStats, EntityCache};
pub use config::{CacheOptions, UnitOfWorkOptions, Usecase, DEFAULT_USECASE};
pub use context::UnitOfWorkContext;
pub use descriptor::{
    AssociationDescriptor, EntityDescriptor, EntityDescriptorBuilder, PropertyDescriptor,
};
pub use entity::{
    downcast_instance, AsAny, Completable, Completable as UnitOfWorkCallback, CompletionStatus,
    Entity, EntityFactory, EntityInstance, GenericEntity, GenericEntityFactory, Identifiable,
    StateHolder,
};
pub use error::{CallbackError, CoreError, CoreResult, LifecycleError, ModifiedEntities};
pub use factory::UnitOfWorkFactory;
pub use migration::{Migration, MigrationError, MigrationRules, MigrationStep};
pub use module::{
    Application, ApplicationBuilder, EntityModel, Module, ModuleBuilder,
    DEFAULT_APPLICATION_VERSION,
};
pub use reference::EntityReference;
pub use state::{EntityState, EntityStatus, StateHandle};
pub use store::{
    EntityStore, NoopCommitter, StateCommitter, StateIter, StoreError, StoreResult,
    StoreUnitOfWorkInfo,
};
pub use store_uow::EntityStoreUnitOfWork;
pub use types::{now_millis, StoreId, Timestamp, UnitOfWorkId, Version};
pub use unit_of_work::UnitOfWorkInstance;

// Re-exported so that backends and facades need a single dependency.
pub use entiwork_codec::{StateRecord, Value, ValueKind};
