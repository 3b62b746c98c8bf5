//! Unit-of-work factory.

use crate::config::Usecase;
use crate::context::UnitOfWorkContext;
use crate::module::Application;
use crate::types::{now_millis, Timestamp, UnitOfWorkId};
use crate::unit_of_work::UnitOfWorkInstance;
use std::sync::Arc;

/// Opens units of work over an application.
///
/// Every unit of work opened through a factory is pushed onto the
/// factory's context. Use [`with_context`](Self::with_context) to give
/// each execution context its own stack.
#[derive(Debug, Clone)]
pub struct UnitOfWorkFactory {
    application: Arc<Application>,
    context: UnitOfWorkContext,
}

impl UnitOfWorkFactory {
    /// Creates a factory with a fresh context.
    #[must_use]
    pub fn new(application: Arc<Application>) -> Self {
        Self {
            application,
            context: UnitOfWorkContext::new(),
        }
    }

    /// Returns a factory over the same application using `context`.
    #[must_use]
    pub fn with_context(&self, context: UnitOfWorkContext) -> Self {
        Self {
            application: Arc::clone(&self.application),
            context,
        }
    }

    /// The application.
    #[must_use]
    pub fn application(&self) -> &Arc<Application> {
        &self.application
    }

    /// The context units of work are pushed onto.
    #[must_use]
    pub fn context(&self) -> &UnitOfWorkContext {
        &self.context
    }

    /// The innermost active unit of work of this factory's context.
    #[must_use]
    pub fn current_unit_of_work(&self) -> Option<UnitOfWorkId> {
        self.context.current()
    }

    /// Opens a unit of work for the default usecase.
    #[must_use]
    pub fn new_unit_of_work(&self) -> UnitOfWorkInstance {
        self.new_unit_of_work_for(Usecase::default())
    }

    /// Opens a unit of work for `usecase` at the current time.
    #[must_use]
    pub fn new_unit_of_work_for(&self, usecase: Usecase) -> UnitOfWorkInstance {
        self.new_unit_of_work_at(usecase, now_millis())
    }

    /// Opens a unit of work for `usecase` at a fixed logical time.
    #[must_use]
    pub fn new_unit_of_work_at(
        &self,
        usecase: Usecase,
        current_time: Timestamp,
    ) -> UnitOfWorkInstance {
        UnitOfWorkInstance::new(
            Arc::clone(&self.application),
            self.context.clone(),
            usecase,
            current_time,
        )
    }
}
