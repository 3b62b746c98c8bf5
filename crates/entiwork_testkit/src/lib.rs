//! # EntiWork Testkit
//!
//! Test utilities for EntiWork.
//!
//! This crate provides:
//! - Fixtures: a typed `User` facade and applications over every bundled store
//! - Property-based test generators using proptest
//! - A fault-injecting store wrapper for partial-failure tests
//! - Test logging setup
//!
//! ## Usage
//!
//! ```rust,ignore
//! use entiwork_testkit::prelude::*;
//!
//! #[test]
//! fn user_round_trip() {
//!     let app = TestApp::memory();
//!     let mut uow = app.factory.new_unit_of_work();
//!     create_user(&mut uow, "user:1", "Ann").unwrap();
//!     uow.complete().unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use faults::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
