//! Common test utilities and infrastructure
//!
//! In-memory record stores, a migrator builder and fixtures shared by the
//! migrator test suites.

#![allow(dead_code)]

pub mod fixtures;
pub mod helpers;

// Re-export commonly used items for convenience
pub use fixtures::TestFixtures;
pub use helpers::{MigratorBuilder, TestHarness, TestHelpers};
