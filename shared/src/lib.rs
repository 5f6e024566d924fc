//! Shared types for the CRM migration engine
//!
//! Contains the record and identifier types, the classified remote failure,
//! and the logging helpers used by both the connector and the migrator.

pub mod errors;
pub mod logging;
pub mod types;

pub use errors::*;
pub use types::*;
