//! Concrete implementations of the migrator's collaborator traits

pub mod progress;
pub mod state_store;
pub mod transformer;

#[cfg(test)]
pub mod tests;

pub use progress::TracingProgressSink;
pub use state_store::JsonStateStore;
pub use transformer::MappingTransformer;
