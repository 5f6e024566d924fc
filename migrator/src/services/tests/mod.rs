//! Service-specific tests
//!
//! Tests that need real files run against a temporary state directory.


// Common test utilities for services
#[cfg(test)]
pub mod common {
    use tempfile::TempDir;

    use crate::services::JsonStateStore;

    /// Store over a fresh temporary directory; keep the `TempDir` alive for the test
    pub fn temp_store() -> (TempDir, JsonStateStore) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let store = JsonStateStore::new(dir.path());
        (dir, store)
    }
}
