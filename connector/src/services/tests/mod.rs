//! Tests for the HTTP record-store clients against a local mock server

pub mod http_destination;

use crate::services::http::EndpointConfig;

pub(crate) fn endpoint(server: &wiremock::MockServer) -> EndpointConfig {
    EndpointConfig::new(&server.uri(), "test-token").unwrap()
}
