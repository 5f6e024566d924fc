//! Record-store client implementations

pub mod http;
pub mod http_destination;
pub mod http_source;

#[cfg(test)]
pub mod tests;

pub use http::EndpointConfig;
pub use http_destination::*;
pub use http_source::*;
