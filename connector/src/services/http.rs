//! Shared HTTP plumbing for the record-store clients

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use serde_json::Value;
use url::Url;

use shared::{ApiFailure, DestinationId, SourceId};
use crate::error::{ConnectorError, ConnectorResult};

const API_PREFIX: &str = "api/v4/";

/// Location and credentials of one record store
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub base_url: Url,
    pub token: String,
    pub timeout: Duration,
}

impl EndpointConfig {
    pub fn new(base_url: &str, token: impl Into<String>) -> ConnectorResult<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            base_url,
            token: token.into(),
            timeout: Duration::from_secs(30),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolve a path such as `leads/12/notes` against the API root
    pub fn api_url(&self, path: &str) -> Result<Url, ApiFailure> {
        self.base_url
            .join(API_PREFIX)
            .and_then(|root| root.join(path.trim_start_matches('/')))
            .map_err(|e| ApiFailure::InvalidResponse(format!("bad request path {path}: {e}")))
    }
}

/// Build a client with bearer auth and JSON content type preset
pub(crate) fn build_client(config: &EndpointConfig) -> ConnectorResult<reqwest::Client> {
    let mut headers = HeaderMap::new();
    let auth = HeaderValue::from_str(&format!("Bearer {}", config.token)).map_err(|e| ConnectorError::ConfigError {
        message: format!("token is not a valid header value: {e}"),
    })?;
    headers.insert(AUTHORIZATION, auth);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(reqwest::Client::builder()
        .default_headers(headers)
        .timeout(config.timeout)
        .build()?)
}

/// Retry-after in whole seconds; other header forms are ignored
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub(crate) fn network_failure(error: reqwest::Error) -> ApiFailure {
    ApiFailure::NetworkError(error.to_string())
}

/// Classify a response. Success yields the JSON body, or `None` for an empty body.
pub(crate) async fn read_json(response: reqwest::Response) -> Result<Option<Value>, ApiFailure> {
    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        return Err(ApiFailure::from_status(status.as_u16(), retry_after, body));
    }

    let bytes = response.bytes().await.map_err(network_failure)?;
    if bytes.is_empty() {
        return Ok(None);
    }
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ApiFailure::InvalidResponse(format!("response is not JSON: {e}")))
}

/// Items under `_embedded.<key>`, or nothing
pub(crate) fn embedded_items(body: Option<&Value>, key: &str) -> Vec<Value> {
    body.and_then(|b| b.get("_embedded"))
        .and_then(|e| e.get(key))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Record ids arrive as numbers or strings
pub(crate) fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

pub(crate) fn source_id_of(item: &Value) -> Option<SourceId> {
    item.get("id").and_then(id_string).map(SourceId::from)
}

pub(crate) fn destination_id_of(item: &Value) -> Option<DestinationId> {
    item.get("id").and_then(id_string).map(DestinationId::from)
}

/// Numeric ids are sent back as numbers, anything else as a string
pub(crate) fn id_value(id: &str) -> Value {
    id.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::from(id))
}
