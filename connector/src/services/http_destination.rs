//! HTTP client for the destination record store

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};

use shared::{component_debug, ApiFailure, DestinationRef, EntityType};
use crate::error::ConnectorResult;
use crate::services::http::{self, EndpointConfig};
use crate::traits::DestinationClient;
use crate::types::{CreatedRecord, DestinationRecord, RemovalOutcome};

/// Stage id the destination uses for closed-lost leads
pub const DEFAULT_LOST_STATUS_ID: u64 = 143;

/// Refusal code for a create call whose records target different endpoints
pub const MIXED_CREATE_PATHS_BLOCKED: &str = "MIXED_CREATE_PATHS_BLOCKED";

const COMPONENT: &str = "destination";

pub struct HttpDestinationClient {
    client: reqwest::Client,
    config: EndpointConfig,
    lost_status_id: u64,
}

impl HttpDestinationClient {
    pub fn new(config: EndpointConfig) -> ConnectorResult<Self> {
        Ok(Self {
            client: http::build_client(&config)?,
            config,
            lost_status_id: DEFAULT_LOST_STATUS_ID,
        })
    }

    pub fn with_lost_status_id(mut self, lost_status_id: u64) -> Self {
        self.lost_status_id = lost_status_id;
        self
    }

    async fn send(&self, method: Method, path: &str, body: Option<Value>) -> Result<Option<Value>, ApiFailure> {
        let url = self.config.api_url(path)?;
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(http::network_failure)?;
        http::read_json(response).await
    }

    /// Path a create request for these records is posted to
    fn create_path(entity_type: EntityType, parent: Option<&DestinationRef>) -> Result<String, ApiFailure> {
        match entity_type {
            EntityType::Notes => parent
                .map(|p| format!("{}/notes", p.entity_type))
                .ok_or_else(|| ApiFailure::InvalidResponse("note without a parent record".to_string())),
            other => Ok(other.as_str().to_string()),
        }
    }

    /// Payload with the request id and parent reference attached
    fn create_body(record: &DestinationRecord, request_id: usize) -> Value {
        let mut payload = match &record.payload {
            Value::Object(map) => Value::Object(map.clone()),
            _ => json!({}),
        };
        payload["request_id"] = Value::from(request_id.to_string());
        if let Some(parent) = &record.parent {
            payload["entity_id"] = http::id_value(parent.id.as_str());
            if record.entity_type == EntityType::Tasks {
                payload["entity_type"] = Value::from(parent.entity_type.as_str());
            }
        }
        payload
    }

    /// Match created items back to the submitted order
    fn map_created(items: Vec<Value>, results: &mut [Option<CreatedRecord>]) {
        let has_request_ids = items.iter().all(|i| i.get("request_id").is_some());
        for (position, item) in items.into_iter().enumerate() {
            let Some(id) = http::destination_id_of(&item) else { continue };
            let slot = if has_request_ids {
                item.get("request_id")
                    .and_then(http::id_string)
                    .and_then(|r| r.parse::<usize>().ok())
            } else {
                Some(position)
            };
            if let Some(slot) = slot.filter(|s| *s < results.len()) {
                results[slot] = Some(CreatedRecord { id });
            }
        }
    }
}

#[async_trait]
impl DestinationClient for HttpDestinationClient {
    async fn create_batch(
        &self,
        entity_type: EntityType,
        records: &[DestinationRecord],
    ) -> Result<Vec<Option<CreatedRecord>>, ApiFailure> {
        let mut results: Vec<Option<CreatedRecord>> = vec![None; records.len()];
        let Some(first) = records.first() else {
            return Ok(results);
        };

        // One call is one POST; notes under different parent types must be split by the caller
        let path = Self::create_path(entity_type, first.parent.as_ref())?;
        for record in &records[1..] {
            let other = Self::create_path(entity_type, record.parent.as_ref())?;
            if other != path {
                return Err(ApiFailure::SafetyViolation {
                    code: MIXED_CREATE_PATHS_BLOCKED.to_string(),
                    operation: format!("POST {path} with records for {other}"),
                });
            }
        }

        let body: Vec<Value> = records.iter().enumerate().map(|(i, r)| Self::create_body(r, i)).collect();
        let response = self.send(Method::POST, &path, Some(Value::Array(body))).await?;
        let items = http::embedded_items(response.as_ref(), entity_type.as_str());
        component_debug!(COMPONENT, path = %path, sent = records.len(), created = items.len(), "Create call returned");
        Self::map_created(items, &mut results);

        Ok(results)
    }

    async fn link_entities(&self, parent: &DestinationRef, links: &[DestinationRef]) -> Result<(), ApiFailure> {
        if links.is_empty() {
            return Ok(());
        }
        let body: Vec<Value> = links
            .iter()
            .map(|l| json!({ "to_entity_id": http::id_value(l.id.as_str()), "to_entity_type": l.entity_type.as_str() }))
            .collect();
        let path = format!("{}/{}/link", parent.entity_type, parent.id);
        self.send(Method::POST, &path, Some(Value::Array(body))).await?;
        Ok(())
    }

    async fn delete_or_archive(
        &self,
        target: &DestinationRef,
        parent: Option<DestinationRef>,
    ) -> Result<RemovalOutcome, ApiFailure> {
        let id = http::id_value(target.id.as_str());
        match target.entity_type {
            // Hard deletes of leads are rejected (405); close them as lost instead
            EntityType::Leads => {
                let body = json!([{ "id": id, "status_id": self.lost_status_id }]);
                self.send(Method::PATCH, "leads", Some(body)).await?;
                Ok(RemovalOutcome::Archived)
            }
            EntityType::Tasks => {
                let body = json!([{ "id": id, "is_completed": true, "result": { "text": "rolled back" } }]);
                self.send(Method::PATCH, "tasks", Some(body)).await?;
                Ok(RemovalOutcome::Archived)
            }
            EntityType::Notes => {
                let parent = parent
                    .ok_or_else(|| ApiFailure::InvalidResponse(format!("note {} has no parent record", target.id)))?;
                let path = format!("{}/{}/notes/{}", parent.entity_type, parent.id, target.id);
                self.send(Method::DELETE, &path, None).await?;
                Ok(RemovalOutcome::Deleted)
            }
            EntityType::Contacts | EntityType::Companies => {
                let path = format!("{}/{}", target.entity_type, target.id);
                self.send(Method::DELETE, &path, None).await?;
                Ok(RemovalOutcome::Deleted)
            }
        }
    }
}
