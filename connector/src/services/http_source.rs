//! Read-only HTTP client for the source record store

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;

use shared::{ApiFailure, EntityRef, EntityType, FilterCriteria, SourceId, SourceRecord};
use crate::error::ConnectorResult;
use crate::services::http::{self, EndpointConfig};
use crate::traits::SourceClient;
use crate::types::SourcePage;

/// Listing page size accepted by the source API
pub const SOURCE_PAGE_LIMIT: usize = 250;
/// Ids per `filter[id]` lookup
const ID_LOOKUP_CHUNK: usize = 50;

pub const SOURCE_WRITE_BLOCKED: &str = "SOURCE_WRITE_BLOCKED";

pub struct HttpSourceClient {
    client: reqwest::Client,
    config: EndpointConfig,
    page_limit: usize,
}

impl HttpSourceClient {
    pub fn new(config: EndpointConfig) -> ConnectorResult<Self> {
        Ok(Self {
            client: http::build_client(&config)?,
            config,
            page_limit: SOURCE_PAGE_LIMIT,
        })
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    /// Refuse anything that could mutate the source store
    pub fn guard_method(method: &Method) -> Result<(), ApiFailure> {
        if *method == Method::GET || *method == Method::HEAD {
            Ok(())
        } else {
            Err(ApiFailure::SafetyViolation {
                code: SOURCE_WRITE_BLOCKED.to_string(),
                operation: format!("{method} on source store"),
            })
        }
    }

    async fn request(&self, method: Method, path: &str, query: &[(String, String)]) -> Result<Option<Value>, ApiFailure> {
        Self::guard_method(&method)?;
        let url = self.config.api_url(path)?;
        let response = self
            .client
            .request(method, url)
            .query(query)
            .send()
            .await
            .map_err(http::network_failure)?;
        http::read_json(response).await
    }

    async fn get(&self, path: &str, query: &[(String, String)]) -> Result<Option<Value>, ApiFailure> {
        self.request(Method::GET, path, query).await
    }

    fn with_param(entity_type: EntityType) -> Option<&'static str> {
        match entity_type {
            EntityType::Leads => Some("contacts,companies"),
            EntityType::Contacts => Some("leads"),
            _ => None,
        }
    }
}

/// Interpret one source item. `parent` overrides the embedded parent reference
/// when the item was fetched through its parent's endpoint.
pub fn parse_source_record(entity_type: EntityType, item: Value, parent: Option<&EntityRef>) -> Result<SourceRecord, ApiFailure> {
    let id = http::source_id_of(&item)
        .ok_or_else(|| ApiFailure::InvalidResponse(format!("{entity_type} item without id")))?;

    let mut record = SourceRecord::new(entity_type, id);
    record.owner_id = item.get("responsible_user_id").and_then(http::id_string);
    record.stage_id = item.get("status_id").and_then(http::id_string);

    record.parent = match parent {
        Some(p) => Some(p.clone()),
        None => {
            let parent_type = item
                .get("entity_type")
                .and_then(Value::as_str)
                .and_then(|t| t.parse::<EntityType>().ok());
            let parent_id = item.get("entity_id").and_then(http::id_string);
            match (parent_type, parent_id) {
                (Some(t), Some(id)) => Some(EntityRef::new(t, id)),
                _ => None,
            }
        }
    };

    if let Some(embedded) = item.get("_embedded") {
        for linked_type in [EntityType::Contacts, EntityType::Companies] {
            let linked = embedded.get(linked_type.as_str()).and_then(Value::as_array);
            for link in linked.into_iter().flatten() {
                if let Some(link_id) = link.get("id").and_then(http::id_string) {
                    record.links.push(EntityRef::new(linked_type, link_id));
                }
            }
        }
    }

    record.attributes = item;
    Ok(record)
}

fn parse_items(entity_type: EntityType, items: Vec<Value>, parent: Option<&EntityRef>) -> Result<Vec<SourceRecord>, ApiFailure> {
    items
        .into_iter()
        .map(|item| parse_source_record(entity_type, item, parent))
        .collect()
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn fetch_page(
        &self,
        entity_type: EntityType,
        criteria: &FilterCriteria,
        page_token: Option<String>,
    ) -> Result<SourcePage, ApiFailure> {
        let page: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| ApiFailure::InvalidResponse(format!("bad page token {token}")))?,
            None => 1,
        };

        let mut query = vec![
            ("page".to_string(), page.to_string()),
            ("limit".to_string(), self.page_limit.to_string()),
        ];
        if let Some(with) = Self::with_param(entity_type) {
            query.push(("with".to_string(), with.to_string()));
        }
        for owner in &criteria.owner_ids {
            query.push(("filter[responsible_user_id][]".to_string(), owner.clone()));
        }

        let body = self.get(entity_type.as_str(), &query).await?;
        let items = http::embedded_items(body.as_ref(), entity_type.as_str());
        let full_page = items.len() >= self.page_limit;
        let records = parse_items(entity_type, items, None)?;

        Ok(SourcePage {
            records,
            next_page: full_page.then(|| (page + 1).to_string()),
        })
    }

    async fn fetch_by_ids(&self, entity_type: EntityType, ids: &[SourceId]) -> Result<Vec<SourceRecord>, ApiFailure> {
        let mut records = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
            let mut query = vec![("limit".to_string(), self.page_limit.to_string())];
            if let Some(with) = Self::with_param(entity_type) {
                query.push(("with".to_string(), with.to_string()));
            }
            query.extend(chunk.iter().map(|id| ("filter[id][]".to_string(), id.to_string())));

            let body = self.get(entity_type.as_str(), &query).await?;
            let items = http::embedded_items(body.as_ref(), entity_type.as_str());
            records.extend(parse_items(entity_type, items, None)?);
        }
        Ok(records)
    }

    /// Every child of `parent`, read page by page until a short page comes back
    async fn fetch_children(&self, parent: &EntityRef, child_type: EntityType) -> Result<Vec<SourceRecord>, ApiFailure> {
        let (path, filters) = match child_type {
            EntityType::Notes => (format!("{}/{}/notes", parent.entity_type, parent.id), Vec::new()),
            EntityType::Tasks => (
                "tasks".to_string(),
                vec![
                    ("filter[entity_type]".to_string(), parent.entity_type.to_string()),
                    ("filter[entity_id]".to_string(), parent.id.to_string()),
                ],
            ),
            other => {
                return Err(ApiFailure::InvalidResponse(format!("{other} are not child records")));
            }
        };

        let mut records = Vec::new();
        let mut page = 1usize;
        loop {
            let mut query = filters.clone();
            query.push(("page".to_string(), page.to_string()));
            query.push(("limit".to_string(), self.page_limit.to_string()));

            let body = self.get(&path, &query).await?;
            let items = http::embedded_items(body.as_ref(), child_type.as_str());
            let full_page = items.len() >= self.page_limit;
            records.extend(parse_items(child_type, items, Some(parent))?);
            if !full_page {
                break;
            }
            page += 1;
        }
        Ok(records)
    }
}
