//! Record-store client traits for dependency injection

use async_trait::async_trait;

use shared::{ApiFailure, DestinationRef, EntityRef, EntityType, FilterCriteria, SourceId, SourceRecord};
use crate::types::{CreatedRecord, DestinationRecord, RemovalOutcome, SourcePage};

/// Read-only access to the source record store
#[mockall::automock]
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Fetch one page of records matching the criteria; `None` requests the first page
    async fn fetch_page(
        &self,
        entity_type: EntityType,
        criteria: &FilterCriteria,
        page_token: Option<String>,
    ) -> Result<SourcePage, ApiFailure>;

    /// Fetch records by id; missing ids are silently absent from the result
    async fn fetch_by_ids(&self, entity_type: EntityType, ids: &[SourceId]) -> Result<Vec<SourceRecord>, ApiFailure>;

    /// Fetch dependent records (tasks or notes) attached to a parent
    async fn fetch_children(&self, parent: &EntityRef, child_type: EntityType) -> Result<Vec<SourceRecord>, ApiFailure>;
}

/// Mutating access to the destination record store
#[mockall::automock]
#[async_trait]
pub trait DestinationClient: Send + Sync {
    /// Create records in one call. The result is order-preserving and `None`
    /// at an index marks a per-record failure inside an otherwise accepted call.
    async fn create_batch(
        &self,
        entity_type: EntityType,
        records: &[DestinationRecord],
    ) -> Result<Vec<Option<CreatedRecord>>, ApiFailure>;

    /// Attach already-created records to a parent record
    async fn link_entities(&self, parent: &DestinationRef, links: &[DestinationRef]) -> Result<(), ApiFailure>;

    /// Remove a record, or archive it where the destination forbids deletion
    async fn delete_or_archive(
        &self,
        target: &DestinationRef,
        parent: Option<DestinationRef>,
    ) -> Result<RemovalOutcome, ApiFailure>;
}
