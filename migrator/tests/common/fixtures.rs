//! Test fixtures and source data for migrator tests

use serde_json::json;
use shared::{EntityRef, EntityType, SourceRecord};

/// Standard test data
pub struct TestFixtures;

impl TestFixtures {
    pub const OWNER: &'static str = "77";
    pub const OTHER_OWNER: &'static str = "88";
    pub const STAGE: &'static str = "4001";
    pub const MAPPED_STAGE: &'static str = "9001";
    pub const SHARED_COMPANY: &'static str = "co-1";
    pub const PAGE_SIZE: usize = 10;
    pub const ELIGIBLE: usize = 25;

    /// Lead `n`, owned by `OWNER`, linked to contact `c{n}` and the shared company
    pub fn lead(n: usize) -> SourceRecord {
        let mut lead = SourceRecord::new(EntityType::Leads, format!("L{n}"));
        lead.owner_id = Some(Self::OWNER.to_string());
        lead.stage_id = Some(Self::STAGE.to_string());
        lead.links = vec![
            EntityRef::new(EntityType::Contacts, format!("c{n}")),
            EntityRef::new(EntityType::Companies, Self::SHARED_COMPANY),
        ];
        lead.attributes = json!({ "name": format!("Deal {n}"), "price": 100 * n });
        lead
    }

    pub fn leads(count: usize) -> Vec<SourceRecord> {
        (0..count).map(Self::lead).collect()
    }

    pub fn contact(id: &str) -> SourceRecord {
        let mut contact = SourceRecord::new(EntityType::Contacts, id);
        contact.attributes = json!({ "name": format!("Contact {id}") });
        contact
    }

    pub fn company(id: &str) -> SourceRecord {
        let mut company = SourceRecord::new(EntityType::Companies, id);
        company.attributes = json!({ "name": format!("Company {id}") });
        company
    }

    pub fn note(id: &str, parent: EntityRef) -> SourceRecord {
        let mut note = SourceRecord::new(EntityType::Notes, id);
        note.parent = Some(parent);
        note.attributes = json!({ "note_type": "common", "params": { "text": format!("note {id}") } });
        note
    }

    pub fn task(id: &str, parent: EntityRef) -> SourceRecord {
        let mut task = SourceRecord::new(EntityType::Tasks, id);
        task.parent = Some(parent);
        task.attributes = json!({ "text": format!("task {id}"), "complete_till": 1_900_000_000 });
        task
    }
}
