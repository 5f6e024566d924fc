//! Tests for HttpDestinationClient

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared::{ApiFailure, DestinationRef, EntityType, SourceId};
use crate::services::http_destination::{HttpDestinationClient, MIXED_CREATE_PATHS_BLOCKED};
use crate::traits::DestinationClient;
use crate::types::{DestinationRecord, RemovalOutcome};
use super::endpoint;

fn record(entity_type: EntityType, source: &str, parent: Option<DestinationRef>) -> DestinationRecord {
    DestinationRecord {
        source_id: SourceId::from(source),
        entity_type,
        parent,
        payload: json!({ "name": format!("from {source}") }),
    }
}

#[tokio::test]
async fn test_create_batch_preserves_order_with_gaps() {
    let server = MockServer::start().await;
    // Second record rejected inside an accepted call; response order shuffled
    Mock::given(method("POST"))
        .and(path("/api/v4/companies"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": { "companies": [
                {"id": 503, "request_id": "2"},
                {"id": 501, "request_id": "0"}
            ]}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpDestinationClient::new(endpoint(&server)).unwrap();
    let records = vec![
        record(EntityType::Companies, "a", None),
        record(EntityType::Companies, "b", None),
        record(EntityType::Companies, "c", None),
    ];
    let created = client.create_batch(EntityType::Companies, &records).await.unwrap();

    assert_eq!(created.len(), 3);
    assert_eq!(created[0].as_ref().unwrap().id.as_str(), "501");
    assert!(created[1].is_none());
    assert_eq!(created[2].as_ref().unwrap().id.as_str(), "503");
}

#[tokio::test]
async fn test_notes_post_to_their_parent_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v4/contacts/notes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "_embedded": { "notes": [{"id": 2, "request_id": "0"}, {"id": 3, "request_id": "1"}] }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpDestinationClient::new(endpoint(&server)).unwrap();
    let records = vec![
        record(EntityType::Notes, "n1", Some(DestinationRef::new(EntityType::Contacts, "200"))),
        record(EntityType::Notes, "n2", Some(DestinationRef::new(EntityType::Contacts, "201"))),
    ];
    let created = client.create_batch(EntityType::Notes, &records).await.unwrap();

    assert_eq!(created[0].as_ref().unwrap().id.as_str(), "2");
    assert_eq!(created[1].as_ref().unwrap().id.as_str(), "3");
}

/// Records bound for two endpoints would need two writes; nothing is sent
#[tokio::test]
async fn test_mixed_parent_types_are_refused_before_any_write() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "_embedded": { "notes": [] } })))
        .expect(0)
        .mount(&server)
        .await;
    let client = HttpDestinationClient::new(endpoint(&server)).unwrap();
    let records = vec![
        record(EntityType::Notes, "n1", Some(DestinationRef::new(EntityType::Leads, "100"))),
        record(EntityType::Notes, "n2", Some(DestinationRef::new(EntityType::Contacts, "200"))),
    ];

    // Act
    let err = client.create_batch(EntityType::Notes, &records).await.unwrap_err();

    // Assert
    match err {
        ApiFailure::SafetyViolation { code, .. } => assert_eq!(code, MIXED_CREATE_PATHS_BLOCKED),
        other => panic!("expected safety violation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_client_error_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v4/leads"))
        .respond_with(ResponseTemplate::new(400).set_body_string("validation failed"))
        .mount(&server)
        .await;

    let client = HttpDestinationClient::new(endpoint(&server)).unwrap();
    let err = client
        .create_batch(EntityType::Leads, &[record(EntityType::Leads, "1", None)])
        .await
        .unwrap_err();
    assert!(matches!(err, ApiFailure::ClientError { status: 400, .. }));
}

#[tokio::test]
async fn test_link_entities_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v4/leads/100/link"))
        .and(body_json(json!([
            {"to_entity_id": 200, "to_entity_type": "contacts"},
            {"to_entity_id": 300, "to_entity_type": "companies"}
        ])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpDestinationClient::new(endpoint(&server)).unwrap();
    client
        .link_entities(
            &DestinationRef::new(EntityType::Leads, "100"),
            &[
                DestinationRef::new(EntityType::Contacts, "200"),
                DestinationRef::new(EntityType::Companies, "300"),
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_leads_are_archived_not_deleted() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/v4/leads"))
        .and(body_json(json!([{"id": 100, "status_id": 143}])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpDestinationClient::new(endpoint(&server)).unwrap();
    let outcome = client
        .delete_or_archive(&DestinationRef::new(EntityType::Leads, "100"), None)
        .await
        .unwrap();
    assert_eq!(outcome, RemovalOutcome::Archived);
}

#[tokio::test]
async fn test_delete_missing_contact_reports_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v4/contacts/200"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = HttpDestinationClient::new(endpoint(&server)).unwrap();
    let err = client
        .delete_or_archive(&DestinationRef::new(EntityType::Contacts, "200"), None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_note_removal_requires_parent() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/v4/leads/100/notes/7"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpDestinationClient::new(endpoint(&server)).unwrap();
    let note = DestinationRef::new(EntityType::Notes, "7");

    assert!(client.delete_or_archive(&note, None).await.is_err());
    let outcome = client
        .delete_or_archive(&note, Some(DestinationRef::new(EntityType::Leads, "100")))
        .await
        .unwrap();
    assert_eq!(outcome, RemovalOutcome::Deleted);
}
