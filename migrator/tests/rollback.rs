//! Rollback of the last run against in-memory record stores

use connector::RemovalOutcome;
use migrator::{MigratorError, StateStore};
use shared::{EntityRef, EntityType, RunStatus};
use uuid::Uuid;

mod common;
use common::{MigratorBuilder, TestFixtures, TestHarness, TestHelpers};

/// Harness with one task and one note under lead L9
async fn harness_with_children() -> TestHarness {
    MigratorBuilder::new()
        .with_source(|s| {
            let lead = EntityRef::new(EntityType::Leads, "L9");
            s.add_child(&lead, TestFixtures::task("t1", lead.clone()));
            s.add_child(&lead, TestFixtures::note("n1", lead.clone()));
        })
        .build()
        .await
}

#[tokio::test]
async fn test_rollback_batch_undoes_whole_run() {
    // Arrange
    let harness = harness_with_children().await;
    harness.migrator().start_batch().await.unwrap();

    // Act
    let report = harness.migrator().rollback_batch().await.unwrap();

    // Assert
    assert_eq!(report.run.status, RunStatus::Idle);
    assert_eq!(report.removed[&EntityType::Leads], 10);
    assert_eq!(report.removed[&EntityType::Contacts], 10);
    assert_eq!(report.removed[&EntityType::Companies], 1);
    assert_eq!(report.removed[&EntityType::Tasks], 1);
    assert_eq!(report.removed[&EntityType::Notes], 1);
    assert_eq!(report.archived, 11);
    assert_eq!(report.failed, 0);
    assert_eq!(report.offset_decrement, 10);
    assert!(report.run.created.is_empty());

    assert_eq!(harness.config().await.offset, 0);
    let index = harness.index().await;
    for entity_type in EntityType::CREATION_ORDER {
        assert_eq!(index.len(entity_type), 0, "{entity_type} left in index");
    }
    assert!(harness.destination().live.is_empty());
}

/// Dependents go first, companies last
#[tokio::test]
async fn test_rollback_follows_reverse_dependency_order() {
    let harness = harness_with_children().await;
    harness.migrator().start_batch().await.unwrap();

    harness.migrator().rollback_batch().await.unwrap();

    let destination = harness.destination();
    let mut order: Vec<EntityType> = destination.removals.iter().map(|(t, _, _)| *t).collect();
    order.dedup();
    assert_eq!(order, EntityType::ROLLBACK_ORDER.to_vec());
    assert!(destination
        .removals
        .iter()
        .filter(|(t, _, _)| *t == EntityType::Companies)
        .all(|(_, _, outcome)| *outcome == RemovalOutcome::Deleted));
}

#[tokio::test]
async fn test_rerun_after_rollback_recreates_slice() {
    // Arrange
    let harness = MigratorBuilder::new().build().await;
    harness.migrator().start_batch().await.unwrap();
    harness.migrator().rollback_batch().await.unwrap();

    // Act
    let run = harness.migrator().start_batch().await.unwrap();

    // Assert
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.stats.counts(EntityType::Leads).created, 10);
    assert_eq!(run.stats.counts(EntityType::Leads).skipped, 0);
    assert_eq!(harness.destination().live_count(EntityType::Leads), 10);
    assert_eq!(harness.destination().created_count(EntityType::Leads), 20);
    assert_eq!(harness.config().await.offset, 10);
}

/// Records created by earlier runs are outside the ledger and stay put
#[tokio::test]
async fn test_rollback_leaves_earlier_runs_alone() {
    // Arrange
    let harness = MigratorBuilder::new().build().await;
    harness.migrator().start_batch().await.unwrap();
    harness.migrator().start_batch().await.unwrap();

    // Act
    let report = harness.migrator().rollback_batch().await.unwrap();

    // Assert
    assert_eq!(report.removed[&EntityType::Leads], 10);
    assert!(!report.removed.contains_key(&EntityType::Companies));
    assert_eq!(harness.config().await.offset, 10);

    let index = harness.index().await;
    assert_eq!(index.len(EntityType::Leads), 10);
    assert!(index.contains(EntityType::Leads, &TestHelpers::lead_source(0)));
    assert!(!index.contains(EntityType::Leads, &TestHelpers::lead_source(10)));
    assert_eq!(index.len(EntityType::Companies), 1);

    let destination = harness.destination();
    assert_eq!(destination.live_count(EntityType::Leads), 10);
    assert_eq!(destination.live_count(EntityType::Companies), 1);
}

#[tokio::test]
async fn test_record_already_gone_counts_as_removed() {
    // Arrange
    let harness = MigratorBuilder::new().build().await;
    harness.migrator().start_batch().await.unwrap();
    {
        let mut destination = harness.destination();
        let id = destination.destination_of(EntityType::Leads, "L5").unwrap();
        destination.live.remove(&(EntityType::Leads, id));
    }

    // Act
    let report = harness.migrator().rollback_batch().await.unwrap();

    // Assert
    assert_eq!(report.run.status, RunStatus::Idle);
    assert_eq!(report.already_absent, 1);
    assert_eq!(report.removed[&EntityType::Leads], 10);
    assert_eq!(harness.index().await.len(EntityType::Leads), 0);
}

/// A failed removal is reported, kept in the ledger and retried by the next rollback
#[tokio::test]
async fn test_failed_removal_keeps_entry_for_retry() {
    // Arrange
    let harness = MigratorBuilder::new().build().await;
    harness.migrator().start_batch().await.unwrap();
    let stuck = harness.destination().destination_of(EntityType::Leads, "L2").unwrap();
    harness.destination().fail_removals.insert(stuck.clone());

    // Act
    let report = harness.migrator().rollback_batch().await.unwrap();

    // Assert
    assert_eq!(report.run.status, RunStatus::Error);
    assert_eq!(report.failed, 1);
    assert_eq!(report.run.errors.len(), 1);
    assert!(report.run.errors[0].message.contains(stuck.as_str()));
    assert_eq!(report.removed[&EntityType::Leads], 9);
    assert_eq!(report.removed[&EntityType::Contacts], 10);
    assert_eq!(report.offset_decrement, 9);
    assert_eq!(harness.config().await.offset, 1);
    assert!(harness.index().await.contains(EntityType::Leads, &TestHelpers::lead_source(2)));

    let last_run = harness.store().load_last_run().await.unwrap().unwrap();
    assert_eq!(last_run.status, RunStatus::Error);
    assert_eq!(last_run.created.len(), 1);
    assert!(last_run.created.contains(EntityType::Leads, &stuck));

    // Act: the destination allows the removal again
    harness.destination().fail_removals.clear();
    let retry = harness.migrator().rollback_batch().await.unwrap();

    // Assert
    assert_eq!(retry.run.status, RunStatus::Idle);
    assert!(retry.run.errors.is_empty());
    assert_eq!(retry.removed[&EntityType::Leads], 1);
    assert_eq!(harness.config().await.offset, 0);
    assert_eq!(harness.index().await.len(EntityType::Leads), 0);
}

#[tokio::test]
async fn test_rollback_last_lead_takes_its_dependents() {
    // Arrange
    let harness = harness_with_children().await;
    harness.migrator().start_batch().await.unwrap();

    // Act
    let report = harness.migrator().rollback_last(EntityType::Leads).await.unwrap();

    // Assert
    assert_eq!(report.run.status, RunStatus::Idle);
    assert_eq!(report.removed[&EntityType::Leads], 1);
    assert_eq!(report.removed[&EntityType::Tasks], 1);
    assert_eq!(report.removed[&EntityType::Notes], 1);
    assert!(!report.removed.contains_key(&EntityType::Contacts));
    assert_eq!(report.offset_decrement, 1);
    assert_eq!(harness.config().await.offset, 9);

    let index = harness.index().await;
    assert_eq!(index.len(EntityType::Leads), 9);
    assert!(!index.contains(EntityType::Leads, &TestHelpers::lead_source(9)));
    assert_eq!(index.len(EntityType::Contacts), 10);
    assert_eq!(report.run.created.count(EntityType::Leads), 9);

    // The next slice starts at the removed lead
    harness.migrator().start_batch().await.unwrap();
    assert!(harness.index().await.contains(EntityType::Leads, &TestHelpers::lead_source(9)));
    assert_eq!(harness.config().await.offset, 19);
}

#[tokio::test]
async fn test_rollback_last_rejects_dependent_types() {
    let harness = harness_with_children().await;
    harness.migrator().start_batch().await.unwrap();

    let result = harness.migrator().rollback_last(EntityType::Tasks).await;

    assert!(matches!(result, Err(MigratorError::Configuration { .. })));
    assert_eq!(harness.destination().removals.len(), 0);
}

#[tokio::test]
async fn test_nothing_to_roll_back_on_fresh_state() {
    let harness = MigratorBuilder::new().build().await;

    let result = harness.migrator().rollback_batch().await;

    assert!(matches!(result, Err(MigratorError::NothingToRollback)));
}

#[tokio::test]
async fn test_second_rollback_finds_nothing() {
    let harness = MigratorBuilder::new().build().await;
    harness.migrator().start_batch().await.unwrap();
    harness.migrator().rollback_batch().await.unwrap();

    let result = harness.migrator().rollback_batch().await;

    assert!(matches!(result, Err(MigratorError::NothingToRollback)));
    assert_eq!(harness.config().await.offset, 0);
}

#[tokio::test]
async fn test_rollback_refused_while_lock_is_held() {
    let harness = MigratorBuilder::new().build().await;
    harness.migrator().start_batch().await.unwrap();
    harness.store().acquire_run_lock(Uuid::new_v4()).await.unwrap();

    let result = harness.migrator().rollback_batch().await;

    assert!(matches!(result, Err(MigratorError::AlreadyRunning { .. })));
    assert_eq!(harness.destination().live_count(EntityType::Leads), 10);
}
