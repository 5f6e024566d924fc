//! Operator commands that only touch persisted state

use serde::Serialize;
use shared::{component_info, component_warn, BatchConfig, RunState};
use std::future::Future;
use uuid::Uuid;

use crate::core::{BlockedAttempt, IndexStats};
use crate::error::{MigratorError, MigratorResult};
use crate::traits::StateStore;

const COMPONENT: &str = "operator";

/// Operator view of the persisted state
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub batch_config: BatchConfig,
    pub index: IndexStats,
    pub last_run: Option<RunState>,
}

/// Run `op` while holding the run lock, so it never overlaps a batch
async fn with_run_lock<St, R, F>(store: &St, op: F) -> MigratorResult<R>
where
    St: StateStore,
    F: Future<Output = MigratorResult<R>>,
{
    store.acquire_run_lock(Uuid::new_v4()).await?;
    let result = op.await;
    if let Err(e) = store.release_run_lock().await {
        component_warn!(COMPONENT, "Failed to release run lock: {}", e);
    }
    result
}

/// Move the cursor back to the start of the eligible set
pub async fn reset_offset<St: StateStore>(store: &St) -> MigratorResult<BatchConfig> {
    with_run_lock(store, async {
        let mut config = store.load_batch_config().await?;
        config.offset = 0;
        store.save_batch_config(&config).await?;
        component_info!(COMPONENT, "Offset reset to 0");
        Ok(config)
    })
    .await
}

/// Forget every transferred record. Irreversible; returns the counts that were dropped.
pub async fn reset_index<St: StateStore>(store: &St) -> MigratorResult<IndexStats> {
    with_run_lock(store, async {
        let mut index = store.load_index().await?;
        let blocked = store.load_blocked().await?;
        let before = index.stats(&blocked);
        index.reset();
        store.save_index(&index).await?;
        component_warn!(COMPONENT, previous = ?before.migrated, "Identity index wiped");
        Ok(before)
    })
    .await
}

/// Update filter criteria and page size; the offset is kept
pub async fn configure<St: StateStore>(
    store: &St,
    owner_ids: Option<Vec<String>>,
    page_size: Option<usize>,
) -> MigratorResult<BatchConfig> {
    if page_size == Some(0) {
        return Err(MigratorError::configuration("page_size", "must be at least 1"));
    }
    with_run_lock(store, async {
        let mut config = store.load_batch_config().await?;
        if let Some(owner_ids) = owner_ids {
            if owner_ids != config.filter.owner_ids && config.offset > 0 {
                component_warn!(
                    COMPONENT,
                    offset = config.offset,
                    "Filter changed with a non-zero offset; the offset now counts a different eligible set"
                );
            }
            config.filter.owner_ids = owner_ids;
        }
        if let Some(page_size) = page_size {
            config.page_size = page_size;
        }
        store.save_batch_config(&config).await?;
        Ok(config)
    })
    .await
}

pub async fn status<St: StateStore>(store: &St) -> MigratorResult<StatusReport> {
    let index = store.load_index().await?;
    let blocked = store.load_blocked().await?;
    Ok(StatusReport {
        batch_config: store.load_batch_config().await?,
        index: index.stats(&blocked),
        last_run: store.load_last_run().await?,
    })
}

/// Most recent blocked attempts, newest first
pub async fn blocked_attempts<St: StateStore>(store: &St, limit: usize) -> MigratorResult<Vec<BlockedAttempt>> {
    Ok(store.load_blocked().await?.recent(limit))
}
