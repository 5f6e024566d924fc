//! JSON documents under a state directory, replaced atomically on every save

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use shared::{component_debug, BatchConfig, FieldMapping, RunState, StageMapping};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::core::{BlockedAttemptLog, IdentityIndex, Mappings};
use crate::error::{MigratorError, MigratorResult};
use crate::traits::StateStore;

pub const INDEX_FILE: &str = "migration_index.json";
pub const BLOCKED_FILE: &str = "blocked_attempts.json";
pub const BATCH_CONFIG_FILE: &str = "batch_config.json";
pub const LAST_RUN_FILE: &str = "last_run.json";
pub const STAGE_MAPPING_FILE: &str = "stage_mapping.json";
pub const FIELD_MAPPING_FILE: &str = "field_mapping.json";
pub const RUN_LOCK_FILE: &str = "run.lock";

const COMPONENT: &str = "state-store";

pub struct JsonStateStore {
    state_dir: PathBuf,
}

impl JsonStateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn path(&self, name: &str) -> PathBuf {
        self.state_dir.join(name)
    }

    async fn read_optional<T: DeserializeOwned>(&self, name: &str) -> MigratorResult<Option<T>> {
        let path = self.path(name);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(MigratorError::state(path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| MigratorError::state(path, e))
    }

    /// Write `<name>.tmp`, fsync, then rename over the target
    async fn write_atomic<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> MigratorResult<()> {
        let path = self.path(name);
        let tmp_path = self.path(&format!("{name}.tmp"));
        let body = serde_json::to_vec_pretty(value)?;

        fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|e| MigratorError::state(&self.state_dir, e))?;

        let mut file = fs::File::create(&tmp_path)
            .await
            .map_err(|e| MigratorError::state(&tmp_path, e))?;
        file.write_all(&body)
            .await
            .map_err(|e| MigratorError::state(&tmp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| MigratorError::state(&tmp_path, e))?;
        drop(file);

        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| MigratorError::state(&path, e))?;
        component_debug!(COMPONENT, file = name, bytes = body.len(), "Document written");
        Ok(())
    }

    /// Remove a document; a missing file is not an error
    pub async fn remove(&self, name: &str) -> MigratorResult<()> {
        let path = self.path(name);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MigratorError::state(path, e)),
        }
    }

    pub async fn save_stage_mapping(&self, mapping: &StageMapping) -> MigratorResult<()> {
        self.write_atomic(STAGE_MAPPING_FILE, mapping).await
    }

    pub async fn save_field_mapping(&self, mapping: &FieldMapping) -> MigratorResult<()> {
        self.write_atomic(FIELD_MAPPING_FILE, mapping).await
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load_index(&self) -> MigratorResult<IdentityIndex> {
        Ok(self.read_optional(INDEX_FILE).await?.unwrap_or_default())
    }

    async fn save_index(&self, index: &IdentityIndex) -> MigratorResult<()> {
        self.write_atomic(INDEX_FILE, index).await
    }

    async fn load_blocked(&self) -> MigratorResult<BlockedAttemptLog> {
        Ok(self.read_optional(BLOCKED_FILE).await?.unwrap_or_default())
    }

    async fn save_blocked(&self, log: &BlockedAttemptLog) -> MigratorResult<()> {
        self.write_atomic(BLOCKED_FILE, log).await
    }

    async fn load_batch_config(&self) -> MigratorResult<BatchConfig> {
        Ok(self.read_optional(BATCH_CONFIG_FILE).await?.unwrap_or_default())
    }

    async fn save_batch_config(&self, config: &BatchConfig) -> MigratorResult<()> {
        self.write_atomic(BATCH_CONFIG_FILE, config).await
    }

    async fn load_last_run(&self) -> MigratorResult<Option<RunState>> {
        self.read_optional(LAST_RUN_FILE).await
    }

    async fn save_last_run(&self, run: &RunState) -> MigratorResult<()> {
        self.write_atomic(LAST_RUN_FILE, run).await
    }

    async fn load_mappings(&self) -> MigratorResult<Mappings> {
        Ok(Mappings {
            stages: self.read_optional(STAGE_MAPPING_FILE).await?,
            fields: self.read_optional(FIELD_MAPPING_FILE).await?,
        })
    }

    async fn acquire_run_lock(&self, run_id: Uuid) -> MigratorResult<()> {
        fs::create_dir_all(&self.state_dir)
            .await
            .map_err(|e| MigratorError::state(&self.state_dir, e))?;
        let lock_path = self.path(RUN_LOCK_FILE);
        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&lock_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(MigratorError::AlreadyRunning { lock_path });
            }
            Err(e) => return Err(MigratorError::state(lock_path, e)),
        };
        file.write_all(run_id.to_string().as_bytes())
            .await
            .map_err(|e| MigratorError::state(&lock_path, e))?;
        Ok(())
    }

    async fn release_run_lock(&self) -> MigratorResult<()> {
        self.remove(RUN_LOCK_FILE).await
    }
}
