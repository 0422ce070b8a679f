//! In-process persistent store.
//!
//! Mirrors the rest of this codebase's approach to persistence: shared
//! mutable state guarded by a lock, with a snapshot written to disk on
//! every mutation using an atomic write-temp-then-rename, so a restarted
//! process reloads the latest committed state instead of starting empty.
//! No external database dependency is introduced.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::errors::{StoreError, StoreResult};
use super::Store;
use crate::domain::{Candidate, CandidateStatus, Migration, RunHistory, StepEvent};

const SNAPSHOT_FILE_NAME: &str = "loom_store.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    migrations: HashMap<String, Migration>,
    candidates: HashMap<String, HashMap<String, Candidate>>,
    events: Vec<StepEvent>,
    run_histories: HashMap<String, RunHistory>,
}

/// In-memory store with optional snapshot-to-disk durability.
pub struct InMemoryStore {
    inner: RwLock<StoreData>,
    data_dir: Option<PathBuf>,
}

impl InMemoryStore {
    /// Creates an ephemeral store with no on-disk durability. Useful for
    /// tests and for the dry-run-only code paths that never need to
    /// survive a restart.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreData::default()),
            data_dir: None,
        }
    }

    /// Creates a store backed by a snapshot file under `data_dir`,
    /// loading any existing snapshot synchronously at construction time.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let data_dir = data_dir.into();
        let data = load_snapshot(&data_dir)?.unwrap_or_default();
        Ok(Self {
            inner: RwLock::new(data),
            data_dir: Some(data_dir),
        })
    }

    async fn persist(&self) -> StoreResult<()> {
        let Some(data_dir) = self.data_dir.clone() else {
            return Ok(());
        };
        let snapshot = {
            let data = self.inner.read().expect("store lock poisoned");
            serde_json::to_string_pretty(&*data).map_err(|e| StoreError::SnapshotIo {
                message: e.to_string(),
            })?
        };

        tokio::task::spawn_blocking(move || write_snapshot_atomically(&data_dir, &snapshot))
            .await
            .map_err(|e| StoreError::SnapshotIo {
                message: e.to_string(),
            })?
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SNAPSHOT_FILE_NAME)
}

fn load_snapshot(data_dir: &Path) -> StoreResult<Option<StoreData>> {
    let path = snapshot_path(data_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path).map_err(|e| StoreError::SnapshotIo {
        message: e.to_string(),
    })?;
    let data = serde_json::from_str(&content).map_err(|e| StoreError::SnapshotIo {
        message: e.to_string(),
    })?;
    Ok(Some(data))
}

fn write_snapshot_atomically(data_dir: &Path, content: &str) -> StoreResult<()> {
    std::fs::create_dir_all(data_dir).map_err(|e| StoreError::SnapshotIo {
        message: e.to_string(),
    })?;
    let path = snapshot_path(data_dir);
    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, content).map_err(|e| StoreError::SnapshotIo {
        message: e.to_string(),
    })?;
    std::fs::rename(&temp_path, &path).map_err(|e| StoreError::SnapshotIo {
        message: e.to_string(),
    })?;
    Ok(())
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_migration(&self, mut migration: Migration) -> StoreResult<()> {
        {
            let mut data = self.inner.write().expect("store lock poisoned");
            if let Some(existing) = data.migrations.get(&migration.id) {
                migration.created_at = existing.created_at;
            }
            data.candidates.entry(migration.id.clone()).or_default();
            data.migrations.insert(migration.id.clone(), migration);
        }
        self.persist().await
    }

    async fn get_migration(&self, migration_id: &str) -> StoreResult<Migration> {
        let data = self.inner.read().expect("store lock poisoned");
        data.migrations
            .get(migration_id)
            .cloned()
            .ok_or_else(|| StoreError::MigrationNotFound {
                migration_id: migration_id.to_string(),
            })
    }

    async fn list_migrations(&self) -> StoreResult<Vec<Migration>> {
        let data = self.inner.read().expect("store lock poisoned");
        let mut migrations: Vec<Migration> = data.migrations.values().cloned().collect();
        migrations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(migrations)
    }

    async fn delete_migration(&self, migration_id: &str) -> StoreResult<()> {
        {
            let mut data = self.inner.write().expect("store lock poisoned");
            if !data.migrations.contains_key(migration_id) {
                return Err(StoreError::MigrationNotFound {
                    migration_id: migration_id.to_string(),
                });
            }
            if let Some(table) = data.candidates.get(migration_id) {
                if table.values().any(|c| c.status == CandidateStatus::Running) {
                    return Err(StoreError::MigrationHasRunningCandidates {
                        migration_id: migration_id.to_string(),
                    });
                }
            }
            data.migrations.remove(migration_id);
            data.candidates.remove(migration_id);
        }
        self.persist().await
    }

    async fn set_candidate_status(
        &self,
        migration_id: &str,
        candidate_id: &str,
        status: CandidateStatus,
    ) -> StoreResult<()> {
        {
            let mut data = self.inner.write().expect("store lock poisoned");
            let candidate = data
                .candidates
                .get_mut(migration_id)
                .and_then(|table| table.get_mut(candidate_id))
                .ok_or_else(|| StoreError::CandidateNotFound {
                    migration_id: migration_id.to_string(),
                    candidate_id: candidate_id.to_string(),
                })?;
            candidate.status = status;
        }
        self.persist().await
    }

    async fn save_candidates(&self, migration_id: &str, incoming: Vec<Candidate>) -> StoreResult<()> {
        {
            let mut data = self.inner.write().expect("store lock poisoned");
            if !data.migrations.contains_key(migration_id) {
                return Err(StoreError::MigrationNotFound {
                    migration_id: migration_id.to_string(),
                });
            }
            let table = data.candidates.entry(migration_id.to_string()).or_default();

            for mut candidate in incoming {
                candidate.migration_id = Some(migration_id.to_string());

                match table.get(&candidate.id) {
                    Some(existing)
                        if matches!(
                            existing.status,
                            CandidateStatus::Running | CandidateStatus::Completed
                        ) =>
                    {
                        // Leave the active/terminal row untouched.
                    }
                    Some(existing) => {
                        let mut merged = candidate.clone();
                        merged.status = CandidateStatus::NotStarted;
                        merged.metadata = existing.metadata.clone();
                        merged.merge_metadata_existing_wins(&candidate.metadata);
                        table.insert(candidate.id.clone(), merged);
                    }
                    None => {
                        candidate.status = CandidateStatus::NotStarted;
                        table.insert(candidate.id.clone(), candidate);
                    }
                }
            }
        }
        self.persist().await
    }

    async fn get_candidates(&self, migration_id: &str) -> StoreResult<Vec<Candidate>> {
        let data = self.inner.read().expect("store lock poisoned");
        if !data.migrations.contains_key(migration_id) {
            return Err(StoreError::MigrationNotFound {
                migration_id: migration_id.to_string(),
            });
        }
        let mut candidates: Vec<Candidate> = data
            .candidates
            .get(migration_id)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default();
        candidates.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(candidates)
    }

    async fn get_candidate(&self, migration_id: &str, candidate_id: &str) -> StoreResult<Candidate> {
        let data = self.inner.read().expect("store lock poisoned");
        data.candidates
            .get(migration_id)
            .and_then(|table| table.get(candidate_id))
            .cloned()
            .ok_or_else(|| StoreError::CandidateNotFound {
                migration_id: migration_id.to_string(),
                candidate_id: candidate_id.to_string(),
            })
    }

    async fn update_candidate_metadata(
        &self,
        migration_id: &str,
        candidate_id: &str,
        kv: HashMap<String, String>,
    ) -> StoreResult<()> {
        {
            let mut data = self.inner.write().expect("store lock poisoned");
            let candidate = data
                .candidates
                .get_mut(migration_id)
                .and_then(|table| table.get_mut(candidate_id))
                .ok_or_else(|| StoreError::CandidateNotFound {
                    migration_id: migration_id.to_string(),
                    candidate_id: candidate_id.to_string(),
                })?;
            candidate.merge_metadata_incoming_wins(&kv);
        }
        self.persist().await
    }

    async fn record_event(&self, event: StepEvent) -> StoreResult<()> {
        {
            let mut data = self.inner.write().expect("store lock poisoned");
            data.events.push(event);
        }
        self.persist().await
    }

    async fn events_for(&self, migration_id: &str, candidate_id: &str) -> StoreResult<Vec<StepEvent>> {
        let data = self.inner.read().expect("store lock poisoned");
        let mut events: Vec<StepEvent> = data
            .events
            .iter()
            .filter(|e| e.migration_id == migration_id && e.candidate_id == candidate_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    async fn all_events(&self) -> StoreResult<Vec<StepEvent>> {
        let data = self.inner.read().expect("store lock poisoned");
        Ok(data.events.clone())
    }

    async fn save_run_history(&self, instance_id: &str, history: RunHistory) -> StoreResult<()> {
        {
            let mut data = self.inner.write().expect("store lock poisoned");
            data.run_histories.insert(instance_id.to_string(), history);
        }
        self.persist().await
    }

    async fn load_run_history(&self, instance_id: &str) -> StoreResult<Option<RunHistory>> {
        let data = self.inner.read().expect("store lock poisoned");
        Ok(data.run_histories.get(instance_id).cloned())
    }

    async fn delete_run_history(&self, instance_id: &str) -> StoreResult<()> {
        {
            let mut data = self.inner.write().expect("store lock poisoned");
            data.run_histories.remove(instance_id);
        }
        self.persist().await
    }

    async fn list_run_history_ids(&self) -> StoreResult<Vec<String>> {
        let data = self.inner.read().expect("store lock poisoned");
        Ok(data.run_histories.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::migration::MigrationAnnouncement;
    use chrono::Utc;

    fn sample_migration(id: &str) -> Migration {
        Migration::from_announcement(
            MigrationAnnouncement {
                id: id.to_string(),
                name: "Widget rollout".into(),
                description: None,
                migrator_url: "http://mig".into(),
                steps: vec![],
                required_inputs: vec![],
                overview: vec![],
            },
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn reannounce_preserves_created_at() {
        let store = InMemoryStore::new();
        store.save_migration(sample_migration("m1")).await.unwrap();
        let first = store.get_migration("m1").await.unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.save_migration(sample_migration("m1")).await.unwrap();
        let second = store.get_migration("m1").await.unwrap();

        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn save_candidates_preserves_running_rows_and_their_metadata() {
        let store = InMemoryStore::new();
        store.save_migration(sample_migration("m1")).await.unwrap();

        let mut c1 = Candidate::new_discovered("c1", "app");
        c1.metadata.insert("team".into(), "platform".into());
        store.save_candidates("m1", vec![c1]).await.unwrap();
        store
            .set_candidate_status("m1", "c1", CandidateStatus::Running)
            .await
            .unwrap();

        let mut c1_rediscovered = Candidate::new_discovered("c1", "app");
        c1_rediscovered
            .metadata
            .insert("team".into(), "rediscovered-team".into());
        let c3 = Candidate::new_discovered("c3", "app");
        store
            .save_candidates("m1", vec![c1_rediscovered, c3])
            .await
            .unwrap();

        let c1_after = store.get_candidate("m1", "c1").await.unwrap();
        assert_eq!(c1_after.status, CandidateStatus::Running);
        assert_eq!(c1_after.metadata["team"], "platform");

        let c3_after = store.get_candidate("m1", "c3").await.unwrap();
        assert_eq!(c3_after.status, CandidateStatus::NotStarted);
    }

    #[tokio::test]
    async fn delete_migration_refuses_while_candidate_running() {
        let store = InMemoryStore::new();
        store.save_migration(sample_migration("m1")).await.unwrap();
        store
            .save_candidates("m1", vec![Candidate::new_discovered("c1", "app")])
            .await
            .unwrap();
        store
            .set_candidate_status("m1", "c1", CandidateStatus::Running)
            .await
            .unwrap();

        let result = store.delete_migration("m1").await;
        assert!(matches!(
            result,
            Err(StoreError::MigrationHasRunningCandidates { .. })
        ));
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = InMemoryStore::with_data_dir(dir.path()).unwrap();
            store.save_migration(sample_migration("m1")).await.unwrap();
            store
                .save_candidates("m1", vec![Candidate::new_discovered("c1", "app")])
                .await
                .unwrap();
        }

        let reloaded = InMemoryStore::with_data_dir(dir.path()).unwrap();
        let migration = reloaded.get_migration("m1").await.unwrap();
        assert_eq!(migration.id, "m1");
        let candidates = reloaded.get_candidates("m1").await.unwrap();
        assert_eq!(candidates.len(), 1);
    }
}
