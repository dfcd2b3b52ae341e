//! Progress store - learner progress held in memory, optionally
//! snapshotted to a JSON file
//!
//! Each learner sits behind its own mutex so writes for one learner are
//! serialized while different learners never contend.

use anyhow::{Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

use super::{LearnerProgress, ProgressRecord};
use crate::types::LearnerId;

/// Default number of event ids remembered per learner for idempotence.
/// Redelivery of an older id is treated as a new event.
pub const DEFAULT_EVENT_HISTORY: usize = 1024;

pub struct ProgressStore {
    learners: RwLock<HashMap<LearnerId, Arc<Mutex<LearnerProgress>>>>,
    event_history: NonZeroUsize,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::with_event_history(DEFAULT_EVENT_HISTORY)
    }

    pub fn with_event_history(event_history: usize) -> Self {
        Self {
            learners: RwLock::new(HashMap::new()),
            event_history: NonZeroUsize::new(event_history).unwrap_or(NonZeroUsize::MIN),
        }
    }

    /// Handle for an existing learner
    pub async fn learner(&self, id: &LearnerId) -> Option<Arc<Mutex<LearnerProgress>>> {
        self.learners.read().await.get(id).cloned()
    }

    /// Handle for a learner, created on first interaction
    pub async fn learner_or_insert(&self, id: &LearnerId) -> Arc<Mutex<LearnerProgress>> {
        if let Some(existing) = self.learner(id).await {
            return existing;
        }
        let mut learners = self.learners.write().await;
        learners
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(LearnerProgress::new(self.event_history))))
            .clone()
    }

    /// Erase every record of a learner. Returns whether the learner existed.
    pub async fn erase(&self, id: &LearnerId) -> bool {
        let removed = self.learners.write().await.remove(id).is_some();
        if removed {
            info!("Erased progress for learner {}", id);
        }
        removed
    }

    pub async fn learner_count(&self) -> usize {
        self.learners.read().await.len()
    }

    /// Write every learner's records to a JSON file
    pub async fn save(&self, path: &Path) -> Result<()> {
        let handles: Vec<(LearnerId, Arc<Mutex<LearnerProgress>>)> = self
            .learners
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect();

        let mut snapshot: BTreeMap<LearnerId, Vec<ProgressRecord>> = BTreeMap::new();
        for (id, handle) in handles {
            let learner = handle.lock().await;
            snapshot.insert(id, learner.records().values().cloned().collect());
        }

        let json = serde_json::to_string_pretty(&snapshot)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create progress directory")?;
        }
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write progress snapshot {}", path.display()))?;

        info!("Saved progress for {} learners to {:?}", snapshot.len(), path);
        Ok(())
    }

    /// Load a snapshot written by [`ProgressStore::save`]. A missing file
    /// yields an empty store.
    pub async fn load(path: &Path, event_history: usize) -> Result<Self> {
        let store = Self::with_event_history(event_history);
        if !path.exists() {
            return Ok(store);
        }

        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read progress snapshot {}", path.display()))?;
        let snapshot: BTreeMap<LearnerId, Vec<ProgressRecord>> =
            serde_json::from_str(&json).context("Failed to parse progress snapshot")?;

        {
            let mut learners = store.learners.write().await;
            for (id, records) in snapshot {
                let learner = LearnerProgress::from_records(records, store.event_history);
                learners.insert(id, Arc::new(Mutex::new(learner)));
            }
            info!("Loaded progress for {} learners from {:?}", learners.len(), path);
        }

        Ok(store)
    }
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressEvent;
    use crate::types::ModuleStatus;
    use chrono::Utc;

    #[tokio::test]
    async fn test_unknown_learner_not_created_on_read() {
        let store = ProgressStore::new();
        assert!(store.learner(&"ghost".into()).await.is_none());
        assert_eq!(store.learner_count().await, 0);
    }

    #[tokio::test]
    async fn test_learner_handles_are_shared() {
        let store = ProgressStore::new();
        let a = store.learner_or_insert(&"alice".into()).await;
        let b = store.learner_or_insert(&"alice".into()).await;
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.learner_count().await, 1);
    }

    #[tokio::test]
    async fn test_erase_learner() {
        let store = ProgressStore::new();
        store.learner_or_insert(&"alice".into()).await;
        assert!(store.erase(&"alice".into()).await);
        assert!(!store.erase(&"alice".into()).await);
    }

    #[tokio::test]
    async fn test_save_and_load_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        let store = ProgressStore::new();
        {
            let handle = store.learner_or_insert(&"alice".into()).await;
            let mut learner = handle.lock().await;
            learner
                .apply_event(&ProgressEvent::completion("M1", 55.0), ModuleStatus::Available, Utc::now())
                .unwrap();
        }
        store.save(&path).await.unwrap();

        let loaded = ProgressStore::load(&path, 16).await.unwrap();
        let handle = loaded.learner(&"alice".into()).await.unwrap();
        let learner = handle.lock().await;
        assert_eq!(learner.record(&"M1".into()).unwrap().completion, 55.0);
    }

    #[tokio::test]
    async fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::load(&dir.path().join("none.json"), 16).await.unwrap();
        assert_eq!(store.learner_count().await, 0);
    }
}
