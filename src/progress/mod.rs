//! Per-learner progress
//!
//! Holds completion records and applies progress events with the
//! monotonicity rules. Status derivation lives in the eligibility engine;
//! this module only validates and records what the learner did.

pub mod store;

use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use crate::eligibility::StatusChange;
use crate::error::{InvalidProgressReason, ProgressError};
use crate::types::{ModuleId, ModuleStatus};

pub use store::ProgressStore;

/// Completion value that counts as finished
pub const FULL_COMPLETION: f64 = 100.0;

/// Progress of one learner on one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub module_id: ModuleId,
    /// Completion percentage in [0, 100]
    pub completion: f64,
    /// Set by an explicit completion event, independent of `completion`
    #[serde(default)]
    pub completed: bool,
    /// Status as of the last evaluation
    pub status: ModuleStatus,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    fn new(module_id: ModuleId, status: ModuleStatus, now: DateTime<Utc>) -> Self {
        Self {
            module_id,
            completion: 0.0,
            completed: false,
            status,
            updated_at: now,
        }
    }

    /// Whether the record alone marks the module finished
    pub fn is_complete(&self) -> bool {
        self.completed || self.completion >= FULL_COMPLETION
    }
}

/// A progress, completion or reset event submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub module_id: ModuleId,
    #[serde(default)]
    pub completion: Option<f64>,
    #[serde(default, alias = "completedFlag")]
    pub completed: Option<bool>,
    /// Administrative reset back to zero completion
    #[serde(default)]
    pub reset: bool,
    #[serde(default)]
    pub event_id: Option<String>,
}

impl ProgressEvent {
    pub fn completion(module_id: impl Into<ModuleId>, completion: f64) -> Self {
        Self {
            module_id: module_id.into(),
            completion: Some(completion),
            completed: None,
            reset: false,
            event_id: None,
        }
    }

    pub fn completed(module_id: impl Into<ModuleId>) -> Self {
        Self {
            module_id: module_id.into(),
            completion: None,
            completed: Some(true),
            reset: false,
            event_id: None,
        }
    }

    pub fn reset(module_id: impl Into<ModuleId>) -> Self {
        Self {
            module_id: module_id.into(),
            completion: None,
            completed: None,
            reset: true,
            event_id: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    fn marks_complete(&self) -> bool {
        self.completed == Some(true)
    }
}

/// Result of applying a progress event, returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOutcome {
    pub event_id: String,
    pub module_id: ModuleId,
    pub status: ModuleStatus,
    pub completion: f64,
    /// Every module whose status changed, in evaluation order
    pub changes: Vec<StatusChange>,
    /// True when the event id had already been applied
    pub duplicate: bool,
}

/// All progress for a single learner
pub struct LearnerProgress {
    records: BTreeMap<ModuleId, ProgressRecord>,
    seen_events: LruCache<String, ProgressOutcome>,
    generation: u64,
}

impl LearnerProgress {
    pub fn new(event_history: NonZeroUsize) -> Self {
        Self {
            records: BTreeMap::new(),
            seen_events: LruCache::new(event_history),
            generation: 0,
        }
    }

    pub(crate) fn from_records(records: Vec<ProgressRecord>, event_history: NonZeroUsize) -> Self {
        let mut learner = Self::new(event_history);
        for record in records {
            learner.records.insert(record.module_id.clone(), record);
        }
        learner
    }

    pub fn records(&self) -> &BTreeMap<ModuleId, ProgressRecord> {
        &self.records
    }

    pub fn record(&self, module_id: &ModuleId) -> Option<&ProgressRecord> {
        self.records.get(module_id)
    }

    /// Bumped on every accepted write; used to invalidate derived caches
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Outcome previously recorded for an event id.
    ///
    /// Only the most recently used `event_history` ids are kept. An id that
    /// has been evicted is no longer recognised and its event is applied
    /// again as new.
    pub fn replay(&mut self, event_id: &str) -> Option<ProgressOutcome> {
        self.seen_events.get(event_id).map(|outcome| ProgressOutcome {
            duplicate: true,
            ..outcome.clone()
        })
    }

    pub fn remember(&mut self, outcome: &ProgressOutcome) {
        self.seen_events.put(outcome.event_id.clone(), outcome.clone());
    }

    /// Validate an event against the module's current status and record it.
    ///
    /// The stored record is untouched when the event is rejected.
    pub fn apply_event(
        &mut self,
        event: &ProgressEvent,
        current_status: ModuleStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        let module = &event.module_id;

        if let Some(c) = event.completion {
            if !c.is_finite() {
                return Err(ProgressError::invalid(module, InvalidProgressReason::NotFinite));
            }
            if c < 0.0 {
                return Err(ProgressError::invalid(
                    module,
                    InvalidProgressReason::Negative { submitted: c },
                ));
            }
            if c > FULL_COMPLETION {
                return Err(ProgressError::invalid(
                    module,
                    InvalidProgressReason::AboveMaximum { submitted: c },
                ));
            }
        }

        if event.reset {
            if let Some(record) = self.records.get_mut(module) {
                record.completion = event.completion.unwrap_or(0.0);
                record.completed = false;
                record.updated_at = now;
            }
            self.generation += 1;
            return Ok(());
        }

        if event.completion.is_none() && !event.marks_complete() {
            return Err(ProgressError::invalid(module, InvalidProgressReason::EmptyEvent));
        }

        if current_status == ModuleStatus::Locked {
            return Err(ProgressError::invalid(module, InvalidProgressReason::ModuleLocked));
        }

        let stored = self.records.get(module).map(|r| r.completion).unwrap_or(0.0);
        if let Some(c) = event.completion {
            if c < stored {
                return Err(ProgressError::invalid(
                    module,
                    InvalidProgressReason::Decrease { stored, submitted: c },
                ));
            }
        }

        let record = self
            .records
            .entry(module.clone())
            .or_insert_with(|| ProgressRecord::new(module.clone(), current_status, now));
        if let Some(c) = event.completion {
            record.completion = c;
        }
        if event.marks_complete() {
            record.completed = true;
        }
        record.updated_at = now;
        self.generation += 1;
        Ok(())
    }

    /// Store freshly derived statuses on existing records
    pub fn set_status(&mut self, module_id: &ModuleId, status: ModuleStatus) {
        if let Some(record) = self.records.get_mut(module_id) {
            record.status = status;
        }
    }
}
