//! Recommendation engine
//!
//! Ranks the actions a learner can take next: startable modules plus
//! review items and tasks from the signal provider. Ranking is a pure
//! function of the catalog, the learner's eligibility view, the gathered
//! signals and the clock, so identical inputs give identical output.

pub mod scoring;
pub mod signals;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::cmp::Ordering;

use crate::catalog::Catalog;
use crate::eligibility::EligibilityView;
use crate::error::{ConfigError, Diagnostic};
use crate::types::{LearnerId, ModuleId, ModuleStatus};

pub use scoring::{PriorityBand, SignalVector, Weights};
pub use signals::{HttpSignals, ItemKind, NoSignals, SignalProvider, SignalSnapshot, StaticSignals, TaskItem};

/// A ranked next action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationItem {
    pub item_id: String,
    pub kind: ItemKind,
    pub title: String,
    pub score: f64,
    pub reason: String,
    pub priority: PriorityBand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due: Option<DateTime<Utc>>,
    /// Locked modules directly gated by this item
    pub unlocks: usize,
    pub signals: SignalVector,
}

/// A locked module shown as "coming soon"
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewItem {
    pub module_id: ModuleId,
    pub title: String,
    /// Prerequisites not yet completed, dangling ids included
    pub blocked_by: Vec<ModuleId>,
}

/// Response of a recommendation request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationSet {
    pub learner_id: LearnerId,
    pub items: Vec<RecommendationItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<Vec<PreviewItem>>,
    pub warnings: Vec<Diagnostic>,
}

struct Candidate {
    item_id: String,
    kind: ItemKind,
    title: String,
    estimated_time: Option<String>,
    due: Option<DateTime<Utc>>,
    unlocks: usize,
    status: Option<ModuleStatus>,
    signals: SignalVector,
}

/// Weighted-sum ranking over normalized signals
#[derive(Debug, Clone)]
pub struct RecommendationEngine {
    weights: Weights,
    staleness_threshold: Duration,
}

impl RecommendationEngine {
    /// Fails when the weights are out of range or do not sum to 1.0
    pub fn new(weights: Weights, staleness_threshold: Duration) -> Result<Self, ConfigError> {
        weights.validate()?;
        Ok(Self {
            weights,
            staleness_threshold,
        })
    }

    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    /// Rank startable modules and external items, returning at most `k`.
    ///
    /// Ties on score go to the larger unlock count, then the earlier due
    /// date, then the smaller id.
    pub fn rank(
        &self,
        catalog: &Catalog,
        view: &EligibilityView,
        signals: &SignalSnapshot,
        k: usize,
        now: DateTime<Utc>,
    ) -> Vec<RecommendationItem> {
        let mut candidates = self.module_candidates(catalog, view, signals, now);
        candidates.extend(self.task_candidates(catalog, signals, now));

        let max_unlocks = candidates.iter().map(|c| c.unlocks).max().unwrap_or(0);
        let mut items: Vec<RecommendationItem> = candidates
            .into_iter()
            .map(|mut c| {
                c.signals.unlock = scoring::unlock(c.unlocks, max_unlocks);
                self.finish(c)
            })
            .collect();

        items.sort_by(compare_items);
        items.truncate(k);
        items
    }

    fn module_candidates(
        &self,
        catalog: &Catalog,
        view: &EligibilityView,
        signals: &SignalSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        let graph = catalog.graph();
        catalog
            .modules()
            .iter()
            .enumerate()
            .filter(|(i, _)| view.status_at(*i).is_startable())
            .map(|(i, module)| {
                let state = view.state_at(i);
                let unlocks = graph
                    .dependents(i)
                    .iter()
                    .filter(|&&d| view.status_at(d) == ModuleStatus::Locked)
                    .count();
                let due = signals.due_for(module.id().as_str());
                let performance = signals
                    .performance_for(module.id().as_str())
                    .or_else(|| signals.performance_for(module.topic()));

                Candidate {
                    item_id: module.id().to_string(),
                    kind: ItemKind::Module,
                    title: module.definition.title.clone(),
                    estimated_time: module.definition.duration.clone(),
                    due,
                    unlocks,
                    status: Some(state.status),
                    signals: SignalVector {
                        urgency: scoring::urgency(due, now),
                        unlock: 0.0,
                        risk: scoring::risk(performance),
                        staleness: scoring::staleness(
                            state.status,
                            state.updated_at,
                            now,
                            self.staleness_threshold,
                        ),
                    },
                }
            })
            .collect()
    }

    /// External items; ids that collide with a catalog module are skipped
    /// so a module is never recommended twice.
    fn task_candidates(
        &self,
        catalog: &Catalog,
        signals: &SignalSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        signals
            .tasks
            .iter()
            .filter(|task| !catalog.contains(&ModuleId::new(task.id.as_str())))
            .map(|task| {
                let due = task.due.or_else(|| signals.due_for(&task.id));
                let topic = task.topic.as_deref().unwrap_or(&task.id);
                Candidate {
                    item_id: task.id.clone(),
                    kind: task.kind,
                    title: task.title.clone(),
                    estimated_time: task.estimated_time.clone(),
                    due,
                    unlocks: 0,
                    status: None,
                    signals: SignalVector {
                        urgency: scoring::urgency(due, now),
                        unlock: 0.0,
                        risk: scoring::risk(signals.performance_for(topic)),
                        staleness: 0.0,
                    },
                }
            })
            .collect()
    }

    fn finish(&self, c: Candidate) -> RecommendationItem {
        let score = c.signals.score(&self.weights);
        let reason = match c.signals.driver(&self.weights) {
            Some(driver) => driver.reason(),
            None => match c.status {
                Some(ModuleStatus::InProgress) => "continue where you left off",
                _ => "ready to start",
            },
        };
        RecommendationItem {
            item_id: c.item_id,
            kind: c.kind,
            title: c.title,
            score,
            reason: reason.to_string(),
            priority: PriorityBand::from_score(score),
            estimated_time: c.estimated_time,
            due: c.due,
            unlocks: c.unlocks,
            signals: c.signals,
        }
    }

    /// Locked modules, fewest missing prerequisites first
    pub fn preview(&self, catalog: &Catalog, view: &EligibilityView, k: usize) -> Vec<PreviewItem> {
        let graph = catalog.graph();
        let mut items: Vec<PreviewItem> = catalog
            .modules()
            .iter()
            .enumerate()
            .filter(|(i, _)| view.status_at(*i) == ModuleStatus::Locked)
            .map(|(i, module)| {
                let mut blocked_by: Vec<ModuleId> = graph
                    .prerequisites(i)
                    .iter()
                    .filter(|&&p| view.status_at(p) != ModuleStatus::Completed)
                    .map(|&p| graph.id(p).clone())
                    .collect();
                blocked_by.extend(graph.dangling(i).iter().cloned());
                PreviewItem {
                    module_id: module.id().clone(),
                    title: module.definition.title.clone(),
                    blocked_by,
                }
            })
            .collect();

        items.sort_by(|a, b| {
            a.blocked_by
                .len()
                .cmp(&b.blocked_by.len())
                .then_with(|| a.module_id.cmp(&b.module_id))
        });
        items.truncate(k);
        items
    }
}

fn compare_items(a: &RecommendationItem, b: &RecommendationItem) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.unlocks.cmp(&a.unlocks))
        .then_with(|| match (a.due, b.due) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.item_id.cmp(&b.item_id))
}
