//! External signals for recommendation scoring
//!
//! Performance, due dates and review/task items come from an analytics
//! collaborator outside this service. Every fetch is bounded by a timeout;
//! a failed or slow fetch leaves the signal empty and adds a warning.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::Diagnostic;
use crate::types::LearnerId;

/// Kind of recommended action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Module,
    Review,
    Task,
}

/// A review item or due task supplied by the analytics collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    pub id: String,
    pub title: String,
    #[serde(default = "default_task_kind")]
    pub kind: ItemKind,
    /// Topic used to look up performance; falls back to the id
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub due: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_time: Option<String>,
}

fn default_task_kind() -> ItemKind {
    ItemKind::Task
}

/// Source of external signals for one learner
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalProvider: Send + Sync {
    /// Recent performance per topic. Values in [0, 1]; values above 1 are
    /// read as percentages.
    async fn performance(&self, learner: &LearnerId) -> Result<HashMap<String, f64>>;

    /// Declared due dates keyed by module or task id
    async fn due_dates(&self, learner: &LearnerId) -> Result<HashMap<String, DateTime<Utc>>>;

    /// Pending review items and tasks
    async fn tasks(&self, learner: &LearnerId) -> Result<Vec<TaskItem>>;
}

/// Signals gathered for one recommendation request
#[derive(Debug, Clone, Default)]
pub struct SignalSnapshot {
    pub performance: HashMap<String, f64>,
    pub due_dates: HashMap<String, DateTime<Utc>>,
    pub tasks: Vec<TaskItem>,
    pub warnings: Vec<Diagnostic>,
}

impl SignalSnapshot {
    /// Performance for a topic, normalized to [0, 1]
    pub fn performance_for(&self, topic: &str) -> Option<f64> {
        self.performance.get(topic).copied().filter(|v| v.is_finite()).map(|v| {
            let v = if v > 1.0 { v / 100.0 } else { v };
            v.clamp(0.0, 1.0)
        })
    }

    pub fn due_for(&self, id: &str) -> Option<DateTime<Utc>> {
        self.due_dates.get(id).copied()
    }
}

/// Fetch all signals concurrently, each bounded by `timeout`
pub async fn collect(
    provider: &dyn SignalProvider,
    learner: &LearnerId,
    timeout: Duration,
) -> SignalSnapshot {
    let (performance, due_dates, tasks) = tokio::join!(
        bounded("performance", timeout, provider.performance(learner)),
        bounded("due_dates", timeout, provider.due_dates(learner)),
        bounded("tasks", timeout, provider.tasks(learner)),
    );

    let mut snapshot = SignalSnapshot::default();
    match performance {
        Ok(v) => snapshot.performance = v,
        Err(d) => snapshot.warnings.push(d),
    }
    match due_dates {
        Ok(v) => snapshot.due_dates = v,
        Err(d) => snapshot.warnings.push(d),
    }
    match tasks {
        Ok(v) => snapshot.tasks = v,
        Err(d) => snapshot.warnings.push(d),
    }
    snapshot
}

async fn bounded<T, F>(signal: &str, timeout: Duration, fetch: F) -> std::result::Result<T, Diagnostic>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fetch).await {
        Ok(Ok(value)) => {
            debug!("Fetched signal '{}'", signal);
            Ok(value)
        }
        Ok(Err(e)) => {
            warn!("Signal '{}' unavailable: {:#}", signal, e);
            Err(Diagnostic::SignalUnavailable {
                signal: signal.to_string(),
                details: e.to_string(),
            })
        }
        Err(_) => {
            warn!("Signal '{}' timed out after {:?}", signal, timeout);
            Err(Diagnostic::SignalUnavailable {
                signal: signal.to_string(),
                details: format!("timed out after {} ms", timeout.as_millis()),
            })
        }
    }
}

/// Provider with no external data; every signal is neutral
#[derive(Debug, Clone, Default)]
pub struct NoSignals;

#[async_trait]
impl SignalProvider for NoSignals {
    async fn performance(&self, _learner: &LearnerId) -> Result<HashMap<String, f64>> {
        Ok(HashMap::new())
    }

    async fn due_dates(&self, _learner: &LearnerId) -> Result<HashMap<String, DateTime<Utc>>> {
        Ok(HashMap::new())
    }

    async fn tasks(&self, _learner: &LearnerId) -> Result<Vec<TaskItem>> {
        Ok(Vec::new())
    }
}

/// In-memory provider with the same data for every learner.
///
/// A signal left as `None` reports itself unavailable.
#[derive(Debug, Clone, Default)]
pub struct StaticSignals {
    pub performance: Option<HashMap<String, f64>>,
    pub due_dates: Option<HashMap<String, DateTime<Utc>>>,
    pub tasks: Option<Vec<TaskItem>>,
    /// Artificial latency applied to every fetch
    pub delay: Option<Duration>,
}

impl StaticSignals {
    /// All signals present and empty
    pub fn empty() -> Self {
        Self {
            performance: Some(HashMap::new()),
            due_dates: Some(HashMap::new()),
            tasks: Some(Vec::new()),
            delay: None,
        }
    }

    pub fn with_performance(mut self, topic: impl Into<String>, value: f64) -> Self {
        self.performance
            .get_or_insert_with(HashMap::new)
            .insert(topic.into(), value);
        self
    }

    pub fn with_due_date(mut self, id: impl Into<String>, due: DateTime<Utc>) -> Self {
        self.due_dates
            .get_or_insert_with(HashMap::new)
            .insert(id.into(), due);
        self
    }

    pub fn with_task(mut self, task: TaskItem) -> Self {
        self.tasks.get_or_insert_with(Vec::new).push(task);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    async fn wait(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SignalProvider for StaticSignals {
    async fn performance(&self, _learner: &LearnerId) -> Result<HashMap<String, f64>> {
        self.wait().await;
        self.performance
            .clone()
            .context("performance signal not configured")
    }

    async fn due_dates(&self, _learner: &LearnerId) -> Result<HashMap<String, DateTime<Utc>>> {
        self.wait().await;
        self.due_dates.clone().context("due date signal not configured")
    }

    async fn tasks(&self, _learner: &LearnerId) -> Result<Vec<TaskItem>> {
        self.wait().await;
        self.tasks.clone().context("task signal not configured")
    }
}

/// Provider backed by an HTTP analytics service.
///
/// Expects `GET {endpoint}/learners/{id}/performance`, `/due-dates` and
/// `/tasks`, each returning JSON.
#[derive(Debug, Clone)]
pub struct HttpSignals {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSignals {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    /// Learner ids are percent-encoded as a single path segment
    fn url(&self, learner: &LearnerId, signal: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.endpoint)
            .with_context(|| format!("Invalid signals endpoint {}", self.endpoint))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Signals endpoint {} cannot take a path", self.endpoint))?
            .pop_if_empty()
            .extend(["learners", learner.as_str(), signal]);
        Ok(url)
    }

    async fn fetch<T: serde::de::DeserializeOwned>(&self, learner: &LearnerId, signal: &str) -> Result<T> {
        let url = self.url(learner, signal)?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?
            .error_for_status()
            .with_context(|| format!("Signal endpoint {} returned an error", url))?;
        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to decode {}", url))
    }
}

#[async_trait]
impl SignalProvider for HttpSignals {
    async fn performance(&self, learner: &LearnerId) -> Result<HashMap<String, f64>> {
        self.fetch(learner, "performance").await
    }

    async fn due_dates(&self, learner: &LearnerId) -> Result<HashMap<String, DateTime<Utc>>> {
        self.fetch(learner, "due-dates").await
    }

    async fn tasks(&self, learner: &LearnerId) -> Result<Vec<TaskItem>> {
        self.fetch(learner, "tasks").await
    }
}
