//! Progression service
//!
//! Ties the catalog, the progress store, the eligibility engine and the
//! recommendation engine together. This is the only entry point the HTTP
//! layer and embedding callers need.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde::Serialize;
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{Catalog, CatalogDocument, CatalogStore, Module, ModuleDefinition, ModuleFilter};
use crate::config::{Config, RecommendationConfig};
use crate::eligibility::{evaluate, EligibilityView, ModuleState};
use crate::error::{CatalogError, Diagnostic, ProgressError};
use crate::progress::{ProgressEvent, ProgressOutcome, ProgressStore};
use crate::recommend::signals::{self, HttpSignals, NoSignals, SignalProvider};
use crate::recommend::{RecommendationEngine, RecommendationSet};
use crate::types::{LearnerId, ModuleId, ModuleStatus};

const RECOMMENDATION_CACHE_CAPACITY: usize = 4096;

/// Module statuses for one learner
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerModules {
    pub learner_id: LearnerId,
    pub catalog_version: u64,
    pub modules: Vec<ModuleState>,
    pub warnings: Vec<Diagnostic>,
}

/// Summary of the active catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSummary {
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
    pub module_count: usize,
    pub topological_order: Vec<ModuleId>,
    pub warnings: Vec<Diagnostic>,
}

impl CatalogSummary {
    fn of(catalog: &Catalog) -> Self {
        Self {
            version: catalog.version(),
            loaded_at: catalog.loaded_at(),
            module_count: catalog.len(),
            topological_order: catalog.topological_order().map(|m| m.id().clone()).collect(),
            warnings: catalog.warnings().to_vec(),
        }
    }
}

/// Limits applied to recommendation requests
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub signal_timeout: Duration,
    pub cache_ttl: Duration,
    pub default_k: usize,
    pub max_k: usize,
}

impl From<&RecommendationConfig> for ServiceSettings {
    fn from(config: &RecommendationConfig) -> Self {
        Self {
            signal_timeout: config.signal_timeout(),
            cache_ttl: config.cache_ttl(),
            default_k: config.default_k,
            max_k: config.max_k,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self::from(&RecommendationConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CacheKey {
    generation: u64,
    catalog_version: u64,
    k: usize,
    preview: bool,
}

struct CachedRecommendations {
    key: CacheKey,
    computed_at: Instant,
    set: RecommendationSet,
}

pub struct ProgressionService {
    catalog: CatalogStore,
    progress: ProgressStore,
    signals: Arc<dyn SignalProvider>,
    engine: RecommendationEngine,
    settings: ServiceSettings,
    cache: Mutex<LruCache<LearnerId, CachedRecommendations>>,
}

impl ProgressionService {
    pub fn new(
        catalog: CatalogStore,
        progress: ProgressStore,
        signals: Arc<dyn SignalProvider>,
        engine: RecommendationEngine,
        settings: ServiceSettings,
    ) -> Self {
        let capacity = NonZeroUsize::new(RECOMMENDATION_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            catalog,
            progress,
            signals,
            engine,
            settings,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Build the service described by a validated configuration: initial
    /// catalog, progress snapshot and signal source.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let catalog = match &config.catalog.path {
            Some(path) => {
                let document = CatalogDocument::load(path)
                    .with_context(|| format!("Failed to load catalog {}", path.display()))?;
                let catalog = Catalog::from_definitions(document.modules)
                    .with_context(|| format!("Invalid catalog {}", path.display()))?;
                info!("Loaded {} modules from {:?}", catalog.len(), path);
                CatalogStore::with_catalog(catalog)
            }
            None => CatalogStore::new(),
        };

        let progress = match &config.progress.snapshot_path {
            Some(path) => ProgressStore::load(path, config.progress.event_history).await?,
            None => ProgressStore::with_event_history(config.progress.event_history),
        };

        let signals: Arc<dyn SignalProvider> = match &config.signals.endpoint {
            Some(endpoint) => {
                info!("Using analytics signals from {}", endpoint);
                Arc::new(HttpSignals::new(endpoint.clone()))
            }
            None => Arc::new(NoSignals),
        };

        let rec = &config.recommendation;
        let engine = RecommendationEngine::new(rec.weights, rec.staleness_threshold())?;

        Ok(Self::new(catalog, progress, signals, engine, ServiceSettings::from(rec)))
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    pub async fn catalog(&self) -> Arc<Catalog> {
        self.catalog.snapshot().await
    }

    pub async fn catalog_summary(&self) -> CatalogSummary {
        let catalog = self.catalog.snapshot().await;
        CatalogSummary::of(&catalog)
    }

    /// Validate and install a new catalog; the previous one stays active
    /// on error.
    pub async fn replace_catalog(
        &self,
        definitions: Vec<ModuleDefinition>,
    ) -> std::result::Result<CatalogSummary, CatalogError> {
        let catalog = self.catalog.replace(definitions).await?;
        Ok(CatalogSummary::of(&catalog))
    }

    pub async fn get_module(&self, id: &ModuleId) -> std::result::Result<Module, CatalogError> {
        let catalog = self.catalog.snapshot().await;
        catalog.get_module(id).cloned()
    }

    pub async fn list_modules(&self, filter: &ModuleFilter) -> Vec<Module> {
        let catalog = self.catalog.snapshot().await;
        catalog.list_modules(filter).into_iter().cloned().collect()
    }

    /// Current eligibility of a learner. A learner never seen before gets
    /// the default view; nothing is created on read.
    async fn view_for(&self, catalog: &Catalog, learner: &LearnerId) -> (EligibilityView, u64) {
        match self.progress.learner(learner).await {
            Some(handle) => {
                let progress = handle.lock().await;
                (evaluate(catalog, progress.records()), progress.generation())
            }
            None => (evaluate(catalog, &BTreeMap::new()), 0),
        }
    }

    /// Every module with the learner's status, filtered
    pub async fn module_view(
        &self,
        learner: &LearnerId,
        filter: &ModuleFilter,
        status: Option<ModuleStatus>,
    ) -> LearnerModules {
        let catalog = self.catalog.snapshot().await;
        let (view, _) = self.view_for(&catalog, learner).await;

        let modules = catalog
            .modules()
            .iter()
            .zip(view.states())
            .filter(|(module, state)| {
                filter.matches(module) && status.map(|s| s == state.status).unwrap_or(true)
            })
            .map(|(_, state)| state.clone())
            .collect();

        LearnerModules {
            learner_id: learner.clone(),
            catalog_version: view.catalog_version(),
            modules,
            warnings: catalog.warnings().to_vec(),
        }
    }

    /// Validate and record a progress event, re-evaluating every dependent
    /// module before returning.
    ///
    /// An event id seen before returns the recorded outcome unchanged.
    pub async fn apply_progress(
        &self,
        learner: &LearnerId,
        mut event: ProgressEvent,
    ) -> std::result::Result<ProgressOutcome, ProgressError> {
        let catalog = self.catalog.snapshot().await;
        let Some(index) = catalog.graph().index_of(&event.module_id) else {
            warn!(
                "Learner {} sent progress for unknown module {}",
                learner, event.module_id
            );
            return Err(ProgressError::ModuleNotFound(event.module_id));
        };

        let event_id = event
            .event_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();

        let handle = self.progress.learner_or_insert(learner).await;
        let mut progress = handle.lock().await;

        if let Some(outcome) = progress.replay(&event_id) {
            debug!("Replaying event {} for learner {}", event_id, learner);
            return Ok(outcome);
        }

        let before = evaluate(&catalog, progress.records());
        if let Err(e) = progress.apply_event(&event, before.status_at(index), Utc::now()) {
            warn!("Rejected event {} for learner {}: {}", event_id, learner, e);
            return Err(e);
        }

        let after = evaluate(&catalog, progress.records());
        let changes = after.changes_since(&before, &catalog);
        for state in after.states() {
            progress.set_status(&state.module_id, state.status);
        }

        let state = after.state_at(index);
        let outcome = ProgressOutcome {
            event_id,
            module_id: state.module_id.clone(),
            status: state.status,
            completion: state.completion,
            changes,
            duplicate: false,
        };
        progress.remember(&outcome);

        info!(
            "Learner {} module {} is {} ({} status changes)",
            learner,
            outcome.module_id,
            outcome.status,
            outcome.changes.len()
        );
        Ok(outcome)
    }

    /// Ranked next actions for a learner. Never fails: unavailable signals
    /// are neutral and reported as warnings.
    pub async fn recommend(
        &self,
        learner: &LearnerId,
        k: Option<usize>,
        preview: bool,
    ) -> RecommendationSet {
        let k = k.unwrap_or(self.settings.default_k).min(self.settings.max_k);
        let catalog = self.catalog.snapshot().await;
        let (view, generation) = self.view_for(&catalog, learner).await;

        let key = CacheKey {
            generation,
            catalog_version: catalog.version(),
            k,
            preview,
        };
        if let Some(set) = self.cached(learner, &key).await {
            debug!("Serving cached recommendations for learner {}", learner);
            return set;
        }

        let signals = signals::collect(self.signals.as_ref(), learner, self.settings.signal_timeout).await;
        let items = self.engine.rank(&catalog, &view, &signals, k, Utc::now());
        let preview_items = preview.then(|| self.engine.preview(&catalog, &view, k));

        let degraded = !signals.warnings.is_empty();
        let mut warnings = catalog.warnings().to_vec();
        warnings.extend(signals.warnings);

        let set = RecommendationSet {
            learner_id: learner.clone(),
            items,
            preview: preview_items,
            warnings,
        };

        // Degraded results are not cached so the next request retries the signals
        if !degraded {
            self.cache.lock().await.put(
                learner.clone(),
                CachedRecommendations {
                    key,
                    computed_at: Instant::now(),
                    set: set.clone(),
                },
            );
        }
        set
    }

    async fn cached(&self, learner: &LearnerId, key: &CacheKey) -> Option<RecommendationSet> {
        let mut cache = self.cache.lock().await;
        let entry = cache.get(learner)?;
        if entry.key == *key && entry.computed_at.elapsed() < self.settings.cache_ttl {
            Some(entry.set.clone())
        } else {
            None
        }
    }

    /// Remove every record of a learner. Returns whether anything existed.
    pub async fn erase_learner(&self, learner: &LearnerId) -> bool {
        self.cache.lock().await.pop(learner);
        self.progress.erase(learner).await
    }

    pub async fn save_progress(&self, path: &Path) -> Result<()> {
        self.progress.save(path).await
    }
}
