//! Module catalog
//!
//! A [`Catalog`] is an immutable, validated snapshot of every module and
//! its prerequisite edges. [`CatalogStore`] hands out `Arc` snapshots and
//! swaps in a new one atomically when the catalog is replaced.

pub mod graph;
pub mod loader;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{CatalogError, Diagnostic};
use crate::types::{Difficulty, ModuleId};

pub use graph::ModuleGraph;
pub use loader::CatalogDocument;

/// Counts of learning resources attached to a module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCounts {
    #[serde(default)]
    pub videos: u32,
    #[serde(default)]
    pub notes: u32,
    #[serde(default)]
    pub quizzes: u32,
}

/// A module as authored in a catalog document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDefinition {
    pub id: ModuleId,
    pub title: String,
    #[serde(default)]
    pub course: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    /// Display duration, e.g. "2 hours"
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub resources: ResourceCounts,
    #[serde(default)]
    pub prerequisites: Vec<ModuleId>,
}

impl ModuleDefinition {
    pub fn new(id: impl Into<ModuleId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            course: String::new(),
            description: String::new(),
            difficulty: None,
            duration: None,
            topics: Vec::new(),
            resources: ResourceCounts::default(),
            prerequisites: Vec::new(),
        }
    }

    pub fn with_prerequisites<I, T>(mut self, prereqs: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ModuleId>,
    {
        self.prerequisites = prereqs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_course(mut self, course: impl Into<String>) -> Self {
        self.course = course.into();
        self
    }

    pub fn with_difficulty(mut self, difficulty: Difficulty) -> Self {
        self.difficulty = Some(difficulty);
        self
    }
}

/// A catalog module with its derived postrequisites
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    #[serde(flatten)]
    pub definition: ModuleDefinition,
    /// Modules that list this one as a prerequisite
    pub postrequisites: Vec<ModuleId>,
}

impl Module {
    pub fn id(&self) -> &ModuleId {
        &self.definition.id
    }

    pub fn prerequisites(&self) -> &[ModuleId] {
        &self.definition.prerequisites
    }

    /// Topic key used to look up performance signals
    pub fn topic(&self) -> &str {
        if self.definition.course.is_empty() {
            self.definition.id.as_str()
        } else {
            &self.definition.course
        }
    }
}

/// Catalog listing filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleFilter {
    /// Case-insensitive substring match on title or course
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub course: Option<String>,
}

impl ModuleFilter {
    pub fn matches(&self, module: &Module) -> bool {
        let def = &module.definition;

        if let Some(q) = self.q.as_deref().filter(|q| !q.is_empty()) {
            let q = q.to_lowercase();
            if !def.title.to_lowercase().contains(&q) && !def.course.to_lowercase().contains(&q) {
                return false;
            }
        }

        if let Some(wanted) = self.difficulty.as_deref().filter(|d| *d != "all") {
            match Difficulty::parse(wanted) {
                Some(d) if def.difficulty == Some(d) => {}
                _ => return false,
            }
        }

        if let Some(course) = self.course.as_deref() {
            if !def.course.eq_ignore_ascii_case(course) {
                return false;
            }
        }

        true
    }
}

/// Immutable, validated catalog snapshot
#[derive(Debug, Clone)]
pub struct Catalog {
    version: u64,
    loaded_at: DateTime<Utc>,
    modules: Vec<Module>,
    graph: ModuleGraph,
    warnings: Vec<Diagnostic>,
}

impl Catalog {
    /// An empty catalog, version 0
    pub fn empty() -> Self {
        Self {
            version: 0,
            loaded_at: Utc::now(),
            modules: Vec::new(),
            graph: ModuleGraph::default(),
            warnings: Vec::new(),
        }
    }

    /// Validate definitions and build a snapshot.
    ///
    /// The returned catalog has version 0; [`CatalogStore::replace`]
    /// assigns the real version when it is installed.
    pub fn from_definitions(definitions: Vec<ModuleDefinition>) -> Result<Self, CatalogError> {
        let graph = ModuleGraph::build(
            definitions
                .iter()
                .map(|d| (&d.id, d.prerequisites.as_slice())),
        )?;

        let mut warnings = Vec::new();
        let modules: Vec<Module> = definitions
            .into_iter()
            .enumerate()
            .map(|(i, definition)| {
                for missing in graph.dangling(i) {
                    warnings.push(Diagnostic::DanglingPrerequisite {
                        module_id: definition.id.clone(),
                        missing: missing.clone(),
                    });
                }
                let postrequisites = graph
                    .dependents(i)
                    .iter()
                    .map(|&d| graph.id(d).clone())
                    .collect();
                Module {
                    definition,
                    postrequisites,
                }
            })
            .collect();

        for warning in &warnings {
            warn!("{}", warning);
        }

        Ok(Self {
            version: 0,
            loaded_at: Utc::now(),
            modules,
            graph,
            warnings,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    /// Dangling prerequisite warnings found at load time
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    /// All modules in catalog order
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn module_at(&self, index: usize) -> &Module {
        &self.modules[index]
    }

    pub fn get_module(&self, id: &ModuleId) -> Result<&Module, CatalogError> {
        self.graph
            .index_of(id)
            .map(|i| &self.modules[i])
            .ok_or_else(|| CatalogError::NotFound(id.clone()))
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.graph.index_of(id).is_some()
    }

    pub fn list_modules(&self, filter: &ModuleFilter) -> Vec<&Module> {
        self.modules.iter().filter(|m| filter.matches(m)).collect()
    }

    /// Authored prerequisites, dangling ids included
    pub fn prerequisites_of(&self, id: &ModuleId) -> Result<&[ModuleId], CatalogError> {
        self.get_module(id).map(|m| m.prerequisites())
    }

    pub fn postrequisites_of(&self, id: &ModuleId) -> Result<&[ModuleId], CatalogError> {
        self.get_module(id).map(|m| m.postrequisites.as_slice())
    }

    /// Modules ordered so that prerequisites come first
    pub fn topological_order(&self) -> impl Iterator<Item = &Module> + '_ {
        self.graph
            .topological_order()
            .iter()
            .map(move |&i| &self.modules[i])
    }
}

/// Holder of the active catalog snapshot
pub struct CatalogStore {
    current: RwLock<Arc<Catalog>>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Catalog::empty())),
        }
    }

    /// Start with an already validated catalog
    pub fn with_catalog(mut catalog: Catalog) -> Self {
        catalog.version = 1;
        Self {
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    /// The active snapshot; stays valid even if the catalog is replaced
    pub async fn snapshot(&self) -> Arc<Catalog> {
        self.current.read().await.clone()
    }

    /// Validate and install a new catalog.
    ///
    /// On error the previous snapshot stays in effect.
    pub async fn replace(
        &self,
        definitions: Vec<ModuleDefinition>,
    ) -> Result<Arc<Catalog>, CatalogError> {
        let mut catalog = match Catalog::from_definitions(definitions) {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!("Rejected catalog update: {}", e);
                return Err(e);
            }
        };

        let mut current = self.current.write().await;
        catalog.version = current.version + 1;
        let catalog = Arc::new(catalog);
        *current = catalog.clone();

        info!(
            "Installed catalog version {} with {} modules",
            catalog.version,
            catalog.len()
        );
        Ok(catalog)
    }
}

impl Default for CatalogStore {
    fn default() -> Self {
        Self::new()
    }
}
