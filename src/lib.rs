//! learnpath - Learning Module Progression Library
//!
//! Tracks learner progress through a catalog of modules linked by
//! prerequisites:
//! - Catalog of modules forming a prerequisite DAG, replaced atomically
//! - Per-learner progress with monotonic completion and idempotent events
//! - Eligibility engine deriving locked/available/in-progress/completed
//! - Weighted recommendations from urgency, unlock value, risk and staleness
//! - HTTP interface built on axum
//!
//! # Example
//!
//! ```ignore
//! use learnpath::{ProgressionService, ProgressEvent};
//!
//! let outcome = service
//!     .apply_progress(&"alice".into(), ProgressEvent::completion("M1", 100.0))
//!     .await?;
//! for change in outcome.changes {
//!     println!("{}: {} -> {}", change.module_id, change.from, change.to);
//! }
//! ```

pub mod types;
pub mod error;
pub mod catalog;
pub mod progress;
pub mod eligibility;
pub mod recommend;
pub mod config;
pub mod service;
pub mod server;
pub mod cli;

pub use catalog::{Catalog, CatalogStore, Module, ModuleDefinition, ModuleFilter};
pub use config::Config;
pub use eligibility::{evaluate, EligibilityView, ModuleState, StatusChange};
pub use error::{CatalogError, ConfigError, Diagnostic, InvalidProgressReason, ProgressError};
pub use progress::{ProgressEvent, ProgressOutcome, ProgressRecord, ProgressStore};
pub use recommend::{
    NoSignals, RecommendationEngine, RecommendationItem, RecommendationSet, SignalProvider,
    StaticSignals, Weights,
};
pub use service::ProgressionService;
pub use types::{Difficulty, LearnerId, ModuleId, ModuleStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get library info
pub fn info() -> String {
    format!("{} v{}", NAME, VERSION)
}
