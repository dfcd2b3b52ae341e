//! Error and warning types
//!
//! Hard failures (`CatalogError`, `ProgressError`, `ConfigError`) are
//! returned as errors. Degradations that leave the system usable are
//! reported as [`Diagnostic`] values next to a best-effort result.

use serde::Serialize;
use thiserror::Error;

use crate::types::ModuleId;

/// Errors raised while loading or replacing the module catalog
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CatalogError {
    /// The prerequisite graph is not acyclic
    #[error("prerequisite cycle detected: {}", join_ids(.cycle))]
    CycleDetected { cycle: Vec<ModuleId> },
    /// Two modules share an id
    #[error("duplicate module id: {0}")]
    DuplicateModule(ModuleId),
    /// Lookup of an unknown module
    #[error("module not found: {0}")]
    NotFound(ModuleId),
    /// The catalog document could not be decoded
    #[error("failed to parse catalog: {0}")]
    Parse(String),
}

/// Why a progress event was rejected
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidProgressReason {
    Negative { submitted: f64 },
    AboveMaximum { submitted: f64 },
    NotFinite,
    Decrease { stored: f64, submitted: f64 },
    ModuleLocked,
    EmptyEvent,
}

impl std::fmt::Display for InvalidProgressReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidProgressReason::Negative { submitted } => {
                write!(f, "completion {} is negative", submitted)
            }
            InvalidProgressReason::AboveMaximum { submitted } => {
                write!(f, "completion {} exceeds 100", submitted)
            }
            InvalidProgressReason::NotFinite => write!(f, "completion is not a finite number"),
            InvalidProgressReason::Decrease { stored, submitted } => write!(
                f,
                "completion {} is lower than recorded {} and no reset was requested",
                submitted, stored
            ),
            InvalidProgressReason::ModuleLocked => write!(f, "module is locked"),
            InvalidProgressReason::EmptyEvent => {
                write!(f, "event carries neither completion, completed flag nor reset")
            }
        }
    }
}

/// Errors raised while applying a progress event
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgressError {
    #[error("module not found: {0}")]
    ModuleNotFound(ModuleId),
    #[error("invalid progress for module {module}: {reason}")]
    InvalidProgress {
        module: ModuleId,
        reason: InvalidProgressReason,
    },
}

impl ProgressError {
    pub fn invalid(module: &ModuleId, reason: InvalidProgressReason) -> Self {
        ProgressError::InvalidProgress {
            module: module.clone(),
            reason,
        }
    }
}

/// Configuration rejected at startup
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("recommendation weights must sum to 1.0, got {0}")]
    WeightsSum(f64),
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Non-fatal condition reported next to a result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Diagnostic {
    /// A module references a prerequisite missing from the catalog
    #[serde(rename_all = "camelCase")]
    DanglingPrerequisite { module_id: ModuleId, missing: ModuleId },
    /// An external signal could not be fetched in time
    #[serde(rename_all = "camelCase")]
    SignalUnavailable { signal: String, details: String },
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::DanglingPrerequisite { module_id, missing } => write!(
                f,
                "module {} requires unknown module {}; it stays locked",
                module_id, missing
            ),
            Diagnostic::SignalUnavailable { signal, details } => {
                write!(f, "signal '{}' unavailable: {}", signal, details)
            }
        }
    }
}

fn join_ids(ids: &[ModuleId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}
