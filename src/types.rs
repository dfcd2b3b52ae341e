//! Shared types used across modules
//!
//! Identifiers and the module status enum live here so that the catalog,
//! progress store and engines can depend on them without depending on
//! each other.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a learning module
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifier of a learner
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearnerId(String);

impl LearnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LearnerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Gating status of a module for one learner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModuleStatus {
    Locked,
    Available,
    InProgress,
    Completed,
}

impl ModuleStatus {
    /// Whether the learner can work on the module right now
    pub fn is_startable(self) -> bool {
        matches!(self, ModuleStatus::Available | ModuleStatus::InProgress)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModuleStatus::Locked => "locked",
            ModuleStatus::Available => "available",
            ModuleStatus::InProgress => "in-progress",
            ModuleStatus::Completed => "completed",
        }
    }

    /// Parse the wire form used in query strings
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "locked" => Some(ModuleStatus::Locked),
            "available" => Some(ModuleStatus::Available),
            "in-progress" | "in_progress" | "inprogress" => Some(ModuleStatus::InProgress),
            "completed" => Some(ModuleStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Difficulty level shown alongside a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Beginner,
    Intermediate,
    Advanced,
}

impl Difficulty {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "beginner" => Some(Difficulty::Beginner),
            "intermediate" => Some(Difficulty::Intermediate),
            "advanced" => Some(Difficulty::Advanced),
            _ => None,
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Difficulty::Beginner => write!(f, "Beginner"),
            Difficulty::Intermediate => write!(f, "Intermediate"),
            Difficulty::Advanced => write!(f, "Advanced"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&ModuleStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
        assert_eq!(ModuleStatus::parse("in-progress"), Some(ModuleStatus::InProgress));
        assert_eq!(ModuleStatus::parse("LOCKED"), Some(ModuleStatus::Locked));
        assert_eq!(ModuleStatus::parse("done"), None);
    }

    #[test]
    fn test_ids_are_transparent() {
        let id = ModuleId::new("M1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"M1\"");
        assert!(ModuleId::from("A") < ModuleId::from("B"));
    }
}
