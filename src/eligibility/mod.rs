//! Eligibility engine
//!
//! Derives every module's status for one learner from the catalog and the
//! learner's progress records. Evaluation walks the catalog in topological
//! order, so a prerequisite is always settled before the modules it gates;
//! a completion therefore cascades through all dependents in one pass.
//!
//! Rules, per module:
//! - a dangling prerequisite keeps it `Locked`
//! - a finished record makes it `Completed`, whatever the prerequisites do
//! - otherwise it is `Locked` until every prerequisite is `Completed`
//! - once unlocked it is `InProgress` with completion > 0, else `Available`

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::catalog::Catalog;
use crate::progress::ProgressRecord;
use crate::types::{ModuleId, ModuleStatus};

/// Status of one module for one learner
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleState {
    pub module_id: ModuleId,
    pub status: ModuleStatus,
    pub completion: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// One status transition produced by an event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub module_id: ModuleId,
    pub from: ModuleStatus,
    pub to: ModuleStatus,
}

/// Statuses of every catalog module for one learner
#[derive(Debug, Clone, PartialEq)]
pub struct EligibilityView {
    catalog_version: u64,
    /// Indexed like the catalog's module list
    states: Vec<ModuleState>,
}

impl EligibilityView {
    pub fn catalog_version(&self) -> u64 {
        self.catalog_version
    }

    /// Module states in catalog order
    pub fn states(&self) -> &[ModuleState] {
        &self.states
    }

    pub fn state_at(&self, index: usize) -> &ModuleState {
        &self.states[index]
    }

    pub fn status_at(&self, index: usize) -> ModuleStatus {
        self.states[index].status
    }

    pub fn status_of(&self, catalog: &Catalog, id: &ModuleId) -> Option<ModuleStatus> {
        catalog.graph().index_of(id).map(|i| self.states[i].status)
    }

    pub fn count(&self, status: ModuleStatus) -> usize {
        self.states.iter().filter(|s| s.status == status).count()
    }

    /// Transitions from `before` to `self`, in topological order.
    ///
    /// Both views must come from the same catalog snapshot.
    pub fn changes_since(&self, before: &EligibilityView, catalog: &Catalog) -> Vec<StatusChange> {
        catalog
            .graph()
            .topological_order()
            .iter()
            .filter_map(|&i| {
                let (old, new) = (before.states[i].status, self.states[i].status);
                (old != new).then(|| StatusChange {
                    module_id: self.states[i].module_id.clone(),
                    from: old,
                    to: new,
                })
            })
            .collect()
    }
}

/// Compute every module's status for a learner
pub fn evaluate(catalog: &Catalog, records: &BTreeMap<ModuleId, ProgressRecord>) -> EligibilityView {
    let graph = catalog.graph();
    let mut statuses = vec![ModuleStatus::Locked; catalog.len()];

    for &i in graph.topological_order() {
        let record = records.get(graph.id(i));
        statuses[i] = if !graph.dangling(i).is_empty() {
            ModuleStatus::Locked
        } else if record.map(|r| r.is_complete()).unwrap_or(false) {
            ModuleStatus::Completed
        } else if !graph
            .prerequisites(i)
            .iter()
            .all(|&p| statuses[p] == ModuleStatus::Completed)
        {
            ModuleStatus::Locked
        } else if record.map(|r| r.completion > 0.0).unwrap_or(false) {
            ModuleStatus::InProgress
        } else {
            ModuleStatus::Available
        };
    }

    let states = catalog
        .modules()
        .iter()
        .zip(statuses)
        .map(|(module, status)| {
            let record = records.get(module.id());
            ModuleState {
                module_id: module.id().clone(),
                status,
                completion: record.map(|r| r.completion).unwrap_or(0.0),
                updated_at: record.map(|r| r.updated_at),
            }
        })
        .collect();

    EligibilityView {
        catalog_version: catalog.version(),
        states,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModuleDefinition;

    fn catalog(defs: Vec<ModuleDefinition>) -> Catalog {
        Catalog::from_definitions(defs).unwrap()
    }

    fn m1_m2_m3() -> Catalog {
        catalog(vec![
            ModuleDefinition::new("M1", "One"),
            ModuleDefinition::new("M2", "Two").with_prerequisites(["M1"]),
            ModuleDefinition::new("M3", "Three").with_prerequisites(["M2"]),
        ])
    }

    fn record(id: &str, completion: f64, completed: bool) -> (ModuleId, ProgressRecord) {
        (
            ModuleId::from(id),
            ProgressRecord {
                module_id: id.into(),
                completion,
                completed,
                status: ModuleStatus::Available,
                updated_at: Utc::now(),
            },
        )
    }

    fn statuses(view: &EligibilityView) -> Vec<ModuleStatus> {
        view.states().iter().map(|s| s.status).collect()
    }

    #[test]
    fn test_initial_statuses() {
        let view = evaluate(&m1_m2_m3(), &BTreeMap::new());
        assert_eq!(
            statuses(&view),
            vec![ModuleStatus::Available, ModuleStatus::Locked, ModuleStatus::Locked]
        );
    }

    #[test]
    fn test_partial_prerequisite_does_not_unlock() {
        let records = BTreeMap::from([record("M1", 99.0, false)]);
        let view = evaluate(&m1_m2_m3(), &records);
        assert_eq!(
            statuses(&view),
            vec![ModuleStatus::InProgress, ModuleStatus::Locked, ModuleStatus::Locked]
        );
    }

    #[test]
    fn test_all_prerequisites_required() {
        let cat = catalog(vec![
            ModuleDefinition::new("A", "A"),
            ModuleDefinition::new("B", "B"),
            ModuleDefinition::new("C", "C").with_prerequisites(["A", "B"]),
        ]);
        let records = BTreeMap::from([record("A", 100.0, false)]);
        assert_eq!(evaluate(&cat, &records).status_at(2), ModuleStatus::Locked);

        let records = BTreeMap::from([record("A", 100.0, false), record("B", 10.0, true)]);
        assert_eq!(evaluate(&cat, &records).status_at(2), ModuleStatus::Available);
    }

    #[test]
    fn test_cascade_reports_changes_in_topological_order() {
        let cat = m1_m2_m3();
        let before = evaluate(&cat, &BTreeMap::new());
        let after = evaluate(&cat, &BTreeMap::from([record("M1", 0.0, true)]));

        assert_eq!(
            after.changes_since(&before, &cat),
            vec![
                StatusChange {
                    module_id: "M1".into(),
                    from: ModuleStatus::Available,
                    to: ModuleStatus::Completed,
                },
                StatusChange {
                    module_id: "M2".into(),
                    from: ModuleStatus::Locked,
                    to: ModuleStatus::Available,
                },
            ]
        );
        assert_eq!(after.status_at(2), ModuleStatus::Locked);
    }

    #[test]
    fn test_dangling_prerequisite_stays_locked() {
        let cat = catalog(vec![
            ModuleDefinition::new("A", "A"),
            ModuleDefinition::new("B", "B").with_prerequisites(["missing"]),
            ModuleDefinition::new("C", "C").with_prerequisites(["B"]),
        ]);
        let records = BTreeMap::from([record("B", 100.0, true)]);
        let view = evaluate(&cat, &records);
        assert_eq!(
            statuses(&view),
            vec![ModuleStatus::Available, ModuleStatus::Locked, ModuleStatus::Locked]
        );
    }

    #[test]
    fn test_completed_is_terminal_when_prerequisite_reset() {
        let cat = m1_m2_m3();
        let records = BTreeMap::from([record("M1", 0.0, false), record("M2", 100.0, false)]);
        let view = evaluate(&cat, &records);
        assert_eq!(
            statuses(&view),
            vec![ModuleStatus::Available, ModuleStatus::Completed, ModuleStatus::Available]
        );
    }

    #[test]
    fn test_in_progress_module_relocks_when_prerequisite_reset() {
        let cat = m1_m2_m3();
        let records = BTreeMap::from([record("M1", 0.0, false), record("M2", 40.0, false)]);
        let view = evaluate(&cat, &records);
        assert_eq!(view.status_at(1), ModuleStatus::Locked);
        assert_eq!(view.state_at(1).completion, 40.0);
    }
}
