//! End-to-end progression scenarios driven through the service

use chrono::Utc;
use learnpath::catalog::{Catalog, CatalogStore, ModuleDefinition, ModuleFilter};
use learnpath::config::Config;
use learnpath::error::{CatalogError, Diagnostic, InvalidProgressReason, ProgressError};
use learnpath::progress::{ProgressEvent, ProgressStore};
use learnpath::recommend::{ItemKind, PriorityBand, RecommendationEngine, StaticSignals, TaskItem, Weights};
use learnpath::service::{ProgressionService, ServiceSettings};
use learnpath::types::{LearnerId, ModuleId, ModuleStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::assert_ok;

fn chain() -> Vec<ModuleDefinition> {
    vec![
        ModuleDefinition::new("M1", "Foundations").with_course("Physics"),
        ModuleDefinition::new("M2", "Mechanics")
            .with_course("Physics")
            .with_prerequisites(["M1"]),
        ModuleDefinition::new("M3", "Thermodynamics")
            .with_course("Physics")
            .with_prerequisites(["M2"]),
    ]
}

fn uncached() -> ServiceSettings {
    ServiceSettings {
        cache_ttl: Duration::ZERO,
        ..ServiceSettings::default()
    }
}

fn service_with(
    defs: Vec<ModuleDefinition>,
    signals: StaticSignals,
    settings: ServiceSettings,
) -> ProgressionService {
    ProgressionService::new(
        CatalogStore::with_catalog(Catalog::from_definitions(defs).unwrap()),
        ProgressStore::new(),
        Arc::new(signals),
        RecommendationEngine::new(Weights::default(), chrono::Duration::days(7)).unwrap(),
        settings,
    )
}

fn service() -> ProgressionService {
    service_with(chain(), StaticSignals::empty(), uncached())
}

async fn statuses(svc: &ProgressionService, learner: &LearnerId) -> Vec<ModuleStatus> {
    svc.module_view(learner, &ModuleFilter::default(), None)
        .await
        .modules
        .iter()
        .map(|m| m.status)
        .collect()
}

#[tokio::test]
async fn test_completion_cascades_within_the_same_response() -> anyhow::Result<()> {
    let svc = service();
    let alice = LearnerId::from("alice");

    assert_eq!(
        statuses(&svc, &alice).await,
        vec![ModuleStatus::Available, ModuleStatus::Locked, ModuleStatus::Locked]
    );

    let outcome = svc
        .apply_progress(&alice, ProgressEvent::completion("M1", 100.0))
        .await?;
    assert_eq!(outcome.status, ModuleStatus::Completed);
    assert_eq!(outcome.changes.len(), 2);
    assert_eq!(outcome.changes[0].module_id, ModuleId::from("M1"));
    assert_eq!(outcome.changes[1].module_id, ModuleId::from("M2"));
    assert_eq!(outcome.changes[1].from, ModuleStatus::Locked);
    assert_eq!(outcome.changes[1].to, ModuleStatus::Available);

    assert_eq!(
        statuses(&svc, &alice).await,
        vec![ModuleStatus::Completed, ModuleStatus::Available, ModuleStatus::Locked]
    );

    let recs = svc.recommend(&alice, Some(5), false).await;
    assert_eq!(recs.items.len(), 1);
    assert_eq!(recs.items[0].item_id, "M2");
    Ok(())
}

#[tokio::test]
async fn test_progress_then_completion_flag() -> anyhow::Result<()> {
    let svc = service();
    let alice = LearnerId::from("alice");

    let outcome = svc
        .apply_progress(&alice, ProgressEvent::completion("M1", 40.0))
        .await?;
    assert_eq!(outcome.status, ModuleStatus::InProgress);

    let outcome = svc.apply_progress(&alice, ProgressEvent::completed("M1")).await?;
    assert_eq!(outcome.status, ModuleStatus::Completed);
    assert_eq!(outcome.completion, 40.0);
    Ok(())
}

#[tokio::test]
async fn test_replayed_event_is_idempotent() -> anyhow::Result<()> {
    let svc = service();
    let alice = LearnerId::from("alice");

    let first = svc
        .apply_progress(&alice, ProgressEvent::completion("M1", 100.0).with_event_id("evt-1"))
        .await?;
    assert!(!first.duplicate);

    // Same id with a different payload still returns the recorded outcome
    let second = svc
        .apply_progress(&alice, ProgressEvent::completion("M1", 20.0).with_event_id("evt-1"))
        .await?;
    assert!(second.duplicate);
    assert_eq!(second.changes, first.changes);
    assert_eq!(second.status, ModuleStatus::Completed);

    assert_eq!(
        statuses(&svc, &alice).await,
        vec![ModuleStatus::Completed, ModuleStatus::Available, ModuleStatus::Locked]
    );
    Ok(())
}

#[tokio::test]
async fn test_completion_never_decreases_without_reset() -> anyhow::Result<()> {
    let svc = service();
    let alice = LearnerId::from("alice");

    svc.apply_progress(&alice, ProgressEvent::completion("M1", 60.0))
        .await?;

    let err = svc
        .apply_progress(&alice, ProgressEvent::completion("M1", 30.0))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ProgressError::InvalidProgress {
            module: "M1".into(),
            reason: InvalidProgressReason::Decrease {
                stored: 60.0,
                submitted: 30.0
            },
        }
    );
    let view = svc.module_view(&alice, &ModuleFilter::default(), None).await;
    assert_eq!(view.modules[0].completion, 60.0);

    let outcome = svc.apply_progress(&alice, ProgressEvent::reset("M1")).await?;
    assert_eq!(outcome.status, ModuleStatus::Available);
    assert_eq!(outcome.completion, 0.0);
    Ok(())
}

#[tokio::test]
async fn test_locked_module_rejects_progress() {
    let svc = service();
    let err = svc
        .apply_progress(&"alice".into(), ProgressEvent::completion("M3", 10.0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProgressError::InvalidProgress {
            reason: InvalidProgressReason::ModuleLocked,
            ..
        }
    ));
}

#[tokio::test]
async fn test_reset_keeps_completed_dependents() -> anyhow::Result<()> {
    let svc = service();
    let alice = LearnerId::from("alice");

    svc.apply_progress(&alice, ProgressEvent::completed("M1")).await?;
    svc.apply_progress(&alice, ProgressEvent::completion("M2", 100.0))
        .await?;
    svc.apply_progress(&alice, ProgressEvent::completion("M3", 25.0))
        .await?;

    let outcome = svc.apply_progress(&alice, ProgressEvent::reset("M1")).await?;
    assert_eq!(outcome.status, ModuleStatus::Available);
    assert_eq!(
        statuses(&svc, &alice).await,
        vec![ModuleStatus::Available, ModuleStatus::Completed, ModuleStatus::InProgress]
    );
    Ok(())
}

#[tokio::test]
async fn test_unknown_learner_gets_default_view() {
    let svc = service();
    let view = svc
        .module_view(&"nobody".into(), &ModuleFilter::default(), None)
        .await;
    assert_eq!(view.catalog_version, 1);
    assert_eq!(view.modules[0].status, ModuleStatus::Available);
    assert_eq!(svc.progress().learner_count().await, 0);
}

#[tokio::test]
async fn test_cycle_rejected_and_previous_catalog_kept() {
    let svc = service();
    let alice = LearnerId::from("alice");
    assert_ok!(svc.apply_progress(&alice, ProgressEvent::completed("M1")).await);

    let err = svc
        .replace_catalog(vec![
            ModuleDefinition::new("A", "A").with_prerequisites(["C"]),
            ModuleDefinition::new("B", "B").with_prerequisites(["A"]),
            ModuleDefinition::new("C", "C").with_prerequisites(["B"]),
        ])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        CatalogError::CycleDetected {
            cycle: vec!["A".into(), "B".into(), "C".into()]
        }
    );

    let summary = svc.catalog_summary().await;
    assert_eq!(summary.version, 1);
    assert_eq!(summary.module_count, 3);
    assert_eq!(
        statuses(&svc, &alice).await,
        vec![ModuleStatus::Completed, ModuleStatus::Available, ModuleStatus::Locked]
    );
}

#[tokio::test]
async fn test_catalog_replacement_keeps_progress() -> anyhow::Result<()> {
    let svc = service();
    let alice = LearnerId::from("alice");
    svc.apply_progress(&alice, ProgressEvent::completed("M1")).await?;

    let mut defs = chain();
    defs.push(ModuleDefinition::new("M4", "Optics").with_prerequisites(["M1"]));
    let summary = svc.replace_catalog(defs).await?;
    assert_eq!(summary.version, 2);

    let view = svc
        .module_view(&alice, &ModuleFilter::default(), Some(ModuleStatus::Available))
        .await;
    let ids: Vec<&str> = view.modules.iter().map(|m| m.module_id.as_str()).collect();
    assert_eq!(ids, vec!["M2", "M4"]);
    assert_eq!(view.catalog_version, 2);
    Ok(())
}

#[tokio::test]
async fn test_dangling_prerequisite_locks_module_with_warning() {
    let mut defs = chain();
    defs.push(ModuleDefinition::new("X", "Orphan").with_prerequisites(["ghost"]));
    let svc = service_with(defs, StaticSignals::empty(), uncached());

    let view = svc
        .module_view(&"alice".into(), &ModuleFilter::default(), None)
        .await;
    assert_eq!(view.modules[3].status, ModuleStatus::Locked);
    assert_eq!(
        view.warnings,
        vec![Diagnostic::DanglingPrerequisite {
            module_id: "X".into(),
            missing: "ghost".into(),
        }]
    );
}

#[tokio::test]
async fn test_slow_signals_degrade_to_neutral() {
    let signals = StaticSignals::empty()
        .with_performance("Physics", 0.1)
        .with_delay(Duration::from_millis(300));
    let settings = ServiceSettings {
        signal_timeout: Duration::from_millis(20),
        ..uncached()
    };
    let svc = service_with(chain(), signals, settings);

    let recs = svc.recommend(&"alice".into(), Some(3), false).await;
    assert_eq!(recs.warnings.len(), 3);
    assert!(recs
        .warnings
        .iter()
        .all(|w| matches!(w, Diagnostic::SignalUnavailable { .. })));
    assert_eq!(recs.items.len(), 1);
    assert_eq!(recs.items[0].item_id, "M1");
    assert_eq!(recs.items[0].signals.risk, 0.0);
}

#[tokio::test]
async fn test_due_tasks_ranked_alongside_modules() {
    let signals = StaticSignals::empty()
        .with_performance("Physics", 0.3)
        .with_task(TaskItem {
            id: "lab-report".to_string(),
            title: "Complete Physics Lab Report".to_string(),
            kind: ItemKind::Task,
            topic: Some("Chemistry".to_string()),
            due: Some(Utc::now() + chrono::Duration::days(2)),
            estimated_time: Some("90 min".to_string()),
        });
    let svc = service_with(chain(), signals, uncached());

    let recs = svc.recommend(&"alice".into(), None, false).await;
    let ids: Vec<&str> = recs.items.iter().map(|i| i.item_id.as_str()).collect();
    assert_eq!(ids, vec!["M1", "lab-report"]);
    assert_eq!(recs.items[1].kind, ItemKind::Task);
    assert_eq!(recs.items[1].reason, "due soon");
    assert_eq!(recs.items[1].priority, PriorityBand::Low);
}

#[tokio::test]
async fn test_recommendations_are_deterministic() {
    let signals = StaticSignals::empty().with_performance("Physics", 0.5);
    let svc = service_with(chain(), signals, uncached());
    let alice = LearnerId::from("alice");

    let first = svc.recommend(&alice, Some(5), true).await;
    let second = svc.recommend(&alice, Some(5), true).await;
    assert_eq!(first.items.len(), second.items.len());
    for (a, b) in first.items.iter().zip(&second.items) {
        assert_eq!(a.item_id, b.item_id);
        assert_eq!(a.score, b.score);
    }
    assert_eq!(first.preview, second.preview);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_keep_the_maximum() {
    let svc = Arc::new(service());
    let alice = LearnerId::from("alice");

    let mut handles = Vec::new();
    for value in (1..=40).rev() {
        let svc = svc.clone();
        let alice = alice.clone();
        handles.push(tokio::spawn(async move {
            svc.apply_progress(&alice, ProgressEvent::completion("M1", value as f64))
                .await
        }));
    }
    for handle in handles {
        // Lower values may lose the race and be rejected
        let _ = handle.await.unwrap();
    }

    let view = svc.module_view(&alice, &ModuleFilter::default(), None).await;
    assert_eq!(view.modules[0].completion, 40.0);
    assert_eq!(view.modules[0].status, ModuleStatus::InProgress);
}

#[tokio::test]
async fn test_learners_are_isolated() -> anyhow::Result<()> {
    let svc = service();
    svc.apply_progress(&"alice".into(), ProgressEvent::completed("M1"))
        .await?;

    assert_eq!(
        statuses(&svc, &"bob".into()).await,
        vec![ModuleStatus::Available, ModuleStatus::Locked, ModuleStatus::Locked]
    );

    assert!(svc.erase_learner(&"alice".into()).await);
    assert_eq!(
        statuses(&svc, &"alice".into()).await,
        vec![ModuleStatus::Available, ModuleStatus::Locked, ModuleStatus::Locked]
    );
    Ok(())
}

#[tokio::test]
async fn test_progress_survives_snapshot_roundtrip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("progress.json");

    let svc = service();
    svc.apply_progress(&"alice".into(), ProgressEvent::completed("M1"))
        .await?;
    svc.save_progress(&path).await?;

    let restored = ProgressionService::new(
        CatalogStore::with_catalog(Catalog::from_definitions(chain())?),
        ProgressStore::load(&path, 64).await?,
        Arc::new(StaticSignals::empty()),
        RecommendationEngine::new(Weights::default(), chrono::Duration::days(7))?,
        uncached(),
    );
    assert_eq!(
        statuses(&restored, &"alice".into()).await,
        vec![ModuleStatus::Completed, ModuleStatus::Available, ModuleStatus::Locked]
    );
    Ok(())
}

#[tokio::test]
async fn test_service_refuses_unbalanced_weights() {
    let mut config = Config::default();
    config.recommendation.weights.urgency = 0.9;

    let err = ProgressionService::from_config(&config).await.err();
    let message = err.map(|e| format!("{:#}", e)).unwrap_or_default();
    assert!(message.contains("must sum to 1.0"), "got: {}", message);
}
