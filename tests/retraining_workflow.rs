mod common;

use common::{production_model, Harness, HarnessOptions};
use ploy_retrain::domain::{RetrainingConfiguration, RetrainingKind, RetrainingState};
use ploy_retrain::error::RetrainError;
use ploy_retrain::persistence::{AuditEvent, AuditSink};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn execute(h: &Harness, strategy: &str) -> Uuid {
    let configuration = Arc::new(h.engine.default_configuration().clone());
    h.engine
        .execute(strategy, configuration, RetrainingKind::FullRetrain)
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_full_rollout_promotes_candidate() {
    let h = Harness::new(HarnessOptions::default());
    let job_id = execute(&h, "sharp_action").await;

    let job = h.wait_for_terminal(job_id).await;
    assert_eq!(job.state, RetrainingState::Completed);
    assert_eq!(job.rollout_stage_pct, 100);
    assert!(job.ab_test_result.unwrap().deployment_recommended);

    let candidate = job.candidate_model.unwrap();
    let production = h.engine.get_production_model("sharp_action").await.unwrap();
    assert_eq!(production.version_id, candidate.version_id);
    assert!(production.is_production);
    assert_eq!(h.engine.get_traffic_pct("sharp_action").await, 100);

    assert_eq!(h.traffic_changes(job_id).await, vec![10, 10, 25, 50, 100]);
    // Reference plus one check per stage
    assert_eq!(h.performance.rollout_checks.load(Ordering::SeqCst), 5);
    assert_eq!(
        h.visited_states(job_id).await,
        vec![
            RetrainingState::Pending,
            RetrainingState::PreparingData,
            RetrainingState::Optimizing,
            RetrainingState::Validating,
            RetrainingState::ABTesting,
            RetrainingState::Deploying,
            RetrainingState::Completed,
        ]
    );

    // Terminal jobs stay terminal
    assert!(!h.engine.cancel_job(job_id).await);
    assert_eq!(
        h.engine.get_job_status(job_id).await.unwrap().state,
        RetrainingState::Completed
    );
    assert_eq!(h.engine.get_job_history(Some("sharp_action"), 10).await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_regression_during_rollout_rolls_back() {
    // reference, stage 10% healthy, stage 25% down 40%
    let h = Harness::new(HarnessOptions {
        rollout_rois: vec![0.05, 0.05, 0.03],
        ..Default::default()
    });
    let seeded = production_model("sharp_action");
    h.engine.register_production_model(seeded.clone()).await;

    let job_id = execute(&h, "sharp_action").await;
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.state, RetrainingState::RolledBack);
    assert!(job.error_message.unwrap().contains("25%"));
    assert_eq!(job.rollout_stage_pct, 0);
    assert_eq!(h.engine.get_traffic_pct("sharp_action").await, 0);
    assert_eq!(
        h.engine.get_production_model("sharp_action").await.unwrap().version_id,
        seeded.version_id
    );

    // Stage 50 never attempted
    assert_eq!(h.traffic_changes(job_id).await, vec![10, 10, 25]);
    assert_eq!(h.performance.rollout_checks.load(Ordering::SeqCst), 3);
    assert_eq!(h.engine.get_engine_status().await.rolled_back, 1);
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_completes_without_change() {
    let h = Harness::new(HarnessOptions {
        validator_passes: false,
        ..Default::default()
    });
    let seeded = production_model("line_movement");
    h.engine.register_production_model(seeded.clone()).await;

    let job_id = execute(&h, "line_movement").await;
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.state, RetrainingState::Completed);
    assert!(job.ab_test_result.is_none());
    assert_eq!(
        h.engine.get_production_model("line_movement").await.unwrap().version_id,
        seeded.version_id
    );
    assert!(h.traffic_changes(job_id).await.is_empty());
    assert!(!h.visited_states(job_id).await.contains(&RetrainingState::ABTesting));
    assert_eq!(h.validator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_data_fails_before_optimizing() {
    let h = Harness::new(HarnessOptions {
        training_samples: 120,
        ..Default::default()
    });
    let job_id = execute(&h, "totals").await;
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.state, RetrainingState::Failed);
    assert!(job.error_message.unwrap().contains("Insufficient training data"));
    assert_eq!(h.optimizer.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_ab_test_goes_straight_to_rollout() {
    let h = Harness::new(HarnessOptions {
        defaults: RetrainingConfiguration {
            ab_test_enabled: false,
            rollout_stages: vec![50, 100],
            ..Default::default()
        },
        ..Default::default()
    });
    let job_id = execute(&h, "props").await;
    let job = h.wait_for_terminal(job_id).await;

    assert_eq!(job.state, RetrainingState::Completed);
    assert_eq!(h.traffic_changes(job_id).await, vec![50, 100]);
    assert!(!h.visited_states(job_id).await.contains(&RetrainingState::ABTesting));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_monitor_fails_stuck_job() {
    let h = Harness::new(HarnessOptions {
        defaults: RetrainingConfiguration {
            timeout_hours: 1.0,
            ..Default::default()
        },
        optimizer_polls: u32::MAX,
        ..Default::default()
    });
    h.engine.start();

    let unbounded = Arc::new(RetrainingConfiguration {
        timeout_hours: f64::INFINITY,
        ..Default::default()
    });
    assert!(matches!(
        h.engine
            .execute("props", unbounded, RetrainingKind::FullRetrain)
            .await,
        Err(RetrainError::InvalidConfiguration(_))
    ));

    let started = tokio::time::Instant::now();
    let job_id = execute(&h, "sharp_action").await;

    let job = h.wait_for_terminal(job_id).await;
    assert_eq!(job.state, RetrainingState::Failed);
    assert!(job.error_message.unwrap().contains("exceeded timeout of 1 hours"));

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3600));
    assert!(elapsed < Duration::from_secs(3600 + 180));
    assert_eq!(h.engine.active_job_count().await, 0);

    h.engine.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_active_jobs() {
    let h = Harness::new(HarnessOptions::default());
    let job_id = execute(&h, "sharp_action").await;
    h.wait_for(job_id, Duration::from_secs(1), |s| s == RetrainingState::ABTesting)
        .await;

    h.engine.shutdown(Duration::from_secs(10)).await;
    assert_eq!(
        h.engine.get_job_status(job_id).await.unwrap().state,
        RetrainingState::Cancelled
    );
    assert_eq!(h.engine.get_traffic_pct("sharp_action").await, 0);

    // No new work after shutdown
    let configuration = Arc::new(RetrainingConfiguration::default());
    assert!(h
        .engine
        .execute("sharp_action", configuration, RetrainingKind::FullRetrain)
        .await
        .is_err());
}

#[tokio::test]
async fn test_recover_marks_interrupted_jobs_failed() {
    let h = Harness::new(HarnessOptions::default());
    let interrupted = Uuid::new_v4();
    h.audit
        .record(AuditEvent::transition(
            interrupted,
            "sharp_action",
            RetrainingState::Optimizing,
        ))
        .await
        .unwrap();

    let recovered = h.engine.recover_interrupted().await.unwrap();
    assert_eq!(recovered, vec![interrupted]);

    let job = h.engine.get_job_status(interrupted).await.unwrap();
    assert_eq!(job.state, RetrainingState::Failed);
    assert_eq!(job.error_message.as_deref(), Some("interrupted by restart"));

    // The failure is now part of the audit trail
    assert!(h.engine.recover_interrupted().await.unwrap().is_empty());
}
