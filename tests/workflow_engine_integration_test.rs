//! End-to-end workflow execution against the scriptable caller.
//!
//! Every test runs on a paused clock so retry backoff, polling and timeouts
//! advance instantly.

mod common;

use common::*;
use labflow_core::error::LabflowError;
use labflow_core::orchestration::{BatchOrdering, ExecutionMode, ExecutionResult, RecoveryStrategy};
use labflow_core::state_machine::{QueueStatus, WorkflowState};
use std::time::Duration;

fn assert_counts_add_up(result: &ExecutionResult) {
    assert_eq!(
        result.completed_tasks + result.failed_tasks,
        result.total_tasks,
        "counts must cover every task: {result:?}"
    );
    assert_eq!(result.task_results.len(), result.total_tasks);
}

#[tokio::test(start_paused = true)]
async fn test_dependent_workflow_completes_in_order() {
    let lab = LabFixture::new();
    let prep = lab
        .service("prep-station")
        .service_type("sample_prep")
        .capabilities(&["balance", "pipette"])
        .register()
        .await;
    let hplc = lab.service("hplc-1").capabilities(&["hplc", "uv_detector"]).register().await;
    lab.caller.set_behavior(&hplc.endpoint, Behavior::SucceedAfterPolls(4));
    let tasks = lab
        .workflow(1)
        .task("Sample Preparation")
        .task("HPLC Analysis")
        .depends(2, 1)
        .build();

    let result = lab
        .engine
        .execute_workflow(1, Some(ExecutionMode::Parallel), None, None)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.final_status, WorkflowState::Completed);
    assert_eq!(result.completed_tasks, 2);
    assert_counts_add_up(&result);
    assert_eq!(lab.caller.calls(), vec![prep.endpoint.clone(), hplc.endpoint.clone()]);
    assert_eq!(lab.store.workflow_status(1), Some(WorkflowState::Completed));
    assert!(lab.store.result_for(tasks[1]).is_some());
    assert!(!lab.engine.is_executing(1));
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_lets_the_current_level_finish() {
    let lab = LabFixture::new();
    let a = lab.service("station-a").capabilities(&["station_a"]).max_concurrent(2).register().await;
    let b = lab.service("station-b").capabilities(&["station_b"]).register().await;
    let c = lab.service("station-c").capabilities(&["station_c"]).register().await;
    lab.caller.set_behavior(&a.endpoint, Behavior::SucceedAfterPolls(2));
    lab.caller.set_behavior(&b.endpoint, Behavior::Fail("detector fault".into()));
    lab.caller.set_behavior(&c.endpoint, Behavior::SucceedAfterPolls(5));
    let tasks = lab
        .workflow(2)
        .task_requiring("Weigh Standard", &["station_a"])
        .task_requiring("Measure Blank", &["station_b"])
        .task_requiring("Measure Sample", &["station_c"])
        .task_requiring("Dilute Standard", &["station_a"])
        .depends(4, 1)
        .build();

    let result = lab
        .engine
        .execute_workflow(2, Some(ExecutionMode::Parallel), Some(RecoveryStrategy::FailFast), None)
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.final_status, WorkflowState::Failed);
    assert_eq!(result.completed_tasks, 2);
    assert_eq!(result.failed_tasks, 2);
    assert_counts_add_up(&result);

    // Both siblings of the failed task ran; the second level never started
    assert_eq!(lab.caller.invocations(&a.endpoint), 1);
    assert_eq!(lab.caller.invocations(&b.endpoint), 1);
    assert_eq!(lab.caller.invocations(&c.endpoint), 1);
    assert_eq!(result.skipped_task_ids, vec![tasks[3]]);
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_stops_sequential_workflow() {
    let lab = LabFixture::new();
    let hplc = lab.service("hplc-1").capabilities(&["hplc", "uv_detector"]).register().await;
    lab.caller.set_behavior(&hplc.endpoint, Behavior::Fail("lamp failure".into()));
    lab.workflow(3).task("HPLC Analysis").task("HPLC Confirmation").build();

    let result = lab
        .engine
        .execute_workflow(3, Some(ExecutionMode::Sequential), Some(RecoveryStrategy::FailFast), None)
        .await
        .unwrap();

    assert_eq!(result.failed_tasks, 2);
    assert_eq!(result.skipped_task_ids.len(), 1);
    assert_eq!(lab.caller.invocations(&hplc.endpoint), 1);
    assert!(result.errors.iter().any(|e| e.contains("lamp failure")));
    assert_counts_add_up(&result);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_falls_back_to_alternative() {
    let lab = LabFixture::new();
    let primary = lab.service("hplc-primary").capabilities(&["hplc", "uv_detector"]).register().await;
    lab.caller.set_behavior(&primary.endpoint, Behavior::Fail("pump pressure".into()));
    let tasks = lab.workflow(4).task("HPLC Analysis").build();

    // Queue on the primary before the backup exists
    lab.engine.scheduler().schedule_workflow(4, None, None).await.unwrap();
    let backup = lab.service("hplc-backup").capabilities(&["hplc", "uv_detector"]).register().await;

    let result = lab
        .engine
        .execute_workflow(4, None, Some(RecoveryStrategy::Retry), None)
        .await
        .unwrap();

    assert!(result.success, "errors: {:?}", result.errors);
    let outcome = &result.task_results[0];
    assert!(outcome.fallback_used);
    assert_eq!(outcome.attempts, 4);
    assert_eq!(outcome.service_id, Some(backup.id));
    assert_eq!(lab.caller.invocations(&primary.endpoint), 3);
    assert_eq!(lab.caller.invocations(&backup.endpoint), 1);

    let entry = lab
        .store
        .queue_entries()
        .into_iter()
        .find(|e| e.task_id == tasks[0])
        .unwrap();
    assert_eq!(entry.status, QueueStatus::Completed);
    assert_eq!(entry.assigned_service_id, Some(backup.id));
}

#[tokio::test(start_paused = true)]
async fn test_retry_recovers_on_same_service() {
    let lab = LabFixture::new();
    let balance = lab.service("balance-1").service_type("balance").capabilities(&["balance"]).register().await;
    lab.caller.set_behavior(&balance.endpoint, Behavior::FailTimes(1));
    lab.workflow(5).task("Weigh Sample").build();

    let result = lab
        .engine
        .execute_workflow(5, None, Some(RecoveryStrategy::Retry), None)
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.task_results[0].attempts, 2);
    assert!(!result.task_results[0].fallback_used);
}

#[tokio::test(start_paused = true)]
async fn test_failed_prerequisite_skips_dependents_under_continue() {
    let lab = LabFixture::new();
    let prep = lab
        .service("prep-station")
        .service_type("sample_prep")
        .capabilities(&["balance", "pipette"])
        .register()
        .await;
    let hplc = lab.service("hplc-1").capabilities(&["hplc", "uv_detector"]).register().await;
    lab.caller.set_behavior(&prep.endpoint, Behavior::Reject);
    let tasks = lab
        .workflow(6)
        .task("Sample Preparation")
        .task("HPLC Analysis")
        .depends(2, 1)
        .build();

    let result = lab
        .engine
        .execute_workflow(6, None, Some(RecoveryStrategy::Continue), None)
        .await
        .unwrap();

    assert_eq!(result.final_status, WorkflowState::Failed);
    assert_eq!(result.failed_tasks, 2);
    assert_eq!(result.skipped_task_ids, vec![tasks[1]]);
    assert_eq!(lab.caller.invocations(&hplc.endpoint), 0);
    assert_counts_add_up(&result);
}

#[tokio::test(start_paused = true)]
async fn test_unschedulable_task_counts_as_failed() {
    let lab = LabFixture::new();
    lab.service("prep-station")
        .service_type("sample_prep")
        .capabilities(&["balance", "pipette"])
        .register()
        .await;
    lab.workflow(7).task("Sample Preparation").task("HPLC Analysis").build();

    let result = lab
        .engine
        .execute_workflow(7, Some(ExecutionMode::Sequential), Some(RecoveryStrategy::Continue), None)
        .await
        .unwrap();

    assert_eq!(result.completed_tasks, 1);
    assert_eq!(result.failed_tasks, 1);
    assert!(!result.errors.is_empty());
    assert_counts_add_up(&result);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_dispatch_but_lets_running_task_finish() {
    let lab = LabFixture::new();
    let hplc = lab.service("hplc-1").capabilities(&["hplc", "uv_detector"]).register().await;
    lab.caller.set_behavior(&hplc.endpoint, Behavior::SucceedAfterPolls(20));
    lab.workflow(8).task("HPLC Analysis").task("HPLC Confirmation").build();

    let (result, cancelled) = tokio::join!(
        lab.engine
            .execute_workflow(8, Some(ExecutionMode::Sequential), Some(RecoveryStrategy::Continue), None),
        async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            lab.engine.cancel_workflow_execution(8).await
        }
    );
    let result = result.unwrap();

    assert_eq!(cancelled.unwrap(), 1);
    assert_eq!(result.final_status, WorkflowState::Cancelled);
    assert_eq!(result.completed_tasks, 1);
    assert_eq!(result.failed_tasks, 1);
    assert_eq!(lab.caller.invocations(&hplc.endpoint), 1);
    assert_eq!(lab.store.workflow_status(8), Some(WorkflowState::Cancelled));
    assert_counts_add_up(&result);
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_running_task() {
    let lab = LabFixture::new();
    let hplc = lab.service("hplc-1").capabilities(&["hplc", "uv_detector"]).register().await;
    lab.caller.set_behavior(&hplc.endpoint, Behavior::Hang);
    lab.workflow(9).task("HPLC Analysis").task("HPLC Confirmation").build();

    let started = tokio::time::Instant::now();
    let (result, stopped) = tokio::join!(
        lab.engine
            .execute_workflow(9, Some(ExecutionMode::Sequential), Some(RecoveryStrategy::Retry), None),
        async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            lab.engine.stop_workflow(9).await
        }
    );
    let result = result.unwrap();

    stopped.unwrap();
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(result.final_status, WorkflowState::Stopped);
    assert_eq!(result.failed_tasks, 2);
    assert_eq!(lab.caller.resets(), vec![hplc.endpoint.clone()]);
    assert_eq!(lab.engine.registry().get(hplc.id).unwrap().current_load, 0);
    assert!(lab
        .store
        .queue_entries()
        .iter()
        .all(|e| e.status != QueueStatus::Pending));
    assert_counts_add_up(&result);
}

#[tokio::test(start_paused = true)]
async fn test_pause_holds_next_task_until_resume() {
    let lab = LabFixture::new();
    let hplc = lab.service("hplc-1").capabilities(&["hplc", "uv_detector"]).register().await;
    lab.caller.set_behavior(&hplc.endpoint, Behavior::SucceedAfterPolls(3));
    lab.workflow(10).task("HPLC Analysis").task("HPLC Confirmation").build();

    let (result, ()) = tokio::join!(
        lab.engine.execute_workflow(10, Some(ExecutionMode::Sequential), None, None),
        async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            lab.engine.pause_workflow(10).await.unwrap();
            assert_eq!(lab.store.workflow_status(10), Some(WorkflowState::Paused));

            tokio::time::sleep(Duration::from_secs(120)).await;
            assert_eq!(lab.caller.invocations(&hplc.endpoint), 1);

            lab.engine.resume_workflow(10).await.unwrap();
        }
    );
    let result = result.unwrap();

    assert!(result.success);
    assert_eq!(lab.caller.invocations(&hplc.endpoint), 2);
}

#[tokio::test(start_paused = true)]
async fn test_terminal_workflow_cannot_be_executed_again() {
    let lab = LabFixture::new();
    lab.service("hplc-1").capabilities(&["hplc", "uv_detector"]).register().await;
    lab.workflow(11).task("HPLC Analysis").build();

    lab.engine.execute_workflow(11, None, None, None).await.unwrap();
    let again = lab.engine.execute_workflow(11, None, None, None).await;

    assert!(matches!(again, Err(LabflowError::StateTransition(_))));
    assert!(matches!(
        lab.engine.execute_workflow(404, None, None, None).await,
        Err(LabflowError::NotFound { .. })
    ));
    assert!(lab.engine.pause_workflow(11).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_batch_runs_in_priority_order_and_reports_failures() {
    let lab = LabFixture::new();
    let balance = lab.service("balance-1").service_type("balance").capabilities(&["balance"]).register().await;
    lab.caller.set_behavior(&balance.endpoint, Behavior::SucceedAfterPolls(1));
    lab.workflow(21).priority(7).task("Weigh Sample").build();
    lab.workflow(22).priority(1).task("Weigh Standard").build();
    lab.workflow(23).priority(4).task("Weigh Blank").build();

    let batch = lab
        .engine
        .batch_execute(&[21, 22, 23, 999], BatchOrdering::Priority, Some(1))
        .await
        .unwrap();

    assert_eq!(batch.total_workflows, 4);
    assert_eq!(batch.successful_workflows, 3);
    assert_eq!(batch.failed_workflows, 1);
    let order: Vec<i64> = batch.results.iter().map(|r| r.workflow_id).collect();
    assert_eq!(order, vec![22, 23, 21, 999]);
    assert!(batch.errors.iter().any(|e| e.contains("999")));
    assert!(batch.throughput_per_hour > 0.0);
    for result in &batch.results {
        assert_counts_add_up(result);
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_shares_a_single_slot_instrument() {
    let lab = LabFixture::new();
    let hplc = lab
        .service("hplc-solo")
        .capabilities(&["hplc", "uv_detector"])
        .max_concurrent(1)
        .register()
        .await;
    lab.caller.set_behavior(&hplc.endpoint, Behavior::SucceedAfterPolls(3));
    lab.workflow(31).task("HPLC Run A").build();
    lab.workflow(32).task("HPLC Run B").build();

    let batch = lab
        .engine
        .batch_execute(&[31, 32], BatchOrdering::Fifo, Some(2))
        .await
        .unwrap();

    assert_eq!(batch.successful_workflows, 2, "errors: {:?}", batch.errors);
    assert_eq!(batch.failed_workflows, 0);
    assert_eq!(lab.caller.invocations(&hplc.endpoint), 2);
    assert_eq!(lab.caller.peak_active(), 1);
    assert_eq!(lab.engine.registry().get(hplc.id).unwrap().current_load, 0);
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_releases_undispatched_entries() {
    let lab = LabFixture::new();
    let a = lab.service("station-a").capabilities(&["station_a"]).register().await;
    let b = lab.service("station-b").capabilities(&["station_b"]).register().await;
    lab.caller.set_behavior(&a.endpoint, Behavior::Fail("balance drift".into()));
    let tasks = lab
        .workflow(33)
        .task_requiring("Weigh Standard", &["station_a"])
        .task_requiring("Measure Standard", &["station_b"])
        .depends(2, 1)
        .build();

    let result = lab
        .engine
        .execute_workflow(33, Some(ExecutionMode::Parallel), Some(RecoveryStrategy::FailFast), None)
        .await
        .unwrap();

    assert_eq!(result.final_status, WorkflowState::Failed);
    assert_eq!(result.skipped_task_ids, vec![tasks[1]]);
    assert_eq!(lab.caller.invocations(&b.endpoint), 0);

    let entries = lab.store.queue_entries();
    assert!(entries.iter().all(|e| e.status.is_terminal()), "entries: {entries:?}");
    let skipped = entries.iter().find(|e| e.task_id == tasks[1]).unwrap();
    assert_eq!(skipped.status, QueueStatus::Cancelled);

    lab.engine.registry().deregister(b.id).await.unwrap();
    assert!(lab.engine.registry().get(b.id).is_none());
}
