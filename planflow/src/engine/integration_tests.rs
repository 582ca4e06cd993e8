//! End-to-end tests running plans through the engine.

use super::*;
use crate::adviser::{AdviserConfig, AdviserResponse, ChildrenFailureMode, FailurePolicy};
use crate::config::EngineConfig;
use crate::core::{OutputKind, Status};
use crate::events::CollectingEventSink;
use crate::retry::RetryConfig;
use crate::strategy::{ForLoopConfig, MatrixConfig, StrategyConfig};
use crate::testing::{
    assert_all_terminal, assert_node_status, assert_plan_status, eventually, fork_node, leaf, live_executions,
    section_node, strategy_node, AsyncTaskStep, FailingStep, FlakyNodeExecutionStore, OutcomeStep, PlanFixture,
    RecordingStep, SlowStep,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn test_config() -> EngineConfig {
    EngineConfig::default().with_collaborator_retry(RetryConfig::immediate().with_max_attempts(3))
}

fn builder(events: &Arc<CollectingEventSink>) -> EngineBuilder {
    OrchestrationEngine::builder()
        .config(test_config())
        .event_sink(Arc::clone(events) as Arc<dyn EventSink>)
}

async fn finish(engine: &OrchestrationEngine, plan_execution_id: &str) -> PlanExecution {
    tokio::time::timeout(WAIT, engine.await_plan(plan_execution_id))
        .await
        .expect("plan did not finish in time")
        .unwrap()
}

async fn status_of(engine: &OrchestrationEngine, plan_execution_id: &str, identifier: &str) -> Option<Status> {
    engine
        .node_executions(plan_execution_id)
        .await
        .ok()?
        .into_iter()
        .find(|execution| !execution.old_retry && execution.identifier == identifier)
        .map(|execution| execution.status)
}

#[tokio::test]
async fn test_chain_runs_in_order() {
    let events = Arc::new(CollectingEventSink::new());
    let step = Arc::new(RecordingStep::new("SHELL"));
    let engine = builder(&events).shared_step(step.clone()).build().unwrap();

    let plan = PlanFixture::chain("deploy", "SHELL", &["checkout", "build", "publish"]).build();
    let id = engine.submit(plan).await.unwrap();
    let result = finish(&engine, &id).await;

    assert_plan_status(&result, Status::Succeeded);
    let order: Vec<String> = step.invocations().into_iter().map(|i| i.identifier).collect();
    assert_eq!(order, vec!["checkout", "build", "publish"]);

    let executions = engine.node_executions(&id).await.unwrap();
    assert_all_terminal(&executions);
    let build = assert_node_status(&executions, "build", Status::Succeeded);
    let checkout = assert_node_status(&executions, "checkout", Status::Succeeded);
    assert_eq!(build.previous_id.as_deref(), Some(checkout.uuid.as_str()));
    assert_eq!(build.parent_id, checkout.parent_id);

    assert_eq!(events.events_of_type("plan.started").len(), 1);
    assert_eq!(
        events.events_of_type("plan.ended"),
        vec![EngineEvent::PlanEnded {
            plan_execution_id: id.clone(),
            status: Status::Succeeded
        }]
    );
    assert!(result.root_node_execution_id.is_some());
}

#[tokio::test]
async fn test_matrix_fan_out_skips_excluded_combination() {
    let events = Arc::new(CollectingEventSink::new());
    let step = Arc::new(RecordingStep::new("SHELL"));
    let engine = builder(&events).shared_step(step.clone()).build().unwrap();

    let matrix = MatrixConfig::new()
        .with_axis("os", ["linux", "windows"])
        .with_axis("arch", ["x86", "arm"])
        .with_exclude([("os", "windows"), ("arch", "arm")]);
    let plan = PlanFixture::new("matrix")
        .node(strategy_node("matrix", "build", StrategyConfig::Matrix(matrix)))
        .node(leaf("build", "SHELL"))
        .build();

    let id = engine.submit(plan).await.unwrap();
    assert_plan_status(&finish(&engine, &id).await, Status::Succeeded);

    let mut identifiers: Vec<String> = step.invocations().into_iter().map(|i| i.identifier).collect();
    identifiers.sort();
    assert_eq!(step.call_count(), 3);

    let executions = engine.node_executions(&id).await.unwrap();
    let mut children: Vec<&str> = executions
        .iter()
        .filter(|execution| execution.node_id == "build")
        .map(|execution| execution.identifier.as_str())
        .collect();
    children.sort_unstable();
    assert_eq!(children, vec!["build_arm_linux", "build_x86_linux", "build_x86_windows"]);
    assert!(identifiers.iter().all(|identifier| identifier == "build"));
}

#[tokio::test]
async fn test_for_loop_children_carry_iteration_metadata() {
    let events = Arc::new(CollectingEventSink::new());
    let step = Arc::new(RecordingStep::new("SHELL"));
    let engine = builder(&events).shared_step(step.clone()).build().unwrap();

    let plan = PlanFixture::new("loop")
        .node(strategy_node("loop", "work", StrategyConfig::ForLoop(ForLoopConfig::new(3))))
        .node(leaf("work", "SHELL"))
        .build();
    let id = engine.submit(plan).await.unwrap();
    assert_plan_status(&finish(&engine, &id).await, Status::Succeeded);

    let executions = engine.node_executions(&id).await.unwrap();
    let mut iterations: Vec<(usize, usize)> = executions
        .iter()
        .filter_map(|execution| execution.strategy_metadata())
        .map(|metadata| (metadata.current_iteration, metadata.total_iterations))
        .collect();
    iterations.sort_unstable();
    assert_eq!(iterations, vec![(0, 3), (1, 3), (2, 3)]);
    for index in 0..3 {
        assert_node_status(&executions, &format!("work_{index}"), Status::Succeeded);
    }

    let resumed = events.events_of_type("node.children_resumed");
    assert_eq!(resumed.len(), 1);
    assert!(matches!(
        &resumed[0],
        EngineEvent::ChildrenResumed { children: 3, status: Status::Succeeded, .. }
    ));
}

#[tokio::test]
async fn test_fail_fast_parent_fails_with_one_failed_child() {
    let events = Arc::new(CollectingEventSink::new());
    let engine = builder(&events)
        .step(RecordingStep::new("OK"))
        .step(FailingStep::new("BAD", "exit code 2"))
        .build()
        .unwrap();

    let plan = PlanFixture::new("fork")
        .node(fork_node("fork", &["good", "bad"]))
        .node(leaf("good", "OK"))
        .node(leaf("bad", "BAD"))
        .build();
    let id = engine.submit(plan).await.unwrap();
    let result = finish(&engine, &id).await;

    assert_plan_status(&result, Status::Failed);
    let executions = engine.node_executions(&id).await.unwrap();
    assert_node_status(&executions, "good", Status::Succeeded);
    assert_node_status(&executions, "bad", Status::Failed);
    assert_node_status(&executions, "fork", Status::Failed);
    assert!(result
        .failures
        .iter()
        .any(|failure| failure.identifier.as_deref() == Some("bad") && failure.message == "exit code 2"));
}

#[tokio::test]
async fn test_best_effort_parent_succeeds_and_records_failed_child() {
    let events = Arc::new(CollectingEventSink::new());
    let engine = builder(&events)
        .step(RecordingStep::new("OK"))
        .step(FailingStep::new("BAD", "exit code 2"))
        .build()
        .unwrap();

    let plan = PlanFixture::new("fork")
        .node(
            fork_node("fork", &["good", "bad"])
                .with_adviser(AdviserConfig::new().with_children_failure_mode(ChildrenFailureMode::BestEffort)),
        )
        .node(leaf("good", "OK"))
        .node(leaf("bad", "BAD"))
        .build();
    let id = engine.submit(plan).await.unwrap();
    assert_plan_status(&finish(&engine, &id).await, Status::Succeeded);

    let executions = engine.node_executions(&id).await.unwrap();
    let fork = assert_node_status(&executions, "fork", Status::Succeeded);
    let outputs = engine.outputs_of(&fork.uuid).await.unwrap();

    let failed = outputs
        .iter()
        .find(|output| output.kind == OutputKind::SweepingOutput && output.name == FAILED_CHILDREN_OUTPUT)
        .expect("failed children output");
    assert_eq!(failed.value, json!(["bad"]));

    let children = outputs
        .iter()
        .find(|output| output.kind == OutputKind::Outcome && output.name == CHILDREN_OUTCOME)
        .expect("children outcome");
    assert_eq!(children.value["good"]["status"], json!("SUCCEEDED"));
    assert_eq!(children.value["bad"]["status"], json!("FAILED"));
}

#[tokio::test]
async fn test_retry_replays_succeeded_leaf_without_running_it() {
    let events = Arc::new(CollectingEventSink::new());
    let producer = Arc::new(OutcomeStep::new("OUT"));
    let flaky = Arc::new(FailingStep::new("FLAKY", "registry unavailable").failing_times(1));
    let engine = builder(&events)
        .shared_step(producer.clone())
        .shared_step(flaky.clone())
        .build()
        .unwrap();

    let plan = PlanFixture::new("release")
        .node(section_node("root", "package"))
        .node(
            leaf("package", "OUT")
                .with_params(json!({"outcomes": {"artifact": "app-1.2.tar"}}))
                .with_next("upload"),
        )
        .node(leaf("upload", "FLAKY"))
        .build();

    let first = engine.submit(plan).await.unwrap();
    assert_plan_status(&finish(&engine, &first).await, Status::Failed);
    let original = engine.node_executions(&first).await.unwrap();
    let original_package = assert_node_status(&original, "package", Status::Succeeded).clone();

    let second = engine
        .retry_plan(&first, &RetryRequest::failed_only())
        .await
        .unwrap();
    let result = finish(&engine, &second).await;
    assert_plan_status(&result, Status::Succeeded);
    assert_eq!(result.retry_of.as_deref(), Some(first.as_str()));

    assert_eq!(producer.call_count(), 1);
    assert_eq!(flaky.call_count(), 2);

    let replayed = engine.node_executions(&second).await.unwrap();
    let package = assert_node_status(&replayed, "package", Status::Succeeded);
    assert_eq!(
        package.kind,
        ExecutionKind::Identity {
            original_node_execution_id: original_package.uuid.clone()
        }
    );
    assert_eq!(
        engine.outputs_of(&package.uuid).await.unwrap(),
        engine.outputs_of(&original_package.uuid).await.unwrap()
    );
    let upload = assert_node_status(&replayed, "upload", Status::Succeeded);
    assert_eq!(upload.kind, ExecutionKind::Normal);
    assert_eq!(
        package.ambiance.retry_info.as_ref().map(|info| info.parent_retry_id.as_str()),
        Some(first.as_str())
    );
}

#[tokio::test]
async fn test_retry_of_succeeded_plan_is_rejected() {
    let events = Arc::new(CollectingEventSink::new());
    let engine = builder(&events).step(RecordingStep::new("SHELL")).build().unwrap();

    let id = engine
        .submit(PlanFixture::new("p").node(leaf("only", "SHELL")).build())
        .await
        .unwrap();
    finish(&engine, &id).await;

    let err = engine
        .retry_plan(&id, &RetryRequest::failed_only())
        .await
        .unwrap_err();
    assert!(matches!(err, PlanflowError::RetryRejected(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_abort_mid_fan_out_stops_running_children() {
    let events = Arc::new(CollectingEventSink::new());
    let engine = builder(&events)
        .step(RecordingStep::new("FAST"))
        .step(SlowStep::with_delay_ms("SLOW", 30_000))
        .build()
        .unwrap();

    let plan = PlanFixture::new("fan")
        .node(fork_node("fork", &["fast_a", "fast_b", "slow_a", "slow_b"]))
        .node(leaf("fast_a", "FAST"))
        .node(leaf("fast_b", "FAST"))
        .node(leaf("slow_a", "SLOW"))
        .node(leaf("slow_b", "SLOW"))
        .build();
    let id = engine.submit(plan).await.unwrap();

    let ready = eventually(WAIT, || async {
        status_of(&engine, &id, "fast_a").await == Some(Status::Succeeded)
            && status_of(&engine, &id, "fast_b").await == Some(Status::Succeeded)
            && status_of(&engine, &id, "slow_a").await == Some(Status::Running)
            && status_of(&engine, &id, "slow_b").await == Some(Status::Running)
    })
    .await;
    assert!(ready, "fan-out did not reach the expected state");

    assert_eq!(engine.abort(&id).await.unwrap(), 2);
    let result = finish(&engine, &id).await;
    assert_plan_status(&result, Status::Aborted);

    let executions = engine.node_executions(&id).await.unwrap();
    assert_all_terminal(&executions);
    assert_node_status(&executions, "slow_a", Status::Aborted);
    assert_node_status(&executions, "slow_b", Status::Aborted);
    assert_node_status(&executions, "fast_a", Status::Succeeded);

    let resumed = events.events_of_type("node.children_resumed");
    assert_eq!(resumed.len(), 1);
    assert!(matches!(
        &resumed[0],
        EngineEvent::ChildrenResumed { children: 4, status: Status::Aborted, .. }
    ));

    let err = engine.abort(&id).await.unwrap_err();
    assert!(matches!(err, PlanflowError::InvalidState(_)));
}

#[tokio::test]
async fn test_async_step_resumes_on_task_completion() {
    let events = Arc::new(CollectingEventSink::new());
    let step = Arc::new(AsyncTaskStep::new("APPROVAL"));
    let engine = builder(&events).shared_step(step.clone()).build().unwrap();

    let id = engine
        .submit(PlanFixture::new("p").node(leaf("approve", "APPROVAL")).build())
        .await
        .unwrap();

    assert!(eventually(WAIT, || async { !step.callback_ids().is_empty() }).await);
    assert!(
        eventually(WAIT, || async {
            status_of(&engine, &id, "approve").await == Some(Status::AsyncWaiting)
        })
        .await
    );

    let callback_id = step.callback_ids()[0].clone();
    let response = StepResponse::succeeded().with_outcome("approved_by", json!("ops"));
    assert!(engine.complete_task(&callback_id, response.clone()));
    assert!(!engine.complete_task(&callback_id, response));

    assert_plan_status(&finish(&engine, &id).await, Status::Succeeded);
    let executions = engine.node_executions(&id).await.unwrap();
    let approve = assert_node_status(&executions, "approve", Status::Succeeded);
    let outputs = engine.outputs_of(&approve.uuid).await.unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(outputs[0].value, json!("ops"));
    assert_eq!(events.events_of_type("correlation.dropped").len(), 1);
}

#[tokio::test]
async fn test_retry_policy_reruns_until_success() {
    let events = Arc::new(CollectingEventSink::new());
    let step = Arc::new(FailingStep::new("FLAKY", "connection reset").failing_times(2));
    let engine = builder(&events).shared_step(step.clone()).build().unwrap();

    let node = leaf("fetch", "FLAKY").with_adviser(
        AdviserConfig::new().with_on_failure(FailurePolicy::retry(3, RetryConfig::immediate().with_base_delay_ms(5))),
    );
    let id = engine
        .submit(PlanFixture::new("p").node(node).build())
        .await
        .unwrap();
    assert_plan_status(&finish(&engine, &id).await, Status::Succeeded);

    assert_eq!(step.call_count(), 3);
    let executions = engine.node_executions(&id).await.unwrap();
    assert_eq!(executions.len(), 3);
    assert_eq!(executions.iter().filter(|execution| execution.old_retry).count(), 2);
    let live = assert_node_status(&executions, "fetch", Status::Succeeded);
    assert_eq!(live.retry_ids.len(), 2);
    assert_eq!(live.ambiance.current_level().map(|level| level.retry_index), Some(2));
    assert_eq!(events.events_of_type("node.retried").len(), 2);
}

#[tokio::test]
async fn test_retry_policy_exhausted_marks_failed() {
    let events = Arc::new(CollectingEventSink::new());
    let step = Arc::new(FailingStep::new("FLAKY", "connection reset"));
    let engine = builder(&events).shared_step(step.clone()).build().unwrap();

    let node = leaf("fetch", "FLAKY")
        .with_adviser(AdviserConfig::new().with_on_failure(FailurePolicy::retry(2, RetryConfig::immediate())));
    let id = engine
        .submit(PlanFixture::new("p").node(node).build())
        .await
        .unwrap();
    let result = finish(&engine, &id).await;

    assert_plan_status(&result, Status::Failed);
    assert_eq!(step.call_count(), 3);
    assert_eq!(live_executions(&engine.node_executions(&id).await.unwrap(), "fetch").len(), 1);
}

#[tokio::test]
async fn test_intervention_mark_success_unblocks_plan() {
    let events = Arc::new(CollectingEventSink::new());
    let engine = builder(&events)
        .step(FailingStep::new("BAD", "quota exceeded"))
        .step(RecordingStep::new("OK"))
        .build()
        .unwrap();

    let plan = PlanFixture::new("p")
        .node(section_node("root", "gate"))
        .node(
            leaf("gate", "BAD").with_adviser(
                AdviserConfig::new()
                    .with_next("after")
                    .with_on_failure(FailurePolicy::manual_intervention(None, InterventionAction::Abort)),
            ),
        )
        .node(leaf("after", "OK"))
        .build();
    let id = engine.submit(plan).await.unwrap();

    assert!(
        eventually(WAIT, || async {
            status_of(&engine, &id, "gate").await == Some(Status::InterventionWaiting)
        })
        .await
    );
    assert_eq!(events.events_of_type("node.intervention_waiting").len(), 1);

    let gate = engine
        .node_executions(&id)
        .await
        .unwrap()
        .into_iter()
        .find(|execution| execution.identifier == "gate")
        .unwrap();
    engine
        .intervene(&gate.uuid, InterventionAction::MarkSuccess)
        .await
        .unwrap();

    assert_plan_status(&finish(&engine, &id).await, Status::Succeeded);
    let executions = engine.node_executions(&id).await.unwrap();
    assert_node_status(&executions, "gate", Status::Succeeded);
    assert_node_status(&executions, "after", Status::Succeeded);

    let err = engine
        .intervene(&gate.uuid, InterventionAction::MarkFailed)
        .await
        .unwrap_err();
    assert!(matches!(err, PlanflowError::InvalidState(_)));
}

#[tokio::test]
async fn test_intervention_timeout_applies_fallback() {
    let events = Arc::new(CollectingEventSink::new());
    let engine = builder(&events)
        .step(FailingStep::new("BAD", "quota exceeded"))
        .build()
        .unwrap();

    let node = leaf("gate", "BAD").with_adviser(
        AdviserConfig::new()
            .with_on_failure(FailurePolicy::manual_intervention(Some(30), InterventionAction::MarkFailed)),
    );
    let id = engine
        .submit(PlanFixture::new("p").node(node).build())
        .await
        .unwrap();

    assert_plan_status(&finish(&engine, &id).await, Status::Failed);
    let executions = engine.node_executions(&id).await.unwrap();
    let gate = assert_node_status(&executions, "gate", Status::Failed);
    assert_eq!(gate.adviser_response, Some(AdviserResponse::MarkFailed));
}

#[tokio::test]
async fn test_unregistered_step_type_fails_plan() {
    let events = Arc::new(CollectingEventSink::new());
    let engine = builder(&events).step(SlowStep::with_delay_ms("SLOW", 30_000)).build().unwrap();

    let plan = PlanFixture::new("p")
        .node(fork_node("fork", &["mystery", "slow"]))
        .node(leaf("mystery", "TELEPORT"))
        .node(leaf("slow", "SLOW"))
        .build();
    let id = engine.submit(plan).await.unwrap();
    let result = finish(&engine, &id).await;

    assert_plan_status(&result, Status::Failed);
    assert!(result
        .failures
        .iter()
        .any(|failure| failure.message.contains("no step registered for type 'TELEPORT'")));
    let executions = engine.node_executions(&id).await.unwrap();
    assert_node_status(&executions, "mystery", Status::Failed);
    assert_node_status(&executions, "slow", Status::Aborted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_max_concurrency_limits_running_children() {
    let events = Arc::new(CollectingEventSink::new());
    let step = Arc::new(SlowStep::with_delay_ms("SLOW", 30));
    let engine = builder(&events).shared_step(step.clone()).build().unwrap();

    let strategy = StrategyConfig::ForLoop(ForLoopConfig::new(6).with_max_concurrency(2));
    let plan = PlanFixture::new("p")
        .node(strategy_node("loop", "work", strategy))
        .node(leaf("work", "SLOW"))
        .build();
    let id = engine.submit(plan).await.unwrap();
    assert_plan_status(&finish(&engine, &id).await, Status::Succeeded);

    assert!(step.max_running() <= 2, "ran {} at once", step.max_running());
    let executions = engine.node_executions(&id).await.unwrap();
    for index in 0..6 {
        assert_node_status(&executions, &format!("work_{index}"), Status::Succeeded);
    }
}

#[tokio::test]
async fn test_leaf_timeout_expires_node() {
    let events = Arc::new(CollectingEventSink::new());
    let engine = builder(&events)
        .step(SlowStep::with_delay_ms("SLOW", 30_000))
        .build()
        .unwrap();

    let plan = PlanFixture::new("p")
        .node(section_node("root", "hang"))
        .node(leaf("hang", "SLOW").with_timeout_ms(50))
        .build();
    let id = engine.submit(plan).await.unwrap();
    let result = finish(&engine, &id).await;

    assert_plan_status(&result, Status::Failed);
    let executions = engine.node_executions(&id).await.unwrap();
    let hang = assert_node_status(&executions, "hang", Status::Expired);
    assert!(hang
        .failure_info
        .as_ref()
        .is_some_and(|failure| failure.message.contains("timed out")));
}

#[tokio::test]
async fn test_sibling_resolves_outcome_of_previous_node() {
    let events = Arc::new(CollectingEventSink::new());
    let step = Arc::new(OutcomeStep::new("OUT"));
    let engine = builder(&events).shared_step(step.clone()).build().unwrap();

    let plan = PlanFixture::new("p")
        .node(section_node("root", "producer"))
        .node(
            leaf("producer", "OUT")
                .with_params(json!({"outcomes": {"version": "1.2.0"}}))
                .with_next("consumer"),
        )
        .node(leaf("consumer", "OUT").with_params(json!({"reads": ["version", "unknown"]})))
        .build();
    let id = engine.submit(plan).await.unwrap();
    assert_plan_status(&finish(&engine, &id).await, Status::Succeeded);

    assert_eq!(
        step.reads(),
        vec![
            ("version".to_string(), Some(json!("1.2.0"))),
            ("unknown".to_string(), None),
        ]
    );
}

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let events = Arc::new(CollectingEventSink::new());
    let store = Arc::new(FlakyNodeExecutionStore::new(
        Arc::new(crate::persistence::InMemoryNodeExecutionStore::new()),
        2,
    ));
    let engine = builder(&events)
        .node_execution_store(store.clone())
        .step(RecordingStep::new("SHELL"))
        .build()
        .unwrap();

    let id = engine
        .submit(PlanFixture::chain("p", "SHELL", &["a", "b"]).build())
        .await
        .unwrap();
    assert_plan_status(&finish(&engine, &id).await, Status::Succeeded);
    assert_eq!(store.injected(), 2);
}

#[tokio::test]
async fn test_submit_rejects_invalid_plan() {
    let engine = OrchestrationEngine::new(test_config()).unwrap();
    let mut plan = PlanFixture::new("p").node(leaf("only", "SHELL")).build();
    plan.root_node_id = "missing".to_string();

    let err = engine.submit(plan).await.unwrap_err();
    assert!(matches!(err, PlanflowError::Validation(_)));
}

#[tokio::test]
async fn test_submit_plan_keeps_given_execution_id() {
    let engine = OrchestrationEngine::builder()
        .config(test_config())
        .step(RecordingStep::new("SHELL"))
        .build()
        .unwrap();

    let plan = PlanFixture::new("p").node(leaf("only", "SHELL")).build();
    let ambiance = Ambiance::new("p", "exec-42").with_setup_abstraction("accountId", "acme");
    let id = engine.submit_plan(plan, ambiance).await.unwrap();
    assert_eq!(id, "exec-42");

    let result = finish(&engine, &id).await;
    assert_plan_status(&result, Status::Succeeded);
    let executions = engine.node_executions(&id).await.unwrap();
    assert_eq!(executions[0].ambiance.account_id(), Some("acme"));
    engine.wait_idle().await;
}

#[tokio::test]
async fn test_identity_leaf_replays_failed_original_without_running_it() {
    let events = Arc::new(CollectingEventSink::new());
    let step = Arc::new(FailingStep::new("BAD", "exit code 2"));
    let engine = builder(&events).shared_step(step.clone()).build().unwrap();

    let first = engine
        .submit(PlanFixture::new("p").node(leaf("deploy", "BAD")).build())
        .await
        .unwrap();
    assert_plan_status(&finish(&engine, &first).await, Status::Failed);
    let original = engine.node_executions(&first).await.unwrap();
    let original_deploy = assert_node_status(&original, "deploy", Status::Failed).clone();

    let replay = PlanFixture::new("p")
        .node(leaf("deploy", "BAD").into_identity(original_deploy.uuid.clone()))
        .build();
    let second = engine.submit(replay).await.unwrap();
    let result = finish(&engine, &second).await;

    assert_plan_status(&result, Status::Failed);
    assert_eq!(step.call_count(), 1);
    let executions = engine.node_executions(&second).await.unwrap();
    let deploy = assert_node_status(&executions, "deploy", Status::Failed);
    assert_eq!(
        deploy.failure_info.as_ref().map(|failure| failure.message.as_str()),
        Some("exit code 2")
    );
}

#[tokio::test]
async fn test_retry_replays_skipped_leaf_as_skipped() {
    let events = Arc::new(CollectingEventSink::new());
    let lint = Arc::new(RecordingStep::new("LINT").with_response(StepResponse::skipped("no sources changed")));
    let flaky = Arc::new(FailingStep::new("FLAKY", "registry unavailable").failing_times(1));
    let engine = builder(&events)
        .shared_step(lint.clone())
        .shared_step(flaky.clone())
        .build()
        .unwrap();

    let plan = PlanFixture::new("ci")
        .node(section_node("root", "lint"))
        .node(leaf("lint", "LINT").with_next("publish"))
        .node(leaf("publish", "FLAKY"))
        .build();
    let first = engine.submit(plan).await.unwrap();
    assert_plan_status(&finish(&engine, &first).await, Status::Failed);
    let original = engine.node_executions(&first).await.unwrap();
    let original_lint = assert_node_status(&original, "lint", Status::Skipped).clone();

    let second = engine
        .retry_plan(&first, &RetryRequest::failed_only())
        .await
        .unwrap();
    assert_plan_status(&finish(&engine, &second).await, Status::Succeeded);

    assert_eq!(lint.call_count(), 1);
    assert_eq!(flaky.call_count(), 2);
    let executions = engine.node_executions(&second).await.unwrap();
    let replayed = assert_node_status(&executions, "lint", Status::Skipped);
    assert_eq!(
        replayed.kind,
        ExecutionKind::Identity {
            original_node_execution_id: original_lint.uuid.clone()
        }
    );
    assert_eq!(assert_node_status(&executions, "publish", Status::Succeeded).kind, ExecutionKind::Normal);
}

#[tokio::test]
async fn test_retry_of_failed_matrix_reruns_only_failed_iteration() {
    let events = Arc::new(CollectingEventSink::new());
    let step = Arc::new(FailingStep::new("BUILD", "linker crashed").failing_times(1));
    let engine = builder(&events).shared_step(step.clone()).build().unwrap();

    let matrix = MatrixConfig::new().with_axis("os", ["linux", "windows", "macos"]);
    let plan = PlanFixture::new("matrix")
        .node(strategy_node("matrix", "build", StrategyConfig::Matrix(matrix)))
        .node(leaf("build", "BUILD"))
        .build();
    let first = engine.submit(plan).await.unwrap();
    assert_plan_status(&finish(&engine, &first).await, Status::Failed);
    assert_eq!(step.call_count(), 3);

    let original = engine.node_executions(&first).await.unwrap();
    let failed: Vec<&NodeExecution> = original
        .iter()
        .filter(|execution| execution.node_id == "build" && execution.status == Status::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    let failed_identifier = failed[0].identifier.clone();

    let second = engine
        .retry_plan(&first, &RetryRequest::failed_only())
        .await
        .unwrap();
    assert_plan_status(&finish(&engine, &second).await, Status::Succeeded);
    assert_eq!(step.call_count(), 4);

    let executions = engine.node_executions(&second).await.unwrap();
    let parent = assert_node_status(&executions, "matrix", Status::Succeeded);
    assert!(matches!(parent.kind, ExecutionKind::Identity { .. }));
    let children: Vec<&NodeExecution> = executions.iter().filter(|execution| execution.node_id == "build").collect();
    assert_eq!(children.len(), 3);
    for child in children {
        assert_eq!(child.status, Status::Succeeded);
        if child.identifier == failed_identifier {
            assert_eq!(child.kind, ExecutionKind::Normal);
        } else {
            assert!(matches!(child.kind, ExecutionKind::Identity { .. }), "{} was not replayed", child.identifier);
        }
    }
}

#[tokio::test]
async fn test_abort_cancels_task_wait_of_async_leaf() {
    let events = Arc::new(CollectingEventSink::new());
    let step = Arc::new(AsyncTaskStep::new("APPROVAL"));
    let engine = builder(&events).shared_step(step.clone()).build().unwrap();

    let id = engine
        .submit(PlanFixture::new("p").node(leaf("approve", "APPROVAL")).build())
        .await
        .unwrap();
    assert!(
        eventually(WAIT, || async {
            status_of(&engine, &id, "approve").await == Some(Status::AsyncWaiting)
        })
        .await
    );

    assert_eq!(engine.abort(&id).await.unwrap(), 1);
    assert_plan_status(&finish(&engine, &id).await, Status::Aborted);
    engine.wait_idle().await;

    assert_eq!(engine.waiter().pending_waits(), 0);
    assert!(engine.core.task_waits.is_empty());
}

#[tokio::test]
async fn test_await_unknown_plan_fails_without_waiting() {
    let events = Arc::new(CollectingEventSink::new());
    let engine = builder(&events).build().unwrap();

    let result = tokio::time::timeout(Duration::from_secs(1), engine.await_plan("no-such-run"))
        .await
        .expect("await_plan hung on an unknown id");
    assert!(matches!(result, Err(PlanflowError::Persistence(_))));
}

#[tokio::test]
async fn test_await_after_plan_ended_returns_record() {
    let events = Arc::new(CollectingEventSink::new());
    let engine = builder(&events).step(RecordingStep::new("SHELL")).build().unwrap();

    let id = engine
        .submit(PlanFixture::new("p").node(leaf("only", "SHELL")).build())
        .await
        .unwrap();
    finish(&engine, &id).await;
    engine.wait_idle().await;

    let again = tokio::time::timeout(Duration::from_secs(1), engine.await_plan(&id))
        .await
        .expect("await_plan hung on an ended plan")
        .unwrap();
    assert_plan_status(&again, Status::Succeeded);
}

#[tokio::test]
async fn test_ended_plan_releases_engine_state() {
    let events = Arc::new(CollectingEventSink::new());
    let flaky = Arc::new(FailingStep::new("FLAKY", "registry unavailable").failing_times(1));
    let engine = builder(&events)
        .step(RecordingStep::new("OK"))
        .shared_step(flaky.clone())
        .build()
        .unwrap();

    let plan = PlanFixture::new("fork")
        .node(fork_node("fork", &["good", "flaky"]))
        .node(leaf("good", "OK"))
        .node(leaf("flaky", "FLAKY"))
        .build();
    let first = engine.submit(plan).await.unwrap();
    assert_plan_status(&finish(&engine, &first).await, Status::Failed);
    engine.wait_idle().await;

    assert!(!engine.core.plans.contains_key(&first));
    assert!(!engine.core.signals.contains_key(&first));
    assert_eq!(engine.waiter().pending_waits(), 0);
    assert_eq!(engine.waiter().retained_responses(), 0);

    let record = engine.plan_execution(&first).await.unwrap();
    assert!(record.plan.is_some());
    let second = engine
        .retry_plan(&first, &RetryRequest::failed_only())
        .await
        .unwrap();
    assert_plan_status(&finish(&engine, &second).await, Status::Succeeded);
    engine.wait_idle().await;
    assert!(engine.core.plans.is_empty());
    assert_eq!(engine.waiter().retained_responses(), 0);
}
