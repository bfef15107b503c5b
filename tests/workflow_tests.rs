//! End-to-end workflow tests.
//!
//! All tests use `MockLlm`; no network calls are made.

use std::sync::Arc;
use std::time::Duration;

use pressroom::{
    AgentScheduler, AgentStatus, AgentStore, EventBus, MockLlm, MockReply, SettingsStore,
    TaskStatus, Validation, WorkflowEvent,
};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

// ─────────────────────────────────────────────────────────────────────────────
// Test helpers
// ─────────────────────────────────────────────────────────────────────────────

struct Harness {
    scheduler: AgentScheduler,
    store:     Arc<AgentStore>,
    llm:       Arc<MockLlm>,
    events:    UnboundedReceiver<WorkflowEvent>,
    _dir:      TempDir,
}

fn harness(replies: Vec<MockReply>) -> Harness {
    let dir = TempDir::new().unwrap();
    let settings = Arc::new(SettingsStore::load(dir.path().join("settings.json")).unwrap());
    let store = Arc::new(AgentStore::load(dir.path().join("agents.json")).unwrap());
    let llm = Arc::new(MockLlm::new(replies));
    let (bus, events) = EventBus::channel();
    let scheduler = AgentScheduler::new(store.clone(), settings, llm.clone(), None, bus);
    Harness { scheduler, store, llm, events, _dir: dir }
}

fn plan_json(tasks: &[(u32, &str)]) -> String {
    let tasks: Vec<String> = tasks
        .iter()
        .map(|(id, name)| {
            format!(
                r#"{{"id": {id}, "name": "{name}", "description": "D{id}", "expected_output": "E{id}"}}"#
            )
        })
        .collect();
    format!(r#"{{"goal": "G", "tasks": [{}]}}"#, tasks.join(", "))
}

fn valid_verdict(score: u8) -> MockReply {
    MockReply::text(format!(r#"{{"is_valid": true, "score": {score}, "reason": "ok"}}"#))
}

fn invalid_verdict(score: u8, reason: &str) -> MockReply {
    MockReply::text(format!(
        r#"{{"is_valid": false, "score": {score}, "reason": "{reason}"}}"#
    ))
}

async fn wait_for_status(store: &AgentStore, id: &str, status: AgentStatus) {
    for _ in 0..400 {
        if store.get(id).map(|a| a.status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!(
        "agent never reached {status:?}, current: {:?}",
        store.get(id).map(|a| a.status)
    );
}

fn drain(events: &mut UnboundedReceiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

async fn wait_for_event<F>(events: &mut UnboundedReceiver<WorkflowEvent>, mut pred: F) -> WorkflowEvent
where
    F: FnMut(&WorkflowEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: happy path
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_happy_path_single_task() {
    let mut h = harness(vec![
        MockReply::text(plan_json(&[(1, "T1")])),
        MockReply::Fragments(vec!["out-1".to_string()]),
        valid_verdict(95),
    ]);

    let agent = h
        .scheduler
        .create_agent(Some("Alpha".to_string()), "", 0.5, false)
        .unwrap();
    assert_eq!(agent.status, AgentStatus::Created);

    h.scheduler.start(&agent.id).unwrap();
    wait_for_status(&h.store, &agent.id, AgentStatus::Completed).await;

    let done = h.store.get(&agent.id).unwrap();
    assert_eq!(done.goal.as_deref(), Some("G"));
    assert!(done.started_at.is_some());
    assert!(done.completed_at.is_some());

    let tasklist = done.tasklist.unwrap();
    assert_eq!(tasklist.tasks.len(), 1);
    let task = &tasklist.tasks[0];
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.output.as_deref(), Some("out-1"));
    assert_eq!(
        task.validation,
        Some(Validation { is_valid: true, score: 95, reason: "ok".to_string() })
    );
    assert!(task.completed_at.is_some());

    // Exactly one llm_request/llm_response pair each for planning,
    // execution, validation.
    let events = drain(&mut h.events);
    let requests = events
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::LlmRequest { .. }))
        .count();
    let responses = events
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::LlmResponse { success: true, .. }))
        .count();
    assert_eq!(requests, 3);
    assert_eq!(responses, 3);

    assert!(events.iter().any(|e| matches!(e, WorkflowEvent::AgentStarted { .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::TaskRunning { task_id: 1, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::TaskChunk { chunk, .. } if chunk == "out-1")));
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::TaskValidation { is_valid: true, score: 95, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::TaskCompleted { task_id: 1, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::AgentCompleted { word_count: 1, .. })));

    // Validation ran non-streaming at the fixed low temperature.
    assert_eq!(h.llm.call_count(), 3);
    let validation_call = h.llm.request_for_call(2).unwrap();
    assert!(!validation_call.stream);
    assert_eq!(validation_call.temperature, Some(0.3));
    assert!(validation_call.prompt.contains("E1"));
    assert!(validation_call.prompt.contains("out-1"));
}

#[tokio::test]
async fn test_streamed_fragments_concatenate_to_task_output() {
    let mut h = harness(vec![
        MockReply::text(plan_json(&[(1, "T1")])),
        MockReply::Fragments(vec!["He".to_string(), "llo".to_string(), " world".to_string()]),
        valid_verdict(90),
    ]);

    let agent = h.scheduler.create_agent(None, "", 0.5, false).unwrap();
    h.scheduler.start(&agent.id).unwrap();
    wait_for_status(&h.store, &agent.id, AgentStatus::Completed).await;

    let done = h.store.get(&agent.id).unwrap();
    assert_eq!(
        done.tasklist.unwrap().tasks[0].output.as_deref(),
        Some("Hello world")
    );

    // Chunks forwarded through the event stream concatenate to the output.
    let streamed: String = drain(&mut h.events)
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::TaskChunk { chunk, .. } => Some(chunk.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, "Hello world");
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: halt after plan generation, then continue
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_halt_after_plan_then_continue() {
    let mut h = harness(vec![
        MockReply::text(plan_json(&[(1, "T1")])),
        MockReply::Fragments(vec!["out-1".to_string()]),
        valid_verdict(90),
    ]);

    let agent = h.scheduler.create_agent(None, "", 0.5, false).unwrap();
    h.scheduler.set_halt(&agent.id, true).unwrap();
    h.scheduler.start(&agent.id).unwrap();

    wait_for_status(&h.store, &agent.id, AgentStatus::Halted).await;
    let halted = h.store.get(&agent.id).unwrap();
    assert!(halted.tasklist.is_some());
    assert_eq!(halted.current_phase, Some(0));

    // No task execution before continue.
    let before = drain(&mut h.events);
    assert!(before.iter().any(|e| matches!(
        e,
        WorkflowEvent::WorkflowStatus { status, .. } if status == "tasklist_generated"
    )));
    assert!(before.iter().any(|e| matches!(e, WorkflowEvent::AgentHalted { phase: Some(0), .. })));
    assert!(!before.iter().any(|e| matches!(e, WorkflowEvent::TaskRunning { .. })));
    assert_eq!(h.llm.call_count(), 1);

    h.scheduler.continue_agent(&agent.id).unwrap();
    wait_for_status(&h.store, &agent.id, AgentStatus::Completed).await;

    let after = drain(&mut h.events);
    assert!(after.iter().any(|e| matches!(e, WorkflowEvent::AgentContinued { .. })));
    assert!(after.iter().any(|e| matches!(e, WorkflowEvent::TaskCompleted { .. })));

    let done = h.store.get(&agent.id).unwrap();
    assert!(!done.halt, "continue clears the halt flag");
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: validator rejects the first task, workflow continues
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_failed_validation_does_not_abort_workflow() {
    let mut h = harness(vec![
        MockReply::text(plan_json(&[(1, "T1"), (2, "T2")])),
        MockReply::Fragments(vec!["draft-1".to_string()]),
        invalid_verdict(20, "short"),
        MockReply::Fragments(vec!["draft-2".to_string()]),
        valid_verdict(85),
    ]);

    let agent = h.scheduler.create_agent(None, "", 0.7, false).unwrap();
    h.scheduler.start(&agent.id).unwrap();
    wait_for_status(&h.store, &agent.id, AgentStatus::Completed).await;

    let done = h.store.get(&agent.id).unwrap();
    let tasklist = done.tasklist.unwrap();
    assert_eq!(tasklist.tasks[0].status, TaskStatus::Failed);
    assert_eq!(tasklist.tasks[0].validation.as_ref().unwrap().score, 20);
    assert_eq!(tasklist.tasks[1].status, TaskStatus::Completed);

    let events = drain(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::TaskFailed { task_id: 1, .. })));
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::TaskCompleted { task_id: 2, .. })));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: stop mid-stream
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_stop_mid_stream_cancels_task() {
    let fragments: Vec<String> = (0..100).map(|i| format!("tok{i} ")).collect();
    let mut h = harness(vec![
        MockReply::text(plan_json(&[(1, "T1")])),
        MockReply::PacedFragments(fragments, Duration::from_millis(20)),
        valid_verdict(99), // must never be consumed
    ]);

    let agent = h.scheduler.create_agent(None, "", 0.5, false).unwrap();
    h.scheduler.start(&agent.id).unwrap();

    // Let the stream produce at least one fragment, then pull the plug.
    wait_for_event(&mut h.events, |e| matches!(e, WorkflowEvent::TaskChunk { .. })).await;
    h.scheduler.stop(&agent.id).unwrap();

    wait_for_status(&h.store, &agent.id, AgentStatus::Stopped).await;

    // The worker observes cancellation within one fragment.
    for _ in 0..100 {
        let status = h.store.get(&agent.id).unwrap().tasklist.unwrap().tasks[0].status;
        if status == TaskStatus::Cancelled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let done = h.store.get(&agent.id).unwrap();
    assert_eq!(done.status, AgentStatus::Stopped);
    assert_eq!(done.tasklist.unwrap().tasks[0].status, TaskStatus::Cancelled);

    // No validation call was made: planning + execution only.
    assert_eq!(h.llm.call_count(), 2);
    let events = drain(&mut h.events);
    assert!(!events.iter().any(|e| matches!(e, WorkflowEvent::TaskValidation { .. })));
    assert!(events.iter().any(|e| matches!(e, WorkflowEvent::AgentStopped { .. })));
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenario: redo the failed task only
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_redo_task_reexecutes_only_the_failed_task() {
    let mut h = harness(vec![
        MockReply::Fragments(vec!["two-redo".to_string()]),
        valid_verdict(88),
    ]);

    // Manufacture a failed agent: tasks 1 and 3 completed, task 2 failed.
    let agent = h.scheduler.create_agent(None, "", 0.5, false).unwrap();
    h.store
        .update(&agent.id, |a| {
            a.goal = Some("G".to_string());
            a.tasklist = Some(pressroom::Tasklist {
                goal:  "G".to_string(),
                tasks: vec![
                    finished_task(1, "one", true),
                    finished_task(2, "bad", false),
                    finished_task(3, "three", true),
                ],
            });
            a.status = AgentStatus::Failed;
        })
        .unwrap();

    h.scheduler.redo_task(&agent.id).unwrap();
    wait_for_status(&h.store, &agent.id, AgentStatus::Completed).await;

    let done = h.store.get(&agent.id).unwrap();
    let tasks = done.tasklist.unwrap().tasks;
    assert_eq!(tasks[0].output.as_deref(), Some("one"), "task 1 untouched");
    assert_eq!(tasks[1].status, TaskStatus::Completed);
    assert_eq!(tasks[1].output.as_deref(), Some("two-redo"));
    assert_eq!(tasks[2].output.as_deref(), Some("three"), "task 3 untouched");

    // Only the redone task hit the LLM: one execution + one validation.
    assert_eq!(h.llm.call_count(), 2);

    // Task 2 is sequential, so its prompt carries task 1's prior output.
    let exec_call = h.llm.request_for_call(0).unwrap();
    assert!(exec_call.prompt.contains("one"));

    let events = drain(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::AgentRedo { task_id: Some(2), .. })));
    assert!(!events.iter().any(|e| matches!(e, WorkflowEvent::TaskRunning { task_id: 1, .. })));
    assert!(!events.iter().any(|e| matches!(e, WorkflowEvent::TaskRunning { task_id: 3, .. })));
}

fn finished_task(id: u32, output: &str, valid: bool) -> pressroom::Task {
    let mut task = pressroom::Task::new(id, format!("T{id}"), format!("D{id}"), format!("E{id}"));
    task.status = if valid { TaskStatus::Completed } else { TaskStatus::Failed };
    task.output = Some(output.to_string());
    task.validation = Some(Validation {
        is_valid: valid,
        score:    if valid { 90 } else { 10 },
        reason:   "scripted".to_string(),
    });
    task
}

// ─────────────────────────────────────────────────────────────────────────────
// Plan generation failures
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_unparseable_plan_sets_tasklist_error() {
    let mut h = harness(vec![MockReply::text("I would rather write prose than JSON")]);

    let agent = h.scheduler.create_agent(None, "", 0.5, false).unwrap();
    h.scheduler.start(&agent.id).unwrap();
    wait_for_status(&h.store, &agent.id, AgentStatus::TasklistError).await;

    let failed = h.store.get(&agent.id).unwrap();
    assert_eq!(
        failed.phase_0_response.as_deref(),
        Some("I would rather write prose than JSON"),
        "raw response preserved for inspection"
    );
    assert!(failed.tasklist.is_none());
    assert!(failed.error.is_some());

    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        WorkflowEvent::WorkflowStatus { status, .. } if status == "error"
    )));
    // The worker did not proceed to tasks.
    assert!(!events.iter().any(|e| matches!(e, WorkflowEvent::TaskRunning { .. })));
}

#[tokio::test]
async fn test_redo_tasklist_recovers_from_plan_error() {
    let mut h = harness(vec![
        MockReply::text("not json"),
        MockReply::text(plan_json(&[(1, "T1")])),
        MockReply::Fragments(vec!["out".to_string()]),
        valid_verdict(80),
    ]);

    let agent = h.scheduler.create_agent(None, "", 0.5, false).unwrap();
    h.scheduler.start(&agent.id).unwrap();
    wait_for_status(&h.store, &agent.id, AgentStatus::TasklistError).await;

    h.scheduler.redo_tasklist(&agent.id).unwrap();
    wait_for_status(&h.store, &agent.id, AgentStatus::Completed).await;

    let done = h.store.get(&agent.id).unwrap();
    assert_eq!(done.goal.as_deref(), Some("G"));
    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(
        e,
        WorkflowEvent::AgentRedo { redo_type, .. } if redo_type == "tasklist"
    )));
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport failures leave the agent resumable
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_transport_error_stops_instead_of_failing() {
    let mut h = harness(vec![
        MockReply::text(plan_json(&[(1, "T1")])),
        MockReply::Fail("connection refused".to_string()),
    ]);

    let agent = h.scheduler.create_agent(None, "", 0.5, false).unwrap();
    h.scheduler.start(&agent.id).unwrap();
    wait_for_status(&h.store, &agent.id, AgentStatus::Stopped).await;

    let stopped = h.store.get(&agent.id).unwrap();
    assert!(stopped.error.as_deref().unwrap_or("").contains("connection refused"));
    assert_eq!(stopped.tasklist.unwrap().tasks[0].status, TaskStatus::Failed);

    let events = drain(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::AgentStopped { error: Some(_), .. })));
    assert!(!events.iter().any(|e| matches!(e, WorkflowEvent::AgentFailed { .. })));
}

// ─────────────────────────────────────────────────────────────────────────────
// Halt boundaries between tasks
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_halt_between_tasks() {
    let fragments: Vec<String> = (0..20).map(|i| format!("w{i} ")).collect();
    let mut h = harness(vec![
        MockReply::text(plan_json(&[(1, "T1"), (2, "T2")])),
        MockReply::PacedFragments(fragments, Duration::from_millis(20)),
        valid_verdict(91),
        MockReply::Fragments(vec!["out-2".to_string()]),
        valid_verdict(92),
    ]);

    let agent = h.scheduler.create_agent(None, "", 0.5, false).unwrap();
    h.scheduler.start(&agent.id).unwrap();

    // Toggle halt while task 1 is still streaming.
    wait_for_event(&mut h.events, |e| matches!(e, WorkflowEvent::TaskChunk { task_id: 1, .. })).await;
    h.scheduler.set_halt(&agent.id, true).unwrap();

    wait_for_status(&h.store, &agent.id, AgentStatus::Halted).await;
    let halted = h.store.get(&agent.id).unwrap();
    assert_eq!(
        halted.tasklist.as_ref().unwrap().tasks[0].status,
        TaskStatus::Completed,
        "the in-flight task runs to completion before halting"
    );
    assert_eq!(halted.tasklist.as_ref().unwrap().tasks[1].status, TaskStatus::Created);

    let events = drain(&mut h.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::AgentHalted { task_id: Some(1), .. })));

    h.scheduler.continue_agent(&agent.id).unwrap();
    wait_for_status(&h.store, &agent.id, AgentStatus::Completed).await;
}

#[tokio::test]
async fn test_halt_during_final_task_still_completes() {
    let fragments: Vec<String> = (0..20).map(|i| format!("w{i} ")).collect();
    let mut h = harness(vec![
        MockReply::text(plan_json(&[(1, "T1")])),
        MockReply::PacedFragments(fragments, Duration::from_millis(20)),
        valid_verdict(93),
    ]);

    let agent = h.scheduler.create_agent(None, "", 0.5, false).unwrap();
    h.scheduler.start(&agent.id).unwrap();

    wait_for_event(&mut h.events, |e| matches!(e, WorkflowEvent::TaskChunk { .. })).await;
    h.scheduler.set_halt(&agent.id, true).unwrap();

    // Completing the final task always completes the agent, halt or not.
    wait_for_status(&h.store, &agent.id, AgentStatus::Completed).await;
    let events = drain(&mut h.events);
    assert!(!events.iter().any(|e| matches!(e, WorkflowEvent::AgentHalted { .. })));
}

// ─────────────────────────────────────────────────────────────────────────────
// Auto-restart
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_auto_restart_reenters_plan_generation() {
    let mut h = harness(vec![
        MockReply::text(plan_json(&[(1, "T1")])),
        MockReply::Fragments(vec!["out".to_string()]),
        valid_verdict(90),
        // Second round: the script runs dry, so the restarted plan call
        // fails with a transport error and the agent stops.
    ]);

    let agent = h.scheduler.create_agent(None, "", 0.5, true).unwrap();
    h.scheduler.start(&agent.id).unwrap();
    wait_for_status(&h.store, &agent.id, AgentStatus::Stopped).await;

    let events = drain(&mut h.events);
    assert!(events.iter().any(|e| matches!(e, WorkflowEvent::AgentCompleted { .. })));
    assert!(events.iter().any(|e| matches!(e, WorkflowEvent::AgentAutoRestart { .. })));

    // The restart attempted a fresh plan: 3 first-round calls + 1 plan call.
    assert_eq!(h.llm.call_count(), 4);
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduler guards
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_lifecycle_action_guards() {
    let h = harness(vec![]);
    let agent = h.scheduler.create_agent(None, "", 0.5, false).unwrap();

    assert!(h.scheduler.stop(&agent.id).is_err(), "cannot stop a created agent");
    assert!(h.scheduler.continue_agent(&agent.id).is_err(), "cannot continue a created agent");
    assert!(h.scheduler.redo_task(&agent.id).is_err(), "nothing to redo");
    assert!(h.scheduler.start("no-such-agent").is_err());
}

#[tokio::test]
async fn test_delete_cancels_running_worker() {
    let fragments: Vec<String> = (0..200).map(|i| format!("w{i} ")).collect();
    let mut h = harness(vec![
        MockReply::text(plan_json(&[(1, "T1")])),
        MockReply::PacedFragments(fragments, Duration::from_millis(20)),
    ]);

    let agent = h.scheduler.create_agent(None, "", 0.5, false).unwrap();
    h.scheduler.start(&agent.id).unwrap();
    wait_for_event(&mut h.events, |e| matches!(e, WorkflowEvent::TaskChunk { .. })).await;

    h.scheduler.delete(&agent.id).unwrap();
    assert!(h.store.get(&agent.id).is_none());
    assert!(!h.store.exists(&agent.id));
}
