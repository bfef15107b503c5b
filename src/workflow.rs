//! Agent lifecycle scheduling and workflow execution.
//!
//! Each started agent gets one spawned worker that runs plan generation,
//! then the tasks in ascending id order, observing halt boundaries and the
//! cancellation flag at every suspension point. The scheduler is the public
//! orchestration surface: start, stop, continue, redo, delete.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::control::{CancelToken, ContinueGate, CONTINUE_WAIT_CEILING};
use crate::error::{Error, Result};
use crate::events::{EventBus, WorkflowEvent};
use crate::extract;
use crate::llm::{CallContext, LlmCaller, LlmRequest};
use crate::prompt;
use crate::retriever::Retriever;
use crate::settings::SettingsStore;
use crate::store::AgentStore;
use crate::task::TaskExecutor;
use crate::types::{Agent, AgentStatus, Task, TaskStatus, Tasklist};

/// Delay before an `auto` agent restarts after completing.
const AUTO_RESTART_DELAY: Duration = Duration::from_secs(2);

struct WorkerHandle {
    join:   JoinHandle<()>,
    cancel: CancelToken,
    gate:   Arc<ContinueGate>,
}

struct SchedulerInner {
    store:    Arc<AgentStore>,
    settings: Arc<SettingsStore>,
    llm:      Arc<dyn LlmCaller>,
    events:   EventBus,
    tasks:    TaskExecutor,
    workers:  Mutex<HashMap<String, WorkerHandle>>,
}

/// Orchestrates the agent fleet. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct AgentScheduler {
    inner: Arc<SchedulerInner>,
}

impl AgentScheduler {
    pub fn new(
        store: Arc<AgentStore>,
        settings: Arc<SettingsStore>,
        llm: Arc<dyn LlmCaller>,
        retriever: Option<Arc<Retriever>>,
        events: EventBus,
    ) -> Self {
        let tasks = TaskExecutor::new(llm.clone(), settings.clone(), retriever);
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                settings,
                llm,
                events,
                tasks,
                workers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<AgentStore> {
        &self.inner.store
    }

    pub fn create_agent(
        &self,
        name: Option<String>,
        context: impl Into<String>,
        temperature: f32,
        auto: bool,
    ) -> Result<Agent> {
        self.inner.store.create(name, context, temperature, auto)
    }

    /// Starts the agent's worker. The agent must not already be running.
    pub fn start(&self, agent_id: &str) -> Result<()> {
        let agent = self.agent(agent_id)?;
        if agent.status == AgentStatus::Running {
            return Err(Error::InvalidAgentState {
                id:     agent_id.to_string(),
                action: "start",
                status: agent.status,
            });
        }

        self.inner.store.update_status(agent_id, AgentStatus::Running)?;
        self.inner.events.emit(WorkflowEvent::AgentStarted {
            agent_id: agent_id.to_string(),
            name:     agent.name,
        });
        self.spawn_worker(agent_id);
        Ok(())
    }

    /// Requests cancellation. The worker observes the flag cooperatively:
    /// between streamed fragments, before each task, and at phase
    /// boundaries. A non-streaming call in flight runs to completion first.
    pub fn stop(&self, agent_id: &str) -> Result<()> {
        let agent = self.agent(agent_id)?;
        if agent.status != AgentStatus::Running {
            return Err(Error::InvalidAgentState {
                id:     agent_id.to_string(),
                action: "stop",
                status: agent.status,
            });
        }

        if let Some(handle) = self.inner.workers.lock().unwrap().get(agent_id) {
            handle.cancel.cancel();
        }
        self.inner.store.update(agent_id, |a| a.status = AgentStatus::Stopped)?;
        self.inner.events.emit(WorkflowEvent::AgentStopped {
            agent_id: agent_id.to_string(),
            name:     agent.name,
            error:    None,
        });
        tracing::info!(agent_id, "agent stopped");
        Ok(())
    }

    /// Resumes a halted or stopped agent. A worker still waiting at its halt
    /// boundary is woken in place; otherwise a fresh worker is spawned.
    pub fn continue_agent(&self, agent_id: &str) -> Result<()> {
        let agent = self.agent(agent_id)?;
        if !matches!(agent.status, AgentStatus::Halted | AgentStatus::Stopped) {
            return Err(Error::InvalidAgentState {
                id:     agent_id.to_string(),
                action: "continue",
                status: agent.status,
            });
        }

        self.inner.store.update(agent_id, |a| a.halt = false)?;
        self.inner.events.emit(WorkflowEvent::AgentContinued {
            agent_id: agent_id.to_string(),
            name:     agent.name,
        });

        let woke_worker = agent.status == AgentStatus::Halted && {
            let workers = self.inner.workers.lock().unwrap();
            match workers.get(agent_id) {
                Some(handle) => {
                    handle.gate.signal();
                    true
                }
                None => false,
            }
        };

        if !woke_worker {
            self.inner.store.update_status(agent_id, AgentStatus::Running)?;
            self.spawn_worker(agent_id);
        }
        tracing::info!(agent_id, woke_worker, "agent continued");
        Ok(())
    }

    /// Throws the plan away and re-runs plan generation.
    pub fn redo_tasklist(&self, agent_id: &str) -> Result<()> {
        let agent = self.agent(agent_id)?;
        if !matches!(
            agent.status,
            AgentStatus::Halted
                | AgentStatus::Stopped
                | AgentStatus::Completed
                | AgentStatus::Failed
                | AgentStatus::TasklistError
        ) {
            return Err(Error::InvalidAgentState {
                id:     agent_id.to_string(),
                action: "redo tasklist",
                status: agent.status,
            });
        }

        self.inner.store.update(agent_id, |a| {
            a.redo_tasklist = true;
            a.tasklist = None;
            a.goal = None;
            a.current_phase = None;
            a.error = None;
        })?;
        self.inner.events.emit(WorkflowEvent::AgentRedo {
            agent_id:  agent_id.to_string(),
            name:      agent.name,
            redo_type: "tasklist".to_string(),
            task_id:   None,
        });
        self.inner.store.update_status(agent_id, AgentStatus::Running)?;
        self.spawn_worker(agent_id);
        Ok(())
    }

    /// Resets the first failed (or cancelled) task and re-executes only it.
    pub fn redo_task(&self, agent_id: &str) -> Result<()> {
        let agent = self.agent(agent_id)?;
        if !matches!(
            agent.status,
            AgentStatus::Halted | AgentStatus::Stopped | AgentStatus::Failed
        ) {
            return Err(Error::InvalidAgentState {
                id:     agent_id.to_string(),
                action: "redo task",
                status: agent.status,
            });
        }

        let target = agent
            .tasklist
            .as_ref()
            .and_then(|t| t.first_failed_task())
            .map(|t| t.id)
            .ok_or_else(|| Error::NoFailedTask(agent_id.to_string()))?;

        self.inner.store.update(agent_id, |a| {
            if let Some(task) = a.tasklist.as_mut().and_then(|t| t.task_mut(target)) {
                task.reset();
            }
            a.redo_task_id = Some(target);
        })?;
        self.inner.events.emit(WorkflowEvent::AgentRedo {
            agent_id:  agent_id.to_string(),
            name:      agent.name,
            redo_type: "task".to_string(),
            task_id:   Some(target),
        });
        self.inner.store.update_status(agent_id, AgentStatus::Running)?;
        self.spawn_worker(agent_id);
        Ok(())
    }

    /// Toggles halt-on-next-boundary.
    pub fn set_halt(&self, agent_id: &str, enabled: bool) -> Result<()> {
        self.inner.store.update(agent_id, |a| a.halt = enabled)?;
        tracing::info!(agent_id, enabled, "halt updated");
        Ok(())
    }

    /// Toggles auto-restart on completion.
    pub fn set_auto(&self, agent_id: &str, enabled: bool) -> Result<()> {
        self.inner.store.update(agent_id, |a| a.auto = enabled)?;
        tracing::info!(agent_id, enabled, "auto updated");
        Ok(())
    }

    /// Cancels the agent's worker, then removes the record.
    pub fn delete(&self, agent_id: &str) -> Result<()> {
        if let Some(handle) = self.inner.workers.lock().unwrap().remove(agent_id) {
            handle.cancel.cancel();
            handle.join.abort();
            tracing::info!(agent_id, "cancelled worker for deleted agent");
        }
        self.inner.store.delete(agent_id)
    }

    pub fn clear_completed(&self) -> Result<usize> {
        self.inner.store.clear_completed()
    }

    fn agent(&self, agent_id: &str) -> Result<Agent> {
        self.inner
            .store
            .get(agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))
    }

    fn spawn_worker(&self, agent_id: &str) {
        let cancel = CancelToken::new();
        let gate = Arc::new(ContinueGate::new());
        let inner = self.inner.clone();
        let id = agent_id.to_string();
        let join = tokio::spawn(run_worker(inner, id.clone(), cancel.clone(), gate.clone()));
        self.inner
            .workers
            .lock()
            .unwrap()
            .insert(id, WorkerHandle { join, cancel, gate });
    }
}

enum RunOutcome {
    Completed { goal: String, word_count: usize },
    Halted,
    PlanFailed,
}

enum PlanOutcome {
    Valid { tasklist: Tasklist, raw: String },
    Invalid { raw: String, error: String },
}

async fn run_worker(
    inner: Arc<SchedulerInner>,
    agent_id: String,
    cancel: CancelToken,
    gate: Arc<ContinueGate>,
) {
    loop {
        let outcome = execute_workflow(&inner, &agent_id, &cancel, &gate).await;
        match outcome {
            Ok(RunOutcome::Halted) | Ok(RunOutcome::PlanFailed) => break,
            Ok(RunOutcome::Completed { goal, word_count }) => {
                let Ok(agent) = inner.store.update_status(&agent_id, AgentStatus::Completed) else {
                    break;
                };
                inner.events.emit(WorkflowEvent::AgentCompleted {
                    agent_id: agent_id.clone(),
                    name: agent.name.clone(),
                    goal,
                    word_count,
                });
                tracing::info!(agent_id = %agent_id, "workflow completed");

                if !agent.auto {
                    break;
                }

                tokio::time::sleep(AUTO_RESTART_DELAY).await;
                if cancel.is_cancelled() {
                    break;
                }
                // Auto-restart re-enters plan generation with a fresh plan.
                let reset = inner.store.update(&agent_id, |a| {
                    a.redo_tasklist = true;
                    a.tasklist = None;
                    a.goal = None;
                    a.current_phase = None;
                });
                if reset.is_err() || inner.store.update_status(&agent_id, AgentStatus::Running).is_err() {
                    break;
                }
                inner.events.emit(WorkflowEvent::AgentAutoRestart {
                    agent_id: agent_id.clone(),
                    name:     agent.name,
                });
                tracing::info!(agent_id = %agent_id, "auto-restarting agent");
            }
            Err(e) if e.is_cancellation() => {
                // The stop endpoint already set `stopped` and broadcast it.
                tracing::info!(agent_id = %agent_id, "worker cancelled");
                break;
            }
            Err(e) if e.is_transport() => {
                // Transport failures leave the agent resumable.
                tracing::error!(agent_id = %agent_id, error = %e, "LLM transport error, agent stopped");
                let name = inner
                    .store
                    .update(&agent_id, |a| {
                        a.status = AgentStatus::Stopped;
                        a.error = Some(e.to_string());
                    })
                    .map(|a| a.name)
                    .unwrap_or_default();
                inner.events.emit(WorkflowEvent::AgentStopped {
                    agent_id: agent_id.clone(),
                    name,
                    error: Some(e.to_string()),
                });
                break;
            }
            Err(e) => {
                tracing::error!(agent_id = %agent_id, error = %e, "workflow failed");
                let name = inner
                    .store
                    .update(&agent_id, |a| {
                        a.status = AgentStatus::Failed;
                        a.error = Some(e.to_string());
                    })
                    .map(|a| a.name)
                    .unwrap_or_default();
                inner.events.emit(WorkflowEvent::AgentFailed {
                    agent_id: agent_id.clone(),
                    name,
                    error: e.to_string(),
                });
                break;
            }
        }
    }

    // Deregister only our own handle; a replacement worker may already own
    // the slot.
    let mut workers = inner.workers.lock().unwrap();
    if workers.get(&agent_id).map(|h| h.cancel.same(&cancel)).unwrap_or(false) {
        workers.remove(&agent_id);
    }
}

async fn execute_workflow(
    inner: &Arc<SchedulerInner>,
    agent_id: &str,
    cancel: &CancelToken,
    gate: &ContinueGate,
) -> Result<RunOutcome> {
    let agent = inner
        .store
        .get(agent_id)
        .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;

    let needs_plan =
        agent.redo_tasklist || agent.tasklist.as_ref().map_or(true, |t| t.tasks.is_empty());

    if needs_plan {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        inner.events.emit(WorkflowEvent::WorkflowStatus {
            agent_id: agent_id.to_string(),
            status:   "tasklist_generating".to_string(),
            message:  Some("Creating tasklist based on agent profile...".to_string()),
            tasklist: None,
        });

        match generate_tasklist(inner, &agent, cancel).await? {
            PlanOutcome::Valid { tasklist, raw } => {
                inner.store.update(agent_id, |a| {
                    a.goal = Some(tasklist.goal.clone());
                    a.tasklist = Some(tasklist.clone());
                    a.phase_0_response = Some(raw.clone());
                    a.redo_tasklist = false;
                    a.error = None;
                })?;
                tracing::info!(agent_id, goal = %tasklist.goal, "tasklist generated");
                inner.events.emit(WorkflowEvent::WorkflowStatus {
                    agent_id: agent_id.to_string(),
                    status:   "tasklist_generated".to_string(),
                    message:  Some(raw),
                    tasklist: Some(tasklist),
                });
            }
            PlanOutcome::Invalid { raw, error } => {
                tracing::error!(agent_id, %error, "tasklist validation failed");
                inner.store.update(agent_id, |a| {
                    a.status = AgentStatus::TasklistError;
                    a.phase_0_response = Some(raw.clone());
                    a.tasklist = None;
                    a.redo_tasklist = false;
                    a.error = Some(error.clone());
                })?;
                inner.events.emit(WorkflowEvent::WorkflowStatus {
                    agent_id: agent_id.to_string(),
                    status:   "error".to_string(),
                    message:  Some(format!("ERROR: {error}\n\n{raw}")),
                    tasklist: None,
                });
                return Ok(RunOutcome::PlanFailed);
            }
        }

        // Halt boundary after tasklist generation.
        if halt_requested(inner, agent_id) {
            if !halt_and_wait(inner, agent_id, Some(0), None, gate).await? {
                return Ok(RunOutcome::Halted);
            }
        }
    }

    run_tasks(inner, agent_id, cancel, gate).await
}

async fn run_tasks(
    inner: &Arc<SchedulerInner>,
    agent_id: &str,
    cancel: &CancelToken,
    gate: &ContinueGate,
) -> Result<RunOutcome> {
    let agent = inner
        .store
        .get(agent_id)
        .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;

    let Some(tasklist) = agent.tasklist.as_ref() else {
        return Ok(RunOutcome::Completed {
            goal:       agent.goal.unwrap_or_else(|| "Task completion".to_string()),
            word_count: 0,
        });
    };

    let mut task_ids: Vec<u32> = tasklist.tasks.iter().map(|t| t.id).collect();
    task_ids.sort_unstable();
    let total = task_ids.len();
    tracing::info!(agent_id, tasks = total, "executing tasks");

    // Consume the redo marker up front so a later run is a normal pass.
    let mut redo_target = agent.redo_task_id;
    if redo_target.is_some() {
        inner.store.update(agent_id, |a| a.redo_task_id = None)?;
    }

    for (pos, task_id) in task_ids.iter().enumerate() {
        let agent = inner
            .store
            .get(agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
        let Some(task) = agent.tasklist.as_ref().and_then(|t| t.task(*task_id)).cloned() else {
            continue;
        };

        if let Some(target) = redo_target {
            if *task_id != target {
                continue;
            }
            redo_target = None;
        } else if task.status.is_finished() {
            tracing::info!(agent_id, task_id, status = ?task.status, "skipping task");
            continue;
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        set_task_status(inner, agent_id, *task_id, TaskStatus::Running)?;
        inner.events.emit(WorkflowEvent::TaskRunning {
            agent_id: agent_id.to_string(),
            task_id:  *task_id,
        });

        let first = pos == 0;
        let previous_context = agent
            .tasklist
            .as_ref()
            .map(|t| build_previous_context(t, *task_id))
            .unwrap_or_default();

        let execution = inner
            .tasks
            .execute(&agent, &task, first, &previous_context, cancel, &inner.events)
            .await;

        match execution {
            Ok(outcome) => {
                let status = if outcome.validation.is_valid {
                    TaskStatus::Completed
                } else {
                    TaskStatus::Failed
                };
                inner.store.update(agent_id, |a| {
                    if let Some(t) = a.tasklist.as_mut().and_then(|tl| tl.task_mut(*task_id)) {
                        t.status = status;
                        t.output = Some(outcome.output.clone());
                        t.validation = Some(outcome.validation.clone());
                        t.tool_call = outcome.tool_call.clone();
                        t.completed_at = Some(outcome.completed_at);
                        t.error = None;
                    }
                })?;

                if status == TaskStatus::Completed {
                    inner.events.emit(WorkflowEvent::TaskCompleted {
                        agent_id:   agent_id.to_string(),
                        task_id:    *task_id,
                        output:     outcome.output,
                        validation: outcome.validation,
                    });
                } else {
                    inner.events.emit(WorkflowEvent::TaskFailed {
                        agent_id:   agent_id.to_string(),
                        task_id:    *task_id,
                        output:     Some(outcome.output),
                        validation: Some(outcome.validation),
                        error:      None,
                    });
                }
                tracing::info!(agent_id, task_id, ?status, "task finished");

                // Halt boundary after each task except the final one:
                // completing the last task always completes the agent.
                let is_last = pos == total - 1;
                if !is_last && halt_requested(inner, agent_id) {
                    if !halt_and_wait(inner, agent_id, None, Some(*task_id), gate).await? {
                        return Ok(RunOutcome::Halted);
                    }
                } else if is_last && halt_requested(inner, agent_id) {
                    tracing::info!(
                        agent_id,
                        task_id,
                        "final task completed, proceeding to completion despite halt"
                    );
                }
            }
            Err(e) if e.is_cancellation() => {
                set_task_status(inner, agent_id, *task_id, TaskStatus::Cancelled)?;
                inner.events.emit(WorkflowEvent::TaskCancelled {
                    agent_id: agent_id.to_string(),
                    task_id:  *task_id,
                });
                return Err(Error::Cancelled);
            }
            Err(e) if e.is_transport() => {
                // Abort the workflow; the agent becomes resumable.
                record_task_error(inner, agent_id, *task_id, &e)?;
                return Err(e);
            }
            Err(e) => {
                // Other per-task failures do not abort the workflow; the
                // human reviews and triggers redo or stop.
                tracing::error!(agent_id, task_id, error = %e, "task failed");
                record_task_error(inner, agent_id, *task_id, &e)?;
            }
        }
    }

    let agent = inner
        .store
        .get(agent_id)
        .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
    let word_count = agent
        .tasklist
        .as_ref()
        .map(|t| {
            t.tasks
                .iter()
                .filter_map(|task| task.output.as_ref())
                .map(|o| o.split_whitespace().count())
                .sum()
        })
        .unwrap_or(0);

    Ok(RunOutcome::Completed {
        goal: agent.goal.unwrap_or_else(|| "Task completion".to_string()),
        word_count,
    })
}

fn set_task_status(
    inner: &SchedulerInner,
    agent_id: &str,
    task_id: u32,
    status: TaskStatus,
) -> Result<()> {
    inner.store.update(agent_id, |a| {
        if let Some(t) = a.tasklist.as_mut().and_then(|tl| tl.task_mut(task_id)) {
            t.status = status;
        }
    })?;
    Ok(())
}

fn record_task_error(
    inner: &SchedulerInner,
    agent_id: &str,
    task_id: u32,
    error: &Error,
) -> Result<()> {
    inner.store.update(agent_id, |a| {
        if let Some(t) = a.tasklist.as_mut().and_then(|tl| tl.task_mut(task_id)) {
            t.status = TaskStatus::Failed;
            t.error = Some(error.to_string());
        }
    })?;
    inner.events.emit(WorkflowEvent::TaskFailed {
        agent_id:   agent_id.to_string(),
        task_id,
        output:     None,
        validation: None,
        error:      Some(error.to_string()),
    });
    Ok(())
}

fn halt_requested(inner: &SchedulerInner, agent_id: &str) -> bool {
    inner.store.get(agent_id).map(|a| a.halt).unwrap_or(false)
}

/// Marks the agent halted and waits for `continue`. Returns `true` when the
/// worker should resume in place, `false` when it gave up and should return
/// (a later `continue` spawns a fresh worker).
async fn halt_and_wait(
    inner: &SchedulerInner,
    agent_id: &str,
    phase: Option<u32>,
    task_id: Option<u32>,
    gate: &ContinueGate,
) -> Result<bool> {
    let agent = inner.store.update(agent_id, |a| {
        a.status = AgentStatus::Halted;
        if phase.is_some() {
            a.current_phase = phase;
        }
    })?;
    inner.events.emit(WorkflowEvent::AgentHalted {
        agent_id: agent_id.to_string(),
        name: agent.name,
        phase,
        task_id,
    });
    tracing::info!(agent_id, ?phase, ?task_id, "agent halted");

    if gate.wait(CONTINUE_WAIT_CEILING).await {
        inner.store.update_status(agent_id, AgentStatus::Running)?;
        tracing::info!(agent_id, "agent resumed from halt");
        Ok(true)
    } else {
        tracing::warn!(agent_id, "halt wait timed out, worker giving up");
        Ok(false)
    }
}

/// Prior completed tasks' outputs, concatenated with separator lines.
fn build_previous_context(tasklist: &Tasklist, current_id: u32) -> String {
    let sections: Vec<String> = tasklist
        .tasks
        .iter()
        .filter(|t| t.id < current_id && t.status == TaskStatus::Completed)
        .filter_map(|t| {
            t.output
                .as_ref()
                .map(|o| format!("Task {} ({}):\n{}", t.id, t.name, o))
        })
        .collect();
    sections.join("\n\n---\n\n")
}

async fn generate_tasklist(
    inner: &SchedulerInner,
    agent: &Agent,
    cancel: &CancelToken,
) -> Result<PlanOutcome> {
    let hidden_context = inner.settings.get_prompt("hidden_context")?;
    let template = inner.settings.get_prompt("phase_0_planning")?;

    let context = if agent.context.trim().is_empty() {
        "No additional context provided"
    } else {
        agent.context.as_str()
    };
    let rendered = prompt::render(
        &template,
        &[("agent_name", agent.name.as_str()), ("agent_context", context)],
    );
    let full_prompt = format!("{hidden_context}\n\n{rendered}");

    let chunk_events = inner.events.clone();
    let agent_id = agent.id.clone();
    let on_fragment = move |chunk: &str| {
        chunk_events.emit(WorkflowEvent::Chunk {
            agent_id: agent_id.clone(),
            chunk:    chunk.to_string(),
        });
    };
    let flag = cancel.clone();
    let cancel_check = move || flag.is_cancelled();

    let reply = inner
        .llm
        .call(
            LlmRequest::streaming(full_prompt, agent.temperature),
            CallContext {
                on_fragment: Some(&on_fragment),
                cancel:      Some(&cancel_check),
                events:      Some(&inner.events),
            },
        )
        .await?;
    let raw = reply.text.trim().to_string();

    match parse_tasklist(&raw) {
        Ok(tasklist) => Ok(PlanOutcome::Valid { tasklist, raw }),
        Err(e) => Ok(PlanOutcome::Invalid { raw, error: e.to_string() }),
    }
}

/// Parses and validates the planning response into a tasklist.
fn parse_tasklist(raw: &str) -> Result<Tasklist> {
    let value = extract::json_object(raw)
        .map_err(|e| Error::PlanValidation(format!("JSON parsing failed: {e}")))?;
    let Value::Object(map) = value else {
        return Err(Error::PlanValidation("tasklist must be a JSON object".into()));
    };

    let goal = map
        .get("goal")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::PlanValidation("tasklist must contain a 'goal' string".into()))?;
    let entries = map
        .get("tasks")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::PlanValidation("tasklist must contain a 'tasks' array".into()))?;

    let mut tasks = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let obj = entry
            .as_object()
            .ok_or_else(|| Error::PlanValidation(format!("task {i} must be an object")))?;

        let mut missing = Vec::new();
        let id = match obj.get("id").and_then(|v| v.as_u64()) {
            Some(id) => id as u32,
            None => {
                missing.push("id");
                0
            }
        };
        let name = field(obj, "name", &mut missing);
        let description = field(obj, "description", &mut missing);
        let expected_output = field(obj, "expected_output", &mut missing);

        if !missing.is_empty() {
            return Err(Error::PlanValidation(format!(
                "task {i} missing required fields: {}",
                missing.join(", ")
            )));
        }
        tasks.push(Task::new(id, name, description, expected_output));
    }

    Tasklist { goal: goal.to_string(), tasks }.normalize()
}

fn field(obj: &serde_json::Map<String, Value>, key: &'static str, missing: &mut Vec<&'static str>) -> String {
    match obj.get(key).and_then(|v| v.as_str()) {
        Some(s) => s.to_string(),
        None => {
            missing.push(key);
            String::new()
        }
    }
}
