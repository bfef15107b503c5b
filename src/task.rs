//! Task execution: prompt composition, streaming generation, LLM-based
//! validation of the output against the task's criterion.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::control::CancelToken;
use crate::error::{Error, Result};
use crate::events::{EventBus, WorkflowEvent};
use crate::extract;
use crate::llm::{CallContext, LlmCaller, LlmRequest};
use crate::retriever::{Retriever, TaskOutputMeta};
use crate::settings::SettingsStore;
use crate::types::{Agent, Task, ToolCallRecord, Validation};
use crate::prompt;

/// Validation runs at a fixed low temperature for consistent judgments.
const VALIDATION_TEMPERATURE: f32 = 0.3;

/// Result of one task execution, recorded into the task by the workflow.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub output:       String,
    pub validation:   Validation,
    pub tool_call:    Option<ToolCallRecord>,
    pub completed_at: DateTime<Utc>,
}

pub struct TaskExecutor {
    llm:       Arc<dyn LlmCaller>,
    settings:  Arc<SettingsStore>,
    retriever: Option<Arc<Retriever>>,
}

impl TaskExecutor {
    pub fn new(
        llm: Arc<dyn LlmCaller>,
        settings: Arc<SettingsStore>,
        retriever: Option<Arc<Retriever>>,
    ) -> Self {
        Self { llm, settings, retriever }
    }

    /// Executes a single task: optional retrieval, streaming generation,
    /// then validation. The caller owns status bookkeeping and persistence.
    pub async fn execute(
        &self,
        agent: &Agent,
        task: &Task,
        first: bool,
        previous_context: &str,
        cancel: &CancelToken,
        events: &EventBus,
    ) -> Result<TaskOutcome> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        tracing::info!(
            agent_id = %agent.id,
            task_id = task.id,
            name = %task.name,
            "executing task"
        );

        // Retrieval first so its documents can be injected into the prompt.
        let retrieval = self.retrieve(agent, task, events).await?;
        let (context_block, tool_call) = match retrieval {
            Some(result) => {
                let max_chars = self
                    .retriever
                    .as_ref()
                    .map(|r| r.config().max_context_length)
                    .unwrap_or(usize::MAX);
                let block = format_documents(&result.documents, max_chars);
                let record = ToolCallRecord {
                    kind:            "retrieval".to_string(),
                    query:           result.query,
                    documents:       result.documents,
                    threshold_used:  result.threshold_used,
                    retrieval_time:  result.retrieval_time,
                    threshold_stats: result.threshold_stats,
                };
                (block, Some(record))
            }
            None => (String::new(), None),
        };

        let prompt = self.build_task_prompt(agent, task, first, previous_context, &context_block)?;

        // Stream the generation, forwarding every fragment.
        let agent_id = agent.id.clone();
        let task_id = task.id;
        let chunk_events = events.clone();
        let on_fragment = move |chunk: &str| {
            chunk_events.emit(WorkflowEvent::TaskChunk {
                agent_id: agent_id.clone(),
                task_id,
                chunk: chunk.to_string(),
            });
        };
        let cancel_flag = cancel.clone();
        let cancel_check = move || cancel_flag.is_cancelled();

        let reply = self
            .llm
            .call(
                LlmRequest::streaming(prompt, agent.temperature),
                CallContext {
                    on_fragment: Some(&on_fragment),
                    cancel:      Some(&cancel_check),
                    events:      Some(events),
                },
            )
            .await?;
        let output = reply.text.trim().to_string();

        let validation = self.validate_output(agent, task, &output, events).await;
        events.emit(WorkflowEvent::TaskValidation {
            agent_id: agent.id.clone(),
            task_id:  task.id,
            is_valid: validation.is_valid,
            score:    validation.score,
            reason:   validation.reason.clone(),
        });

        // Ingest before the caller persists the task result, so a persisted
        // tasklist never references a vector the index does not hold.
        if validation.is_valid {
            self.store_output(agent, task, &output).await;
        }

        tracing::info!(
            agent_id = %agent.id,
            task_id = task.id,
            is_valid = validation.is_valid,
            score = validation.score,
            "task execution finished"
        );

        Ok(TaskOutcome {
            output,
            validation,
            tool_call,
            completed_at: Utc::now(),
        })
    }

    async fn retrieve(
        &self,
        agent: &Agent,
        task: &Task,
        events: &EventBus,
    ) -> Result<Option<crate::retriever::RetrievalResult>> {
        let Some(retriever) = &self.retriever else {
            return Ok(None);
        };
        if !retriever.is_available() {
            return Ok(None);
        }

        // Encoding is CPU-bound; keep it off the event loop.
        let retriever = retriever.clone();
        let agent_id = agent.id.clone();
        let task_id = task.id;
        let query = task.description.clone();
        let context = agent.context.clone();
        let events = events.clone();
        let result = tokio::task::spawn_blocking(move || {
            retriever.retrieve_for_task(&agent_id, task_id, &query, &context, None, None, &events)
        })
        .await
        .map_err(|e| Error::Index(format!("retrieval task panicked: {e}")))?;

        Ok(Some(result))
    }

    fn build_task_prompt(
        &self,
        agent: &Agent,
        task: &Task,
        first: bool,
        previous_context: &str,
        context_block: &str,
    ) -> Result<String> {
        let goal = agent.goal.clone().unwrap_or_else(|| "Complete the assigned task".to_string());
        let task_id = task.id.to_string();

        let rendered = if first {
            let template = self.settings.get_prompt("task_execution_first")?;
            prompt::render(
                &template,
                &[
                    ("agent_name", agent.name.as_str()),
                    ("goal", goal.as_str()),
                    ("task_name", task.name.as_str()),
                    ("task_description", task.description.as_str()),
                    ("expected_output", task.expected_output.as_str()),
                    ("context", context_block),
                ],
            )
        } else {
            let template = self.settings.get_prompt("task_execution_sequential")?;
            prompt::render(
                &template,
                &[
                    ("agent_name", agent.name.as_str()),
                    ("goal", goal.as_str()),
                    ("task_id", task_id.as_str()),
                    ("task_name", task.name.as_str()),
                    ("task_description", task.description.as_str()),
                    ("expected_output", task.expected_output.as_str()),
                    ("previous_tasks_context", previous_context),
                    ("additional_context", context_block),
                ],
            )
        };
        Ok(rendered)
    }

    /// Judges the output against the task's criterion with a separate
    /// non-streaming call. Never fails the task: any error here yields an
    /// `is_valid = false` verdict and the workflow carries on.
    async fn validate_output(
        &self,
        agent: &Agent,
        task: &Task,
        output: &str,
        events: &EventBus,
    ) -> Validation {
        let template = match self.settings.get_prompt("task_validation") {
            Ok(t) => t,
            Err(e) => {
                return Validation {
                    is_valid: false,
                    score:    0,
                    reason:   format!("Validation error: {e}"),
                }
            }
        };

        let validation_prompt = prompt::render(
            &template,
            &[
                ("task_name", task.name.as_str()),
                ("task_description", task.description.as_str()),
                ("expected_output", task.expected_output.as_str()),
                ("actual_output", output),
            ],
        );

        let result = self
            .llm
            .call(
                LlmRequest::oneshot(validation_prompt, VALIDATION_TEMPERATURE),
                CallContext::with_events(events),
            )
            .await;

        match result {
            Ok(reply) => parse_validation(reply.text.trim()),
            Err(e) => {
                tracing::error!(
                    agent_id = %agent.id,
                    task_id = task.id,
                    error = %e,
                    "validation call failed"
                );
                Validation {
                    is_valid: false,
                    score:    0,
                    reason:   format!("Validation error: {e}"),
                }
            }
        }
    }

    async fn store_output(&self, agent: &Agent, task: &Task, output: &str) {
        let Some(retriever) = &self.retriever else { return };
        if !retriever.is_available() || !retriever.config().store_task_outputs {
            return;
        }

        let retriever = retriever.clone();
        let meta = TaskOutputMeta {
            agent_name: agent.name.clone(),
            task_id:    task.id,
            task_name:  task.name.clone(),
            goal:       agent.goal.clone().unwrap_or_default(),
            timestamp:  Utc::now(),
        };
        let output = output.to_string();
        let ingest = tokio::task::spawn_blocking(move || retriever.add_task_output(&output, &meta)).await;

        match ingest {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to add task output to knowledge base")
            }
            Err(e) => tracing::error!(error = %e, "task output ingestion panicked"),
        }
    }
}

/// Parses the validator's JSON verdict. Missing keys get defaults; an
/// unparseable response defaults to invalid.
fn parse_validation(text: &str) -> Validation {
    match extract::json_object(text) {
        Ok(serde_json::Value::Object(map)) => Validation {
            is_valid: map.get("is_valid").and_then(|v| v.as_bool()).unwrap_or(false),
            score:    map
                .get("score")
                .and_then(|v| v.as_i64())
                .map(|s| s.clamp(0, 100) as u8)
                .unwrap_or(0),
            reason:   map
                .get("reason")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| "Validation format error".to_string()),
        },
        Ok(_) => Validation {
            is_valid: false,
            score:    0,
            reason:   "Validation format error".to_string(),
        },
        Err(e) => Validation {
            is_valid: false,
            score:    0,
            reason:   format!("Validation parsing error: {e}"),
        },
    }
}

/// Formats retrieved documents into the prompt context slot, capped at
/// `max_chars`.
fn format_documents(documents: &[crate::search::RetrievedDocument], max_chars: usize) -> String {
    if documents.is_empty() {
        return String::new();
    }
    let joined = documents
        .iter()
        .map(|d| format!("[{}] (score {:.2})\n{}", d.filename, d.score, d.content))
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    if joined.chars().count() > max_chars {
        joined.chars().take(max_chars).collect()
    } else {
        joined
    }
}
