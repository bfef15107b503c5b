use serde::Serialize;
use tokio::sync::mpsc;

use crate::search::{RetrievedDocument, ThresholdStats};
use crate::types::{Tasklist, Validation};

/// A structured record emitted on the event stream, serialized as
/// `{"type": ..., "data": {...}}` for the transport layer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WorkflowEvent {
    // ── Workflow / plan ─────────────────────────────────
    WorkflowStatus {
        agent_id: String,
        status:   String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message:  Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tasklist: Option<Tasklist>,
    },
    /// Streamed fragment of the planning response.
    Chunk {
        agent_id: String,
        chunk:    String,
    },

    // ── Task lifecycle ──────────────────────────────────
    TaskRunning {
        agent_id: String,
        task_id:  u32,
    },
    TaskCompleted {
        agent_id:   String,
        task_id:    u32,
        output:     String,
        validation: Validation,
    },
    TaskFailed {
        agent_id:   String,
        task_id:    u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        output:     Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        validation: Option<Validation>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error:      Option<String>,
    },
    TaskCancelled {
        agent_id: String,
        task_id:  u32,
    },
    TaskChunk {
        agent_id: String,
        task_id:  u32,
        chunk:    String,
    },
    TaskValidation {
        agent_id: String,
        task_id:  u32,
        is_valid: bool,
        score:    u8,
        reason:   String,
    },

    // ── LLM client ──────────────────────────────────────
    LlmRequest {
        endpoint:    String,
        model:       String,
        temperature: f32,
        max_tokens:  u32,
        prompt:      String,
        payload:     serde_json::Value,
    },
    LlmResponse {
        success:         bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        text:            Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        generation_time: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_length: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error:           Option<String>,
    },

    // ── Retrieval tool ──────────────────────────────────
    ToolCallStart {
        agent_id:   String,
        task_id:    u32,
        query:      String,
        hit_target: usize,
        top_k:      usize,
    },
    ToolThresholdAttempt {
        agent_id:       String,
        task_id:        u32,
        threshold:      f32,
        hits:           usize,
        target:         usize,
        target_reached: bool,
    },
    ToolCallComplete {
        agent_id:        String,
        task_id:         u32,
        /// Document previews, content truncated for transport; full content
        /// stays in the task's tool-call record.
        documents:       Vec<RetrievedDocument>,
        threshold_used:  Option<f32>,
        retrieval_time:  f64,
        threshold_stats: ThresholdStats,
        query:           String,
    },

    // ── Agent lifecycle ─────────────────────────────────
    AgentStarted {
        agent_id: String,
        name:     String,
    },
    AgentHalted {
        agent_id: String,
        name:     String,
        #[serde(skip_serializing_if = "Option::is_none")]
        phase:    Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id:  Option<u32>,
    },
    AgentStopped {
        agent_id: String,
        name:     String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error:    Option<String>,
    },
    AgentCompleted {
        agent_id:   String,
        name:       String,
        goal:       String,
        word_count: usize,
    },
    AgentFailed {
        agent_id: String,
        name:     String,
        error:    String,
    },
    AgentContinued {
        agent_id: String,
        name:     String,
    },
    AgentAutoRestart {
        agent_id: String,
        name:     String,
    },
    AgentRedo {
        agent_id:  String,
        name:      String,
        redo_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id:   Option<u32>,
    },
}

/// Sending half of the event stream. Cloned into every component that
/// publishes events; the transport layer consumes the receiver. A closed
/// receiver never fails a workflow; sends are best-effort.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: mpsc::UnboundedSender<WorkflowEvent>,
}

impl EventBus {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: WorkflowEvent) {
        let _ = self.tx.send(event);
    }
}
