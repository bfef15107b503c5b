use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::search::{RetrievedDocument, ThresholdStats};

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Created,
    Running,
    Halted,
    Stopped,
    Completed,
    Failed,
    TasklistError,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Halted => "halted",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TasklistError => "tasklist_error",
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single task within a tasklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// True once the task will no longer be picked up by the normal flow.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Verdict of the separate low-temperature validation call for a task output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Validation {
    pub is_valid: bool,
    /// 0–100.
    pub score:    u8,
    pub reason:   String,
}

/// Record of a retrieval tool invocation made while executing a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    #[serde(rename = "type")]
    pub kind:            String,
    pub query:           String,
    pub documents:       Vec<RetrievedDocument>,
    pub threshold_used:  Option<f32>,
    pub retrieval_time:  f64,
    pub threshold_stats: ThresholdStats,
}

/// One atomic execution unit of a tasklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id:              u32,
    pub name:            String,
    pub description:     String,
    pub expected_output: String,
    #[serde(default)]
    pub status:          TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output:          Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation:      Option<Validation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call:       Option<ToolCallRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at:    Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error:           Option<String>,
}

impl Task {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        description: impl Into<String>,
        expected_output: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            expected_output: expected_output.into(),
            status: TaskStatus::Created,
            output: None,
            validation: None,
            tool_call: None,
            completed_at: None,
            error: None,
        }
    }

    /// Clears all execution state, returning the task to `created`.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Created;
        self.output = None;
        self.validation = None;
        self.tool_call = None;
        self.completed_at = None;
        self.error = None;
    }
}

/// The declarative plan generated for an agent: a goal and an ordered
/// sequence of tasks with unique, ascending ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tasklist {
    pub goal:  String,
    pub tasks: Vec<Task>,
}

impl Tasklist {
    /// Sorts tasks into ascending-id order and verifies the invariants:
    /// non-empty goal, non-empty task list, unique ids.
    pub fn normalize(mut self) -> Result<Self> {
        if self.goal.trim().is_empty() {
            return Err(Error::PlanValidation("'goal' must be a non-empty string".into()));
        }
        if self.tasks.is_empty() {
            return Err(Error::PlanValidation("'tasks' must be a non-empty array".into()));
        }
        self.tasks.sort_by_key(|t| t.id);
        for pair in self.tasks.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(Error::PlanValidation(format!(
                    "duplicate task id: {}",
                    pair[0].id
                )));
            }
        }
        Ok(self)
    }

    pub fn task(&self, id: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: u32) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// First task in `failed` or `cancelled` state, in id order.
    pub fn first_failed_task(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|t| matches!(t.status, TaskStatus::Failed | TaskStatus::Cancelled))
    }
}

/// A stateful AI-journalist instance.
///
/// Transient fields (`redo_task_id`, `redo_tasklist`) are never persisted;
/// the worker handle and cancellation flag live in the scheduler's worker
/// registry, keyed by agent id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id:          String,
    pub name:        String,
    #[serde(default)]
    pub context:     String,
    pub temperature: f32,
    #[serde(default)]
    pub auto:        bool,
    #[serde(default)]
    pub halt:        bool,
    pub status:      AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal:        Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasklist:    Option<Tasklist>,
    /// Raw planning-LLM response, kept verbatim for inspection and for
    /// diagnosing `tasklist_error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_0_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase:    Option<u32>,
    pub created_at:   DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at:   Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error:        Option<String>,

    // ── Transient redo markers (consumed by the next worker run) ─────────
    #[serde(skip)]
    pub redo_task_id:  Option<u32>,
    #[serde(skip)]
    pub redo_tasklist: bool,
}

impl Agent {
    pub fn new(name: impl Into<String>, context: impl Into<String>, temperature: f32, auto: bool) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            context: context.into(),
            temperature,
            auto,
            halt: false,
            status: AgentStatus::Created,
            goal: None,
            tasklist: None,
            phase_0_response: None,
            current_phase: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            redo_task_id: None,
            redo_tasklist: false,
        }
    }
}
