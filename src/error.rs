use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error taxonomy: validation, transport, cancellation, internal.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("prompt '{name}' is missing required template variables: {missing}")]
    PromptVariables { name: String, missing: String },

    #[error("unknown prompt: {0}")]
    UnknownPrompt(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent {id} cannot {action} while {status}")]
    InvalidAgentState {
        id:     String,
        action: &'static str,
        status: crate::types::AgentStatus,
    },

    #[error("no failed or cancelled task found for agent {0}")]
    NoFailedTask(String),

    #[error("tasklist validation failed: {0}")]
    PlanValidation(String),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("cancelled")]
    Cancelled,

    #[error("index error: {0}")]
    Index(String),

    #[error("persistence failed for {path}: {source}")]
    Persist {
        path:   std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failure classes of a single LLM call.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request timed out after {0}s")]
    Timeout(u64),

    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("no extractable text in LLM response: {0}")]
    BadResponse(String),

    #[error("LLM call cancelled mid-stream")]
    Cancelled,
}

impl Error {
    /// True for user-initiated cancellation, at any layer it surfaced.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::Llm(LlmError::Cancelled))
    }

    /// True for LLM transport-layer failures (timeout, network). The workflow
    /// reclassifies these as `stopped` so the user can resume.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Llm(LlmError::Timeout(_)) | Error::Llm(LlmError::Transport(_))
        )
    }
}
