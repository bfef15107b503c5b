//! pressroom: orchestration core for fleets of AI-journalist agents.
//!
//! Each agent holds a tasklist planned by an LLM from a short prompt, then
//! executes it task by task: streaming generation, per-task validation,
//! optional adaptive-threshold retrieval for context, with halt / continue /
//! stop / redo control and crash-safe persistence throughout.

pub mod control;
pub mod embed;
pub mod error;
pub mod events;
pub mod extract;
pub mod index;
pub mod llm;
pub mod persist;
pub mod prompt;
pub mod retriever;
pub mod search;
pub mod settings;
pub mod store;
pub mod task;
pub mod types;
pub mod workflow;

// Convenience re-exports at crate root
pub use control::{CancelToken, ContinueGate};
pub use embed::{HashingEncoder, SentenceEncoder};
pub use error::{Error, LlmError, Result};
pub use events::{EventBus, WorkflowEvent};
pub use index::{DocMetadata, Metric, VectorIndex};
pub use llm::{HttpLlmClient, LlmCaller, LlmReply, LlmRequest, MockLlm, MockReply, PayloadKind};
pub use retriever::{RetrievalResult, Retriever};
pub use search::{RetrievedDocument, SearchService, ThresholdStats};
pub use settings::{LlmConfig, RetrievalConfig, Settings, SettingsStore};
pub use store::AgentStore;
pub use task::TaskExecutor;
pub use types::{Agent, AgentStatus, Task, TaskStatus, Tasklist, Validation};
pub use workflow::AgentScheduler;
