//! LLM client: one call = one outbound POST against the settings-driven
//! endpoint, with token-level streaming and cooperative cancellation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::events::EventBus;

mod http;
mod mock;

pub use http::{HttpLlmClient, LlmStatistics};
pub use mock::{MockLlm, MockReply};

/// Request payload shape. Expressed as a tagged variant with two payload
/// builders and two extractors: the shape decides both directions of the
/// wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    /// Chat-style: `{model, messages, temperature, max_tokens, stream}`;
    /// fragments arrive in `choices[0].delta.content`.
    #[default]
    Message,
    /// Completion-style: `{model, prompt, stream, options}`; fragments arrive
    /// in `response`.
    Completion,
}

/// Parameters of one LLM call. Unset generation knobs fall back to the
/// client's configured defaults.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt:      String,
    pub temperature: Option<f32>,
    pub max_tokens:  Option<u32>,
    pub stream:      bool,
}

impl LlmRequest {
    pub fn streaming(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            prompt:      prompt.into(),
            temperature: Some(temperature),
            max_tokens:  None,
            stream:      true,
        }
    }

    pub fn oneshot(prompt: impl Into<String>, temperature: f32) -> Self {
        Self {
            prompt:      prompt.into(),
            temperature: Some(temperature),
            max_tokens:  None,
            stream:      false,
        }
    }
}

/// Successful call result.
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub text:            String,
    /// Wall-clock seconds the call took.
    pub generation_time: f64,
    pub model:           String,
}

/// Per-call hooks.
///
/// `on_fragment` is delivered synchronously for every streamed fragment, in
/// arrival order; after each delivery the `cancel` predicate is consulted and
/// a `true` abandons the stream with [`LlmError::Cancelled`]. Both stay
/// in-line (not on the event channel) because they interact with cancellation
/// semantics.
pub struct CallContext<'a> {
    pub on_fragment: Option<&'a (dyn Fn(&str) + Send + Sync)>,
    pub cancel:      Option<&'a (dyn Fn() -> bool + Send + Sync)>,
    pub events:      Option<&'a EventBus>,
}

impl<'a> CallContext<'a> {
    pub fn none() -> Self {
        Self { on_fragment: None, cancel: None, events: None }
    }

    pub fn with_events(events: &'a EventBus) -> Self {
        Self { on_fragment: None, cancel: None, events: Some(events) }
    }

    fn cancelled(&self) -> bool {
        self.cancel.map(|c| c()).unwrap_or(false)
    }
}

/// The seam between the executor and any LLM transport.
///
/// # Contract
/// - Must be Send + Sync (shared behind `Arc<dyn LlmCaller>`)
/// - Streamed fragments concatenated through `on_fragment` equal the
///   returned text
/// - Emits `llm_request` / `llm_response` events when `ctx.events` is set
#[async_trait]
pub trait LlmCaller: Send + Sync {
    async fn call(&self, request: LlmRequest, ctx: CallContext<'_>) -> Result<LlmReply, LlmError>;
}
