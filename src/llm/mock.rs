use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::LlmError;
use crate::events::WorkflowEvent;
use crate::llm::{CallContext, LlmCaller, LlmReply, LlmRequest};

/// One scripted response for [`MockLlm`].
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Returned whole; delivered as a single fragment when streaming.
    Text(String),
    /// Streamed fragment by fragment, honoring the cancellation predicate
    /// between fragments.
    Fragments(Vec<String>),
    /// Like `Fragments`, with a pause before each fragment so tests can
    /// interleave a stop with an in-flight stream.
    PacedFragments(Vec<String>, Duration),
    /// Fails the call.
    Fail(String),
}

impl MockReply {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }
}

/// Scripted LLM for tests, no network calls. Replies are consumed in order;
/// an exhausted script fails the call with a transport error.
pub struct MockLlm {
    replies: Mutex<VecDeque<MockReply>>,
    calls:   Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls:   Mutex::new(Vec::new()),
        }
    }

    /// Number of times `call` was invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The request recorded for the Nth call (0-indexed).
    pub fn request_for_call(&self, n: usize) -> Option<LlmRequest> {
        self.calls.lock().unwrap().get(n).cloned()
    }
}

#[async_trait]
impl LlmCaller for MockLlm {
    async fn call(&self, request: LlmRequest, ctx: CallContext<'_>) -> Result<LlmReply, LlmError> {
        if let Some(events) = ctx.events {
            events.emit(WorkflowEvent::LlmRequest {
                endpoint:    "mock".to_string(),
                model:       "mock".to_string(),
                temperature: request.temperature.unwrap_or(0.0),
                max_tokens:  request.max_tokens.unwrap_or(0),
                prompt:      request.prompt.clone(),
                payload:     serde_json::Value::Null,
            });
        }

        let reply = self.replies.lock().unwrap().pop_front();
        self.calls.lock().unwrap().push(request.clone());

        let result = match reply {
            None => Err(LlmError::Transport("MockLlm: no more scripted replies".into())),
            Some(MockReply::Fail(message)) => Err(LlmError::Transport(message)),
            Some(MockReply::Text(text)) => {
                if request.stream {
                    self.deliver(&[text.clone()], None, &ctx).await.map(|_| text)
                } else {
                    Ok(text)
                }
            }
            Some(MockReply::Fragments(fragments)) => self
                .deliver(&fragments, None, &ctx)
                .await
                .map(|_| fragments.concat()),
            Some(MockReply::PacedFragments(fragments, pace)) => {
                match self.deliver(&fragments, Some(pace), &ctx).await {
                    Ok(()) => Ok(fragments.concat()),
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Ok(text) => {
                if let Some(events) = ctx.events {
                    events.emit(WorkflowEvent::LlmResponse {
                        success:         true,
                        text:            Some(text.clone()),
                        generation_time: Some(0.0),
                        response_length: Some(text.len()),
                        error:           None,
                    });
                }
                Ok(LlmReply { text, generation_time: 0.0, model: "mock".to_string() })
            }
            Err(e) => {
                if let Some(events) = ctx.events {
                    events.emit(WorkflowEvent::LlmResponse {
                        success:         false,
                        text:            None,
                        generation_time: None,
                        response_length: None,
                        error:           Some(e.to_string()),
                    });
                }
                Err(e)
            }
        }
    }
}

impl MockLlm {
    async fn deliver(
        &self,
        fragments: &[String],
        pace: Option<Duration>,
        ctx: &CallContext<'_>,
    ) -> Result<(), LlmError> {
        for fragment in fragments {
            if let Some(pause) = pace {
                tokio::time::sleep(pause).await;
            }
            if let Some(on_fragment) = ctx.on_fragment {
                on_fragment(fragment);
            }
            if let Some(cancel) = ctx.cancel {
                if cancel() {
                    return Err(LlmError::Cancelled);
                }
            }
        }
        Ok(())
    }
}
