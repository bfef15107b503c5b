use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::LlmError;
use crate::events::WorkflowEvent;
use crate::llm::{CallContext, LlmCaller, LlmReply, LlmRequest, PayloadKind};
use crate::settings::LlmConfig;

/// Usage counters. Updated on success only; reads may be torn relative to
/// each other.
#[derive(Debug, Clone, Serialize)]
pub struct LlmStatistics {
    pub total_calls:  u64,
    /// Seconds spent across all successful calls.
    pub total_time:   f64,
    pub total_tokens: u64,
    pub model:        String,
    pub api_url:      String,
}

/// HTTP client for the settings-driven LLM endpoint.
pub struct HttpLlmClient {
    client:        reqwest::Client,
    config:        LlmConfig,
    total_calls:   AtomicU64,
    total_time_ms: AtomicU64,
    total_tokens:  AtomicU64,
}

impl HttpLlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            total_calls: AtomicU64::new(0),
            total_time_ms: AtomicU64::new(0),
            total_tokens: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    fn build_payload(&self, prompt: &str, temperature: f32, max_tokens: u32, stream: bool) -> Value {
        match self.config.payload_type {
            PayloadKind::Message => json!({
                "model": self.config.model,
                "messages": [{"role": "user", "content": prompt}],
                "temperature": temperature,
                "max_tokens": max_tokens,
                "stream": stream,
            }),
            PayloadKind::Completion => json!({
                "model": self.config.model,
                "prompt": prompt,
                "stream": stream,
                "options": {
                    "temperature": temperature,
                    "num_predict": max_tokens,
                },
            }),
        }
    }

    fn extract_text(&self, body: &Value) -> Result<String, LlmError> {
        let text = match self.config.payload_type {
            PayloadKind::Message => body["choices"][0]["message"]["content"]
                .as_str()
                .or_else(|| body["content"].as_str()),
            PayloadKind::Completion => body["response"].as_str(),
        };
        text.map(|t| t.trim().to_string())
            .ok_or_else(|| LlmError::BadResponse(truncate_body(body)))
    }

    fn extract_fragment(&self, chunk: &Value) -> Option<String> {
        let fragment = match self.config.payload_type {
            PayloadKind::Message => chunk["choices"][0]["delta"]["content"].as_str(),
            PayloadKind::Completion => chunk["response"].as_str(),
        };
        fragment.filter(|f| !f.is_empty()).map(str::to_string)
    }

    fn map_transport(&self, error: reqwest::Error) -> LlmError {
        if error.is_timeout() {
            LlmError::Timeout(self.config.timeout)
        } else {
            LlmError::Transport(error.to_string())
        }
    }

    async fn dispatch(
        &self,
        request: &LlmRequest,
        payload: &Value,
        ctx: &CallContext<'_>,
    ) -> Result<String, LlmError> {
        let mut builder = self
            .client
            .post(&self.config.url)
            .timeout(Duration::from_secs(self.config.timeout));
        for (name, value) in &self.config.headers {
            builder = builder.header(name, value);
        }

        let response = builder
            .json(payload)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(300).collect();
            return Err(LlmError::Transport(format!("HTTP {status}: {preview}")));
        }

        if request.stream {
            self.read_stream(response, ctx).await
        } else {
            let body: Value = response.json().await.map_err(|e| self.map_transport(e))?;
            self.extract_text(&body)
        }
    }

    /// Reads an SSE-style body: `data: ` lines carry JSON chunks, `[DONE]`
    /// terminates. A stream that closes without `[DONE]` is treated as
    /// end-of-stream; the text so far is the result.
    async fn read_stream(
        &self,
        response: reqwest::Response,
        ctx: &CallContext<'_>,
    ) -> Result<String, LlmError> {
        let mut body = response.bytes_stream();
        let mut buffer = String::new();
        let mut text = String::new();

        while let Some(chunk) = body.next().await {
            let bytes = chunk.map_err(|e| self.map_transport(e))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                let line = line.trim_end();
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(text);
                }

                let parsed: Value = match serde_json::from_str(data) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!(error = %e, "error parsing stream chunk");
                        continue;
                    }
                };

                if let Some(fragment) = self.extract_fragment(&parsed) {
                    text.push_str(&fragment);
                    if let Some(on_fragment) = ctx.on_fragment {
                        on_fragment(&fragment);
                    }
                    if ctx.cancelled() {
                        return Err(LlmError::Cancelled);
                    }
                }
            }
        }

        Ok(text)
    }

    pub fn statistics(&self) -> LlmStatistics {
        LlmStatistics {
            total_calls:  self.total_calls.load(Ordering::Relaxed),
            total_time:   self.total_time_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            total_tokens: self.total_tokens.load(Ordering::Relaxed),
            model:        self.config.model.clone(),
            api_url:      self.config.url.clone(),
        }
    }

    pub fn reset_statistics(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.total_time_ms.store(0, Ordering::Relaxed);
        self.total_tokens.store(0, Ordering::Relaxed);
    }
}

#[async_trait]
impl LlmCaller for HttpLlmClient {
    async fn call(&self, request: LlmRequest, ctx: CallContext<'_>) -> Result<LlmReply, LlmError> {
        let temperature = request.temperature.unwrap_or(self.config.temperature);
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);
        let payload = self.build_payload(&request.prompt, temperature, max_tokens, request.stream);

        if let Some(events) = ctx.events {
            events.emit(WorkflowEvent::LlmRequest {
                endpoint:    self.config.url.clone(),
                model:       self.config.model.clone(),
                temperature,
                max_tokens,
                prompt:      request.prompt.clone(),
                payload:     payload.clone(),
            });
        }

        let started = Instant::now();
        match self.dispatch(&request, &payload, &ctx).await {
            Ok(text) => {
                let generation_time = started.elapsed().as_secs_f64();
                self.total_calls.fetch_add(1, Ordering::Relaxed);
                self.total_time_ms
                    .fetch_add(started.elapsed().as_millis() as u64, Ordering::Relaxed);

                if let Some(events) = ctx.events {
                    events.emit(WorkflowEvent::LlmResponse {
                        success:         true,
                        text:            Some(text.clone()),
                        generation_time: Some(generation_time),
                        response_length: Some(text.len()),
                        error:           None,
                    });
                }
                tracing::info!(seconds = generation_time, "LLM call successful");

                Ok(LlmReply {
                    text,
                    generation_time,
                    model: self.config.model.clone(),
                })
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
                tracing::error!(error = %e, "LLM call failed");
                Err(e)
            }
        }
    }
}

fn truncate_body(body: &Value) -> String {
    let raw = body.to_string();
    raw.chars().take(300).collect()
}
