//! Knowledge retrieval for task context enhancement.
//!
//! Wraps the vector index and search service behind the single call the task
//! executor makes: "give me documents for this task". Also ingests validated
//! task outputs back into the index when configured to.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::embed::SentenceEncoder;
use crate::error::Result;
use crate::events::{EventBus, WorkflowEvent};
use crate::index::{DocMetadata, VectorIndex};
use crate::search::{RetrievedDocument, SearchService, ThresholdStats};
use crate::settings::RetrievalConfig;

/// Maximum characters of document content carried on transport events.
const PREVIEW_CHARS: usize = 200;

/// Outcome of one retrieval call. `documents` hold full content; the
/// corresponding event carries truncated previews.
#[derive(Debug, Clone)]
pub struct RetrievalResult {
    pub documents:       Vec<RetrievedDocument>,
    pub threshold_used:  Option<f32>,
    pub retrieval_time:  f64,
    pub threshold_stats: ThresholdStats,
    pub query:           String,
}

impl RetrievalResult {
    fn empty(method: &str, config: &RetrievalConfig, query: String, elapsed: f64) -> Self {
        Self {
            documents:       Vec::new(),
            threshold_used:  None,
            retrieval_time:  elapsed,
            threshold_stats: ThresholdStats::empty(method, config.hit_target, config.step),
            query,
        }
    }
}

/// Provenance recorded when a task output is ingested into the index.
#[derive(Debug, Clone)]
pub struct TaskOutputMeta {
    pub agent_name: String,
    pub task_id:    u32,
    pub task_name:  String,
    pub goal:       String,
    pub timestamp:  DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RetrieverStats {
    pub enabled:       bool,
    pub num_documents: usize,
    pub model:         String,
    pub dimension:     usize,
    pub hit_target:    usize,
    pub top_k:         usize,
    pub step:          f32,
}

pub struct Retriever {
    config:  RetrievalConfig,
    encoder: Arc<dyn SentenceEncoder>,
    index:   Arc<VectorIndex>,
    search:  SearchService,
}

impl Retriever {
    /// Builds the retriever and loads the persisted index pair.
    pub fn new(config: RetrievalConfig, encoder: Arc<dyn SentenceEncoder>) -> Result<Self> {
        let index = Arc::new(VectorIndex::new(
            config.dimension,
            config.metric,
            &config.index_path,
            &config.metadata_path,
        ));
        index.load_or_create()?;
        tracing::info!(
            model = %config.embedding_model,
            dimension = config.dimension,
            documents = index.len(),
            "retriever initialized"
        );
        Ok(Self {
            search: SearchService::new(index.clone()),
            config,
            encoder,
            index,
        })
    }

    pub fn is_available(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieves documents relevant to a task. CPU-bound (encoding) and
    /// blocking (index IO): run on a blocking pool, never on the event loop.
    ///
    /// Errors are internal to the tool: a failed retrieval returns an empty
    /// result so the task proceeds without extra context.
    pub fn retrieve_for_task(
        &self,
        agent_id: &str,
        task_id: u32,
        task_query: &str,
        agent_context: &str,
        hit_target: Option<usize>,
        top_k: Option<usize>,
        events: &EventBus,
    ) -> RetrievalResult {
        let query = if agent_context.is_empty() {
            task_query.to_string()
        } else {
            format!("{agent_context}\n\n{task_query}")
        };

        if !self.is_available() {
            tracing::warn!("retrieval not available, returning empty results");
            return RetrievalResult::empty("disabled", &self.config, query, 0.0);
        }

        let hit_target = hit_target.unwrap_or(self.config.hit_target);
        let top_k = top_k.unwrap_or(self.config.top_k);
        let started = Instant::now();

        events.emit(WorkflowEvent::ToolCallStart {
            agent_id: agent_id.to_string(),
            task_id,
            query: truncate(&query, PREVIEW_CHARS),
            hit_target,
            top_k,
        });

        tracing::info!(
            hit_target,
            top_k,
            dynamic = self.config.use_dynamic_threshold,
            "retrieving documents for task"
        );

        let outcome = self.run_search(&query, top_k, hit_target, agent_id, task_id, events);
        let elapsed = started.elapsed().as_secs_f64();

        let (documents, stats) = match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "retrieval failed");
                return RetrievalResult::empty("error", &self.config, query, elapsed);
            }
        };

        let threshold_used = stats.final_threshold;
        let previews = documents
            .iter()
            .map(|d| RetrievedDocument {
                content: truncate(&d.content, PREVIEW_CHARS),
                ..d.clone()
            })
            .collect();

        events.emit(WorkflowEvent::ToolCallComplete {
            agent_id: agent_id.to_string(),
            task_id,
            documents: previews,
            threshold_used,
            retrieval_time: elapsed,
            threshold_stats: stats.clone(),
            query: truncate(&query, PREVIEW_CHARS),
        });

        tracing::info!(
            documents = documents.len(),
            ?threshold_used,
            time = elapsed,
            "retrieval complete"
        );

        RetrievalResult {
            documents,
            threshold_used,
            retrieval_time: elapsed,
            threshold_stats: stats,
            query,
        }
    }

    fn run_search(
        &self,
        query: &str,
        top_k: usize,
        hit_target: usize,
        agent_id: &str,
        task_id: u32,
        events: &EventBus,
    ) -> Result<(Vec<RetrievedDocument>, ThresholdStats)> {
        let vector = self.encoder.encode(query)?;

        let (hits, stats) = if self.config.use_dynamic_threshold {
            self.search.dynamic_threshold_search(
                &vector,
                top_k,
                hit_target,
                self.config.step,
                1.0,
                |attempt| {
                    events.emit(WorkflowEvent::ToolThresholdAttempt {
                        agent_id:       agent_id.to_string(),
                        task_id,
                        threshold:      attempt.threshold,
                        hits:           attempt.hits,
                        target:         hit_target,
                        target_reached: attempt.target_reached,
                    });
                },
            )?
        } else {
            self.search.static_search(&vector, top_k, hit_target, self.config.step)?
        };

        Ok((self.search.resolve_documents(&hits), stats))
    }

    /// Appends a validated task output to the knowledge base. Failures are
    /// the caller's to log; they never block task completion.
    pub fn add_task_output(&self, output: &str, meta: &TaskOutputMeta) -> Result<()> {
        let mut doc = DocMetadata::new(
            output,
            format!("{}_{}.txt", meta.agent_name, meta.task_id),
            "task_output",
        );
        doc.extra.insert("agent_name".into(), meta.agent_name.clone().into());
        doc.extra.insert("task_name".into(), meta.task_name.clone().into());
        doc.extra.insert("goal".into(), meta.goal.clone().into());
        doc.extra
            .insert("timestamp".into(), meta.timestamp.to_rfc3339().into());

        let vector = self.encoder.encode(output)?;
        self.index.add(&[vector], vec![doc], true)?;
        tracing::info!(
            agent = %meta.agent_name,
            task_id = meta.task_id,
            "added task output to knowledge base"
        );
        Ok(())
    }

    /// Bulk-ingests knowledge documents, one filename per text.
    pub fn add_documents(&self, texts: &[String], filenames: &[String], doc_type: &str) -> Result<()> {
        if texts.len() != filenames.len() {
            return Err(crate::error::Error::Index(
                "document count must match filename count".into(),
            ));
        }
        let vectors = self.encoder.encode_batch(texts)?;
        let metadata = texts
            .iter()
            .zip(filenames)
            .map(|(text, name)| DocMetadata::new(text, name, doc_type))
            .collect();
        self.index.add(&vectors, metadata, true)?;
        tracing::info!(count = texts.len(), doc_type, "added knowledge documents");
        Ok(())
    }

    pub fn stats(&self) -> RetrieverStats {
        RetrieverStats {
            enabled:       self.config.enabled,
            num_documents: self.index.len(),
            model:         self.config.embedding_model.clone(),
            dimension:     self.config.dimension,
            hit_target:    self.config.hit_target,
            top_k:         self.config.top_k,
            step:          self.config.step,
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}
