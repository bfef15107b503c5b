//! Semantic search with adaptive threshold descent.
//!
//! The cutoff starts strict (1.0) and relaxes by `step` until enough
//! documents pass. Descending from the top guarantees the strictest
//! threshold that still yields `hit_target` hits when one exists, and
//! degrades to best-effort when it does not.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::{Metric, VectorIndex};

/// One recorded step of the threshold descent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAttempt {
    pub threshold:      f32,
    pub hits:           usize,
    pub target_reached: bool,
}

/// Summary of a dynamic-threshold search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdStats {
    /// "dynamic", "static", "no_results", or "disabled".
    pub method:          String,
    pub hit_target:      usize,
    pub step:            f32,
    pub final_threshold: Option<f32>,
    pub final_hits:      usize,
    pub target_reached:  bool,
    pub attempts:        usize,
    pub progression:     Vec<ThresholdAttempt>,
}

impl ThresholdStats {
    pub fn empty(method: &str, hit_target: usize, step: f32) -> Self {
        Self {
            method: method.to_string(),
            hit_target,
            step,
            final_threshold: None,
            final_hits: 0,
            target_reached: false,
            attempts: 0,
            progression: Vec::new(),
        }
    }
}

/// A document returned from search, with its similarity and provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content:  String,
    pub score:    f32,
    pub filename: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub index:    usize,
}

fn round3(value: f32) -> f32 {
    (value * 1000.0).round() / 1000.0
}

pub struct SearchService {
    index: Arc<VectorIndex>,
}

impl SearchService {
    pub fn new(index: Arc<VectorIndex>) -> Self {
        Self { index }
    }

    fn similarity(&self, raw: f32) -> f32 {
        match self.index.metric() {
            Metric::InnerProduct => raw,
            Metric::L2 => 1.0 / (1.0 + raw),
        }
    }

    /// Dynamic-threshold search over the top-`k` candidates.
    ///
    /// `on_attempt` fires once per threshold tried, in descent order. The
    /// returned hits are `(similarity, index)` pairs in the index's natural
    /// descending-similarity order.
    pub fn dynamic_threshold_search(
        &self,
        query: &[f32],
        k: usize,
        hit_target: usize,
        step: f32,
        initial_threshold: f32,
        mut on_attempt: impl FnMut(&ThresholdAttempt),
    ) -> Result<(Vec<(f32, usize)>, ThresholdStats)> {
        let candidates: Vec<(f32, usize)> = self
            .index
            .search(query, k)?
            .into_iter()
            .map(|(raw, idx)| (self.similarity(raw), idx))
            .collect();

        tracing::info!(
            target = hit_target,
            step,
            raw_results = candidates.len(),
            "dynamic threshold search"
        );

        if candidates.is_empty() {
            tracing::warn!("no documents found in index");
            return Ok((Vec::new(), ThresholdStats::empty("no_results", hit_target, step)));
        }

        let mut progression = Vec::new();
        let mut best: Vec<(f32, usize)> = Vec::new();
        let mut best_count = 0usize;
        let mut final_threshold = initial_threshold;
        let mut reached = false;

        // τ_i = initial − i·step, computed from i to avoid drift
        // accumulation; the last attempt lands exactly on 0.
        let mut attempt = 0u32;
        loop {
            let raw_threshold = initial_threshold - attempt as f32 * step;
            if raw_threshold < -1e-6 {
                break;
            }
            let threshold = raw_threshold.max(0.0);

            let kept: Vec<(f32, usize)> = candidates
                .iter()
                .copied()
                .filter(|(sim, _)| *sim >= threshold)
                .collect();
            let hits = kept.len();

            let record = ThresholdAttempt {
                threshold:      round3(threshold),
                hits,
                target_reached: hits >= hit_target,
            };
            on_attempt(&record);
            progression.push(record);
            tracing::debug!(threshold, hits, "threshold attempt");

            if hits >= hit_target {
                best = kept;
                best_count = hits;
                final_threshold = threshold;
                reached = true;
                tracing::info!(threshold, hits, "hit target reached");
                break;
            }

            if hits > best_count {
                best = kept;
                best_count = hits;
                final_threshold = threshold;
            }

            attempt += 1;
        }

        if !reached {
            tracing::warn!(
                hit_target,
                best_count,
                "could not reach hit target, returning best effort"
            );
        }

        let stats = ThresholdStats {
            method:          "dynamic".to_string(),
            hit_target,
            step,
            final_threshold: Some(round3(final_threshold)),
            final_hits:      best_count,
            target_reached:  reached,
            attempts:        progression.len(),
            progression,
        };
        Ok((best, stats))
    }

    /// Plain top-`k` search, no descent.
    pub fn static_search(
        &self,
        query: &[f32],
        k: usize,
        hit_target: usize,
        step: f32,
    ) -> Result<(Vec<(f32, usize)>, ThresholdStats)> {
        let hits: Vec<(f32, usize)> = self
            .index
            .search(query, k)?
            .into_iter()
            .map(|(raw, idx)| (self.similarity(raw), idx))
            .collect();
        let count = hits.len();
        let stats = ThresholdStats {
            method: "static".to_string(),
            hit_target,
            step,
            final_threshold: None,
            final_hits: count,
            target_reached: count >= hit_target,
            attempts: 0,
            progression: Vec::new(),
        };
        Ok((hits, stats))
    }

    /// Resolves `(similarity, index)` hits into full documents.
    pub fn resolve_documents(&self, hits: &[(f32, usize)]) -> Vec<RetrievedDocument> {
        hits.iter()
            .filter_map(|(score, idx)| {
                self.index.metadata(*idx).map(|meta| RetrievedDocument {
                    content:  meta.content,
                    score:    *score,
                    filename: meta.filename,
                    doc_type: meta.doc_type,
                    index:    *idx,
                })
            })
            .collect()
    }
}
