//! Flat vector index with persisted artifacts.
//!
//! Stores unit-normalized vectors alongside document metadata, indexed
//! 0..n-1. Persists as a pair: a bincode vector file and a JSON metadata
//! sidecar, replaced together via the backup-rename protocol. Single writer,
//! many readers: searches share a read lock; `add` holds the write lock
//! through the final rename so readers never observe a half-replaced pair.

use std::path::PathBuf;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::persist;

/// Similarity mode, fixed per index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Inner product over unit vectors (cosine). Raw score = similarity.
    #[default]
    InnerProduct,
    /// Squared euclidean distance. Similarity = 1 / (1 + distance).
    L2,
}

/// Metadata stored next to each vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocMetadata {
    pub content:  String,
    pub filename: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    #[serde(flatten)]
    pub extra:    serde_json::Map<String, serde_json::Value>,
}

impl DocMetadata {
    pub fn new(content: impl Into<String>, filename: impl Into<String>, doc_type: impl Into<String>) -> Self {
        Self {
            content:  content.into(),
            filename: filename.into(),
            doc_type: doc_type.into(),
            extra:    serde_json::Map::new(),
        }
    }
}

/// On-disk shape of the vector artifact.
#[derive(Serialize, Deserialize)]
struct VectorArtifact {
    dimension: usize,
    metric:    Metric,
    /// Row-major, `count * dimension` values.
    data:      Vec<f32>,
}

#[derive(Default)]
struct IndexState {
    vectors:  Vec<f32>,
    metadata: Vec<DocMetadata>,
}

pub struct VectorIndex {
    dimension:     usize,
    metric:        Metric,
    index_path:    PathBuf,
    metadata_path: PathBuf,
    state:         RwLock<IndexState>,
}

impl VectorIndex {
    pub fn new(
        dimension: usize,
        metric: Metric,
        index_path: impl Into<PathBuf>,
        metadata_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            dimension,
            metric,
            index_path: index_path.into(),
            metadata_path: metadata_path.into(),
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(|e| e.into_inner()).metadata.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads the persisted pair if both artifacts exist, otherwise starts
    /// empty. A dimension or count mismatch between the artifacts is treated
    /// as corruption.
    pub fn load_or_create(&self) -> Result<()> {
        if !self.index_path.exists() || !self.metadata_path.exists() {
            tracing::info!(
                path = %self.index_path.display(),
                dimension = self.dimension,
                "creating new vector index"
            );
            return Ok(());
        }

        let raw = std::fs::read(&self.index_path)
            .map_err(|e| Error::Persist { path: self.index_path.clone(), source: e })?;
        let artifact: VectorArtifact = bincode::deserialize(&raw)
            .map_err(|e| Error::Index(format!("failed to decode vector artifact: {e}")))?;

        if artifact.dimension != self.dimension {
            return Err(Error::Index(format!(
                "vector artifact dimension {} does not match configured {}",
                artifact.dimension, self.dimension
            )));
        }

        let raw_meta = std::fs::read_to_string(&self.metadata_path)
            .map_err(|e| Error::Persist { path: self.metadata_path.clone(), source: e })?;
        let metadata: Vec<DocMetadata> = serde_json::from_str(&raw_meta)?;

        if artifact.data.len() != metadata.len() * self.dimension {
            return Err(Error::Index(format!(
                "vector artifact holds {} values but metadata sidecar lists {} documents",
                artifact.data.len(),
                metadata.len()
            )));
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.vectors = artifact.data;
        state.metadata = metadata;
        tracing::info!(documents = state.metadata.len(), "loaded vector index");
        Ok(())
    }

    /// Appends vectors with their metadata. Entries are never mutated or
    /// removed afterwards.
    pub fn add(&self, vectors: &[Vec<f32>], metadata: Vec<DocMetadata>, save: bool) -> Result<()> {
        if vectors.len() != metadata.len() {
            return Err(Error::Index(format!(
                "vector count ({}) must match metadata count ({})",
                vectors.len(),
                metadata.len()
            )));
        }
        if vectors.is_empty() {
            tracing::warn!("no vectors provided to add");
            return Ok(());
        }
        for v in vectors {
            if v.len() != self.dimension {
                return Err(Error::Index(format!(
                    "vector has dimension {}, index requires {}",
                    v.len(),
                    self.dimension
                )));
            }
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        for v in vectors {
            state.vectors.extend_from_slice(v);
        }
        state.metadata.extend(metadata);
        tracing::info!(documents = state.metadata.len(), "index updated");

        if save {
            self.save_locked(&state)?;
        }
        Ok(())
    }

    /// Removes every entry, then persists the empty pair.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let removed = state.metadata.len();
        state.vectors.clear();
        state.metadata.clear();
        tracing::info!(removed, "cleared vector index");
        self.save_locked(&state)
    }

    pub fn save(&self) -> Result<()> {
        let state = self.state.write().unwrap_or_else(|e| e.into_inner());
        self.save_locked(&state)
    }

    fn save_locked(&self, state: &IndexState) -> Result<()> {
        let artifact = VectorArtifact {
            dimension: self.dimension,
            metric:    self.metric,
            data:      state.vectors.clone(),
        };
        let encoded = bincode::serialize(&artifact)
            .map_err(|e| Error::Index(format!("failed to encode vector artifact: {e}")))?;

        // Vector file first, metadata sidecar second: a crash in between is
        // detected at load as a count mismatch rather than silently pairing
        // stale metadata with new vectors.
        persist::write_atomic(&self.index_path, &encoded)?;
        let meta_json = serde_json::to_vec_pretty(&state.metadata)?;
        persist::write_atomic(&self.metadata_path, &meta_json)?;
        Ok(())
    }

    /// Top-`k` raw scores and indices, in the index's natural
    /// descending-similarity order. For `InnerProduct` the raw score is the
    /// dot product; for `L2` it is the squared distance.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f32, usize)>> {
        if query.len() != self.dimension {
            return Err(Error::Index(format!(
                "query has dimension {}, index requires {}",
                query.len(),
                self.dimension
            )));
        }

        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let count = state.metadata.len();
        let mut scored: Vec<(f32, usize)> = (0..count)
            .map(|i| {
                let row = &state.vectors[i * self.dimension..(i + 1) * self.dimension];
                let raw = match self.metric {
                    Metric::InnerProduct => dot(query, row),
                    Metric::L2 => squared_distance(query, row),
                };
                (raw, i)
            })
            .collect();

        match self.metric {
            Metric::InnerProduct => {
                scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal))
            }
            Metric::L2 => {
                scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            }
        }
        scored.truncate(k.min(count));
        Ok(scored)
    }

    /// Metadata snapshot for the given entry.
    pub fn metadata(&self, index: usize) -> Option<DocMetadata> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.metadata.get(index).cloned()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
