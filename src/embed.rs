//! Text encoding for the vector subsystem.
//!
//! The retriever treats encoding as an opaque function `text → unit vector`.
//! `SentenceEncoder` is the seam for plugging in a real embedding model; the
//! default `HashingEncoder` is a deterministic character-trigram feature
//! hasher, good enough for tests and for deployments without a model.
//!
//! Encoding is CPU-bound: callers run it on a blocking pool, never on the
//! event loop.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::Result;

pub trait SentenceEncoder: Send + Sync {
    /// Output dimension; every returned vector has exactly this length.
    fn dimension(&self) -> usize;

    /// Encodes `text` into a unit-normalized vector.
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.encode(t)).collect()
    }
}

/// Deterministic feature-hashing encoder over lowercase character trigrams.
#[derive(Debug, Clone)]
pub struct HashingEncoder {
    dimension: usize,
}

impl HashingEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn bucket(&self, gram: &[char]) -> usize {
        let mut hasher = DefaultHasher::new();
        gram.hash(&mut hasher);
        (hasher.finish() as usize) % self.dimension
    }
}

impl SentenceEncoder for HashingEncoder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let chars: Vec<char> = text.to_lowercase().chars().collect();

        if chars.len() < 3 {
            if !chars.is_empty() {
                vector[self.bucket(&chars)] = 1.0;
            }
            return Ok(vector);
        }

        for gram in chars.windows(3) {
            vector[self.bucket(gram)] += 1.0;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}
