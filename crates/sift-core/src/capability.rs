//! Interfaces to external collaborators.
//!
//! The engine is constructed with one implementation of each trait; nothing
//! in the core reaches for a global client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::CollaboratorError;
use crate::model::{ChartArtifact, ChartData, Document, DEFAULT_QUALITY_SCORE};

/// A single text-generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.3,
            max_tokens: 500,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Natural-language generation.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CollaboratorError>;
}

/// Text embedding.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;

    /// Dimension of the vectors this embedder produces.
    fn dimension(&self) -> usize;
}

/// Academic or web document search. Returned documents have unset scores.
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>, CollaboratorError>;
}

/// Persistent nearest-neighbour store over document content.
///
/// Implementations key documents by [`Document::content_key`], so adding the
/// same normalized content twice stores it once.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Identifier used as the `source` of documents that lack one.
    fn name(&self) -> &str;

    /// Store documents, returning how many were new.
    async fn add(&self, documents: &[Document]) -> Result<usize, CollaboratorError>;

    /// Up to `k` documents ordered by descending similarity to `text`.
    async fn query(&self, text: &str, k: usize) -> Result<Vec<Document>, CollaboratorError>;

    /// Number of stored documents.
    async fn count(&self) -> Result<usize, CollaboratorError>;
}

/// Chart rendering.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn render(&self, charts: &[ChartData]) -> Result<BTreeMap<String, ChartArtifact>, CollaboratorError>;
}

/// Heuristic document quality in `[0, 1]`.
pub trait QualityScorer: Send + Sync {
    fn score(&self, document: &Document) -> f64;
}

/// Scores every document with the same value.
#[derive(Debug, Clone, Copy)]
pub struct ConstantQuality(pub f64);

impl Default for ConstantQuality {
    fn default() -> Self {
        Self(DEFAULT_QUALITY_SCORE)
    }
}

impl QualityScorer for ConstantQuality {
    fn score(&self, _document: &Document) -> f64 {
        self.0
    }
}

/// Embed `text`, substituting a zero vector of the embedder's dimension on
/// failure so downstream similarity math stays defined.
pub async fn embed_or_zero(embedder: &dyn Embedder, text: &str) -> Vec<f32> {
    match embedder.embed(text).await {
        Ok(vector) => vector,
        Err(e) => {
            warn!(error = %e, "Embedding failed, using zero vector");
            vec![0.0; embedder.dimension()]
        }
    }
}

/// Cosine similarity; 0.0 when either vector has zero norm or the lengths
/// differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    if sim.is_finite() {
        sim
    } else {
        0.0
    }
}
