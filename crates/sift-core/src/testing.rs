//! In-memory collaborators for tests.
//!
//! Compiled for this crate's own tests and, through the `testing` feature,
//! for downstream crates' dev-dependencies.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::capability::{
    cosine_similarity, ChartRenderer, DocumentSearch, Embedder, GenerationRequest, Generator,
    SimilarityIndex,
};
use crate::dedup::ContentKey;
use crate::error::{Capability, CollaboratorError};
use crate::model::{ChartArtifact, ChartData, Document};

type Reply = Box<dyn Fn(&GenerationRequest) -> Result<String, CollaboratorError> + Send + Sync>;

/// Generator driven by a closure; counts its calls.
pub struct ScriptedGenerator {
    reply: Reply,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new<F>(reply: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<String, CollaboratorError> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answers with `text`.
    pub fn replying(text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(move |_| Ok(text.clone()))
    }

    /// Always fails as unavailable.
    pub fn failing() -> Self {
        Self::new(|_| {
            Err(CollaboratorError::unavailable(
                Capability::Generation,
                "connection refused",
            ))
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.reply)(&request)
    }
}

/// Deterministic bag-of-words embedder: each lowercase word is hashed into
/// one of `dimension` buckets.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        let mut vector = vec![0.0f32; self.dimension];
        for word in text.split_whitespace() {
            let digest = Sha256::digest(word.to_lowercase().as_bytes());
            let bucket = u64::from_be_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dimension;
            vector[bucket] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embedder that is always down.
#[derive(Debug, Clone, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, CollaboratorError> {
        Err(CollaboratorError::unavailable(Capability::Embedding, "timed out"))
    }

    fn dimension(&self) -> usize {
        8
    }
}

/// Search that returns a fixed result.
#[derive(Debug, Clone)]
pub struct StaticSearch {
    result: Result<Vec<Document>, CollaboratorError>,
}

impl StaticSearch {
    pub fn new(documents: Vec<Document>) -> Self {
        Self {
            result: Ok(documents),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err(CollaboratorError::unavailable(
                Capability::DocumentSearch,
                "search service unreachable",
            )),
        }
    }
}

#[async_trait]
impl DocumentSearch for StaticSearch {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<Document>, CollaboratorError> {
        self.result
            .clone()
            .map(|docs| docs.into_iter().take(max_results).collect())
    }
}

struct Entry {
    document: Document,
    vector: Vec<f32>,
}

/// Similarity index held in memory, ranked by cosine over an embedder.
pub struct InMemoryIndex {
    embedder: Arc<dyn Embedder>,
    entries: Mutex<BTreeMap<ContentKey, (usize, Entry)>>,
    unreachable: bool,
    fail_when_query_contains: Option<String>,
}

impl InMemoryIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: Mutex::new(BTreeMap::new()),
            unreachable: false,
            fail_when_query_contains: None,
        }
    }

    /// Every call fails as unavailable.
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Queries containing `needle` fail; others succeed.
    pub fn failing_for(mut self, needle: impl Into<String>) -> Self {
        self.fail_when_query_contains = Some(needle.into());
        self
    }

    fn down() -> CollaboratorError {
        CollaboratorError::unavailable(Capability::SimilarityIndex, "index unreachable")
    }
}

#[async_trait]
impl SimilarityIndex for InMemoryIndex {
    fn name(&self) -> &str {
        "memory"
    }

    async fn add(&self, documents: &[Document]) -> Result<usize, CollaboratorError> {
        if self.unreachable {
            return Err(Self::down());
        }
        let mut prepared = Vec::with_capacity(documents.len());
        for doc in documents {
            let vector = self.embedder.embed(&doc.content).await?;
            prepared.push((doc.content_key(), doc.clone(), vector));
        }
        let mut entries = self.entries.lock().map_err(|_| Self::down())?;
        let mut added = 0;
        for (key, document, vector) in prepared {
            if entries.contains_key(&key) {
                continue;
            }
            let seq = entries.len();
            entries.insert(key, (seq, Entry { document, vector }));
            added += 1;
        }
        Ok(added)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<Document>, CollaboratorError> {
        if self.unreachable {
            return Err(Self::down());
        }
        if let Some(needle) = &self.fail_when_query_contains {
            if text.contains(needle.as_str()) {
                return Err(Self::down());
            }
        }
        let query = self.embedder.embed(text).await?;
        let entries = self.entries.lock().map_err(|_| Self::down())?;
        let mut scored: Vec<(f64, usize, &Entry)> = entries
            .values()
            .map(|(seq, entry)| (cosine_similarity(&query, &entry.vector), *seq, entry))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, _, entry)| entry.document.clone().with_relevance(score))
            .collect())
    }

    async fn count(&self) -> Result<usize, CollaboratorError> {
        if self.unreachable {
            return Err(Self::down());
        }
        Ok(self.entries.lock().map_err(|_| Self::down())?.len())
    }
}

/// Renderer that emits each chart's name as plain text, or always fails.
#[derive(Debug, Clone, Default)]
pub struct StaticRenderer {
    fail: bool,
}

impl StaticRenderer {
    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl ChartRenderer for StaticRenderer {
    async fn render(&self, charts: &[ChartData]) -> Result<BTreeMap<String, ChartArtifact>, CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::rejected(
                Capability::ChartRendering,
                "renderer crashed",
            ));
        }
        Ok(charts
            .iter()
            .map(|chart| {
                (
                    chart.name.clone(),
                    ChartArtifact::new("text/plain", chart.name.as_bytes().to_vec()),
                )
            })
            .collect())
    }
}

/// Three papers with distinct content.
pub fn sample_documents() -> Vec<Document> {
    vec![
        Document::new(
            "Retail demand forecasting with transformers",
            "Transformer models improve weekly retail demand forecasts across regions.",
            "arxiv",
        )
        .with_url("http://arxiv.org/abs/2401.00001"),
        Document::new(
            "Consumer sentiment and market volatility",
            "Social media sentiment explains short-term volatility in consumer markets.",
            "arxiv",
        )
        .with_url("http://arxiv.org/abs/2401.00002"),
        Document::new(
            "Pricing strategies for subscription services",
            "Dynamic pricing raises retention for subscription businesses in saturated markets.",
            "arxiv",
        )
        .with_url("http://arxiv.org/abs/2401.00003"),
    ]
}
