//! Retrieval fusion.
//!
//! Expands a query into a few variants, runs each against the similarity
//! index and merges the batches behind the seed documents. Order is
//! provenance priority (seeds, original query, variants in order) and is
//! never re-sorted by score; duplicates by normalized content keep their
//! first occurrence.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capability::{GenerationRequest, Generator, SimilarityIndex};
use crate::dedup::{dedup_documents, normalize_content};
use crate::error::CollaboratorError;
use crate::model::Document;

/// How query variants are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpansionMode {
    #[default]
    Templates,
    /// Ask the generator, padding with templates when it comes up short.
    Generated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionSettings {
    /// Neighbours fetched per query.
    pub k: usize,
    pub variant_count: usize,
    pub expansion: ExpansionMode,
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            k: 10,
            variant_count: 3,
            expansion: ExpansionMode::Templates,
        }
    }
}

/// Template variants of `query`, in a fixed order.
pub fn template_variants(query: &str) -> [String; 3] {
    let query = query.trim();
    [
        format!("different perspectives on {}", query),
        format!("recent developments in {}", query),
        format!("statistical data about {}", query),
    ]
}

/// Documents produced by [`RetrievalFusion::fuse`] and the failures that
/// reduced them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FusionOutcome {
    pub documents: Vec<Document>,
    pub warnings: Vec<String>,
}

impl FusionOutcome {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

pub struct RetrievalFusion {
    index: Arc<dyn SimilarityIndex>,
    generator: Option<Arc<dyn Generator>>,
    settings: FusionSettings,
}

impl RetrievalFusion {
    pub fn new(index: Arc<dyn SimilarityIndex>, settings: FusionSettings) -> Self {
        Self {
            index,
            generator: None,
            settings,
        }
    }

    /// Generator used when `expansion = generated`.
    pub fn with_generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    /// Add documents to the index. Failures are logged and returned for the
    /// caller to report; they never block [`fuse`](Self::fuse).
    pub async fn index(&self, documents: &[Document]) -> Result<usize, CollaboratorError> {
        if documents.is_empty() {
            return Ok(0);
        }
        match self.index.add(documents).await {
            Ok(added) => {
                info!(
                    index = self.index.name(),
                    count = documents.len(),
                    added,
                    "Indexed documents"
                );
                Ok(added)
            }
            Err(e) => {
                warn!(index = self.index.name(), error = %e, "Index population failed");
                Err(e)
            }
        }
    }

    /// Query variants, excluding the query itself. At most
    /// `variant_count`, fewer only when templates run out.
    pub async fn expand(&self, query: &str) -> Vec<String> {
        let wanted = self.settings.variant_count;
        let mut variants: Vec<String> = Vec::with_capacity(wanted);

        if self.settings.expansion == ExpansionMode::Generated {
            match &self.generator {
                Some(generator) => match generator.generate(expansion_request(query, wanted)).await {
                    Ok(text) => {
                        for line in text.lines() {
                            push_variant(&mut variants, query, clean_variant(line), wanted);
                        }
                        debug!(count = variants.len(), "Generated query variants");
                    }
                    Err(e) => warn!(error = %e, "Query expansion failed, using templates"),
                },
                None => warn!("Generated expansion configured without a generator, using templates"),
            }
        }

        for template in template_variants(query) {
            push_variant(&mut variants, query, template, wanted);
        }
        variants
    }

    /// Merge seeds with index results for the query and its variants.
    pub async fn fuse(&self, query: &str, seeds: Vec<Document>) -> FusionOutcome {
        if query.trim().is_empty() {
            return FusionOutcome {
                documents: dedup_documents(seeds),
                warnings: Vec::new(),
            };
        }

        let mut queries = vec![query.to_string()];
        queries.extend(self.expand(query).await);

        let mut batches = Vec::with_capacity(queries.len());
        let mut failures = Vec::new();
        for q in &queries {
            match self.index.query(q, self.settings.k).await {
                Ok(batch) => {
                    debug!(query = %q, count = batch.len(), "Index query");
                    batches.push(batch);
                }
                Err(e) => {
                    warn!(query = %q, error = %e, "Index query failed");
                    failures.push(format!("index query \"{}\" failed: {}", q, e));
                }
            }
        }

        let mut warnings = Vec::new();
        if failures.len() == queries.len() {
            warnings.push(format!(
                "similarity index unreachable, kept {} seed documents: {}",
                seeds.len(),
                failures[0]
            ));
        } else {
            warnings.extend(failures);
        }

        let seed_count = seeds.len();
        let documents = dedup_documents(seeds.into_iter().chain(batches.into_iter().flatten()));
        info!(
            seeds = seed_count,
            queries = queries.len(),
            count = documents.len(),
            "Fused retrieval results"
        );
        FusionOutcome {
            documents,
            warnings,
        }
    }
}

fn expansion_request(query: &str, count: usize) -> GenerationRequest {
    GenerationRequest::new(
        "You rewrite research queries. Reply with one alternative query per line and nothing else.",
        format!(
            "Write {} alternative search queries that cover different angles of: {}",
            count, query
        ),
    )
    .temperature(0.7)
    .max_tokens(200)
}

/// Strip list markers and quotes from a generated line.
fn clean_variant(line: &str) -> String {
    let line = line.trim().trim_start_matches(['-', '*', '•']).trim_start();
    let line = match line.find(['.', ')']) {
        Some(pos) if pos > 0 && line[..pos].chars().all(|c| c.is_ascii_digit()) => &line[pos + 1..],
        _ => line,
    };
    line.trim().trim_matches('"').trim().to_string()
}

fn push_variant(variants: &mut Vec<String>, query: &str, candidate: String, wanted: usize) {
    if variants.len() >= wanted || candidate.is_empty() {
        return;
    }
    let key = normalize_content(&candidate);
    if key == normalize_content(query) || variants.iter().any(|v| normalize_content(v) == key) {
        return;
    }
    variants.push(candidate);
}
