use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

use super::{QueryInput, SearchOutput, StageUnit};
use crate::capability::{cosine_similarity, embed_or_zero, DocumentSearch, Embedder, QualityScorer};
use crate::error::StageError;
use crate::model::UNTITLED;

/// Finds candidate documents and scores them against the query.
pub struct SearchStage {
    search: Arc<dyn DocumentSearch>,
    embedder: Arc<dyn Embedder>,
    quality: Arc<dyn QualityScorer>,
    max_results: usize,
}

impl SearchStage {
    pub fn new(
        search: Arc<dyn DocumentSearch>,
        embedder: Arc<dyn Embedder>,
        quality: Arc<dyn QualityScorer>,
        max_results: usize,
    ) -> Self {
        Self {
            search,
            embedder,
            quality,
            max_results,
        }
    }
}

#[async_trait]
impl StageUnit for SearchStage {
    type Input = QueryInput;
    type Output = SearchOutput;

    async fn run(&self, input: QueryInput) -> Result<SearchOutput, StageError> {
        let query = input.query.trim();
        if query.is_empty() {
            return Err(StageError::malformed_input("query is empty"));
        }

        let mut documents = self.search.search(query, self.max_results).await?;
        debug!(count = documents.len(), "Search returned documents");

        let query_vector = embed_or_zero(self.embedder.as_ref(), query).await;
        let content_vectors = join_all(
            documents
                .iter()
                .map(|doc| embed_or_zero(self.embedder.as_ref(), &doc.content)),
        )
        .await;

        for (doc, vector) in documents.iter_mut().zip(content_vectors) {
            if doc.title.trim().is_empty() {
                doc.title = UNTITLED.to_string();
            }
            doc.set_relevance_score(cosine_similarity(&query_vector, &vector));
            let quality = self.quality.score(doc);
            doc.set_quality_score(quality);
        }

        info!(count = documents.len(), "Search complete");
        Ok(SearchOutput { documents })
    }
}
