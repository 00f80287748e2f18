//! # Sift Embedding
//!
//! Vector embeddings via Ollama and similarity indexes over SQLite or Qdrant.
//!
//! Both indexes key documents by their content key, so re-adding the same
//! normalized content never produces a second copy.

pub mod ollama;
pub mod qdrant;
pub mod sqlite;

pub use ollama::OllamaEmbedder;
pub use qdrant::QdrantIndex;
pub use sqlite::SqliteIndex;

use sift_core::{CollaboratorError, Document, Embedder};
use tracing::warn;

/// Documents that were embedded, and the first embedding failure if any.
pub(crate) struct EmbeddedBatch<'a> {
    pub embedded: Vec<(&'a Document, Vec<f32>)>,
    pub failed: usize,
    pub first_error: Option<CollaboratorError>,
}

impl EmbeddedBatch<'_> {
    /// `Err` only when nothing could be embedded, so a partial batch is still
    /// stored.
    pub fn check(&self) -> Result<(), CollaboratorError> {
        match &self.first_error {
            Some(e) if self.embedded.is_empty() => Err(e.clone()),
            _ => Ok(()),
        }
    }
}

/// Embed each document, skipping the ones whose embedding fails.
pub(crate) async fn embed_documents<'a>(
    embedder: &dyn Embedder,
    documents: Vec<&'a Document>,
) -> EmbeddedBatch<'a> {
    let mut batch = EmbeddedBatch {
        embedded: Vec::new(),
        failed: 0,
        first_error: None,
    };
    for doc in documents {
        match embedder.embed(&doc.content).await {
            Ok(vector) => batch.embedded.push((doc, vector)),
            Err(e) => {
                warn!(title = doc.display_title(), error = %e, "Embedding failed, document not indexed");
                batch.failed += 1;
                batch.first_error.get_or_insert(e);
            }
        }
    }
    batch
}
