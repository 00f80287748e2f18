//! Qdrant similarity index.
//!
//! Stores one point per document, keyed by a UUID derived from the content
//! key, with the serialized document in the payload. Searches use cosine
//! distance via the qdrant-client gRPC library.

use anyhow::{Context, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::{
    value::Kind, CreateCollectionBuilder, Distance, GetPointsBuilder, PointId, PointStruct,
    SearchPointsBuilder, UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use sift_core::dedup::ContentKey;
use sift_core::{Capability, CollaboratorError, Document, Embedder, SimilarityIndex};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::embed_documents;
use uuid::Uuid;

/// Default Qdrant gRPC URL.
pub const DEFAULT_QDRANT_URL: &str = "http://localhost:6334";

/// Default collection name.
pub const DOCUMENTS_COLLECTION: &str = "sift_documents";

const DOCUMENT_FIELD: &str = "document";

/// Similarity index backed by a Qdrant collection.
///
/// Construction makes no network call. The collection is checked (and created
/// if needed) on the first `add`, `query` or `count`; until that succeeds
/// every call reports the index as unavailable.
#[derive(Clone)]
pub struct QdrantIndex {
    client: Qdrant,
    collection: String,
    embedder: Arc<dyn Embedder>,
    ready: Arc<OnceCell<()>>,
}

impl QdrantIndex {
    pub fn new(url: &str, collection: &str, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .context("Failed to create Qdrant client")?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            embedder,
            ready: Arc::new(OnceCell::new()),
        })
    }

    /// Ensure the collection exists with the embedder's dimension.
    pub async fn ensure_collection(&self) -> Result<(), CollaboratorError> {
        self.ready
            .get_or_try_init(|| async {
                let exists = self
                    .client
                    .collection_exists(&self.collection)
                    .await
                    .map_err(|e| unavailable("Failed to check collection", e))?;

                if !exists {
                    self.client
                        .create_collection(
                            CreateCollectionBuilder::new(&self.collection).vectors_config(
                                VectorParamsBuilder::new(
                                    self.embedder.dimension() as u64,
                                    Distance::Cosine,
                                ),
                            ),
                        )
                        .await
                        .map_err(|e| unavailable("Failed to create collection", e))?;

                    info!(collection = %self.collection, "Created Qdrant collection");
                } else {
                    debug!(collection = %self.collection, "Collection already exists");
                }
                Ok::<(), CollaboratorError>(())
            })
            .await
            .map(|_| ())
    }

    /// Point ids of `keys` already stored.
    async fn existing(&self, keys: &[ContentKey]) -> Result<HashSet<String>, CollaboratorError> {
        let ids: Vec<PointId> = keys.iter().map(|k| PointId::from(point_id(k))).collect();
        let response = self
            .client
            .get_points(GetPointsBuilder::new(&self.collection, ids))
            .await
            .map_err(|e| unavailable("Failed to look up points", e))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| point.id)
            .filter_map(|id| match id.point_id_options {
                Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid)) => Some(uuid),
                _ => None,
            })
            .collect())
    }
}

#[async_trait]
impl SimilarityIndex for QdrantIndex {
    fn name(&self) -> &str {
        &self.collection
    }

    async fn add(&self, documents: &[Document]) -> Result<usize, CollaboratorError> {
        self.ensure_collection().await?;
        let keys: Vec<ContentKey> = documents.iter().map(Document::content_key).collect();
        let existing = self.existing(&keys).await?;

        let mut seen = HashSet::new();
        let pending: Vec<&Document> = documents
            .iter()
            .zip(&keys)
            .filter(|(_, key)| {
                let id = point_id(key);
                !existing.contains(&id) && seen.insert(id)
            })
            .map(|(doc, _)| doc)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let batch = embed_documents(self.embedder.as_ref(), pending).await;
        batch.check()?;

        let mut points = Vec::with_capacity(batch.embedded.len());
        for (doc, vector) in &batch.embedded {
            let key = doc.content_key();
            let json = serde_json::to_string(doc).map_err(|e| {
                CollaboratorError::malformed(Capability::SimilarityIndex, e.to_string())
            })?;
            let payload: HashMap<String, Value> = [
                (DOCUMENT_FIELD.to_string(), string_value(json)),
                ("content_key".to_string(), string_value(key.to_string())),
                ("title".to_string(), string_value(doc.title.clone())),
                ("source".to_string(), string_value(doc.source.clone())),
            ]
            .into_iter()
            .collect();
            points.push(PointStruct::new(point_id(&key), vector.clone(), payload));
        }

        let added = points.len();
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
            .await
            .map_err(|e| unavailable("Failed to upsert points", e))?;

        if batch.failed > 0 {
            warn!(collection = %self.collection, added, skipped = batch.failed, "Upserted documents, some could not be embedded");
        } else {
            debug!(collection = %self.collection, added, "Upserted documents");
        }
        Ok(added)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<Document>, CollaboratorError> {
        self.ensure_collection().await?;
        let vector = self.embedder.embed(text).await?;
        let response = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, vector, k as u64).with_payload(true),
            )
            .await
            .map_err(|e| unavailable("Failed to search points", e))?;

        response
            .result
            .into_iter()
            .map(|point| {
                let json = match point.payload.get(DOCUMENT_FIELD).and_then(|v| v.kind.as_ref()) {
                    Some(Kind::StringValue(s)) => s,
                    _ => {
                        return Err(CollaboratorError::malformed(
                            Capability::SimilarityIndex,
                            "point without document payload",
                        ))
                    }
                };
                let doc: Document = serde_json::from_str(json).map_err(|e| {
                    CollaboratorError::malformed(Capability::SimilarityIndex, e.to_string())
                })?;
                Ok(doc.with_relevance(point.score as f64))
            })
            .collect()
    }

    async fn count(&self) -> Result<usize, CollaboratorError> {
        self.ensure_collection().await?;
        let info = self
            .client
            .collection_info(&self.collection)
            .await
            .map_err(|e| unavailable("Failed to get collection info", e))?;

        Ok(info
            .result
            .and_then(|r| r.points_count)
            .unwrap_or(0) as usize)
    }
}

/// UUID point id for a content key.
pub fn point_id(key: &ContentKey) -> String {
    Uuid::from_bytes(key.uuid_bytes()).to_string()
}

fn string_value(s: String) -> Value {
    Value {
        kind: Some(Kind::StringValue(s)),
    }
}

fn unavailable(context: &str, e: qdrant_client::QdrantError) -> CollaboratorError {
    CollaboratorError::unavailable(Capability::SimilarityIndex, format!("{}: {}", context, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::testing::{sample_documents, HashEmbedder};
    use sift_core::{FusionSettings, RetrievalFusion};

    #[test]
    fn test_point_id_follows_normalized_content() {
        let a = point_id(&ContentKey::of("Grid storage costs"));
        let b = point_id(&ContentKey::of("  grid STORAGE costs "));
        assert_eq!(a, b);
        assert!(Uuid::parse_str(&a).is_ok());
        assert_ne!(a, point_id(&ContentKey::of("wind")));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unavailable_not_fatal() {
        let index = QdrantIndex::new(
            "http://127.0.0.1:1",
            DOCUMENTS_COLLECTION,
            Arc::new(HashEmbedder::default()),
        )
        .unwrap();

        let err = index.query("grid storage", 5).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(err.capability(), Capability::SimilarityIndex);

        let err = index.add(&sample_documents()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_fusion_keeps_seeds_when_qdrant_is_down() {
        let index = QdrantIndex::new(
            "http://127.0.0.1:1",
            DOCUMENTS_COLLECTION,
            Arc::new(HashEmbedder::default()),
        )
        .unwrap();
        let fusion = RetrievalFusion::new(Arc::new(index), FusionSettings::default());

        let seeds = sample_documents();
        let outcome = fusion.fuse("consumer markets", seeds.clone()).await;
        assert_eq!(outcome.documents, seeds);
        assert!(outcome.is_degraded());
    }
}
