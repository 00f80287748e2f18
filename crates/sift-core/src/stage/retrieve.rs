use async_trait::async_trait;
use std::sync::Arc;

use super::{RetrieveInput, RetrieveOutput, StageUnit};
use crate::error::StageError;
use crate::fusion::RetrievalFusion;

/// Indexes the seed documents, then augments them through retrieval fusion.
pub struct RetrieveStage {
    fusion: Arc<RetrievalFusion>,
}

impl RetrieveStage {
    pub fn new(fusion: Arc<RetrievalFusion>) -> Self {
        Self { fusion }
    }
}

#[async_trait]
impl StageUnit for RetrieveStage {
    type Input = RetrieveInput;
    type Output = RetrieveOutput;

    async fn run(&self, input: RetrieveInput) -> Result<RetrieveOutput, StageError> {
        let mut warnings = Vec::new();
        if let Err(e) = self.fusion.index(&input.documents).await {
            warnings.push(format!("indexing seed documents failed: {}", e));
        }

        let outcome = self.fusion.fuse(&input.query, input.documents).await;
        warnings.extend(outcome.warnings);

        Ok(RetrieveOutput {
            documents: outcome.documents,
            warning: (!warnings.is_empty()).then(|| StageError::degraded(warnings.join("; "))),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::SimilarityIndex;
    use crate::fusion::FusionSettings;
    use crate::stage::StageOutput;
    use crate::testing::{sample_documents, HashEmbedder, InMemoryIndex};

    #[tokio::test]
    async fn test_seeds_are_indexed_for_later_runs() {
        let index = Arc::new(InMemoryIndex::new(Arc::new(HashEmbedder::default())));
        let fusion = RetrievalFusion::new(index.clone(), FusionSettings::default());
        let stage = RetrieveStage::new(Arc::new(fusion));

        let mut output = stage
            .run(RetrieveInput {
                query: "pricing".to_string(),
                documents: sample_documents(),
            })
            .await
            .unwrap();

        assert_eq!(output.documents.len(), 3);
        assert!(output.take_warning().is_none());
        assert_eq!(index.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_index_degrades_to_seeds() {
        let index = InMemoryIndex::new(Arc::new(HashEmbedder::default())).unreachable();
        let fusion = RetrievalFusion::new(Arc::new(index), FusionSettings::default());
        let stage = RetrieveStage::new(Arc::new(fusion));

        let mut output = stage
            .run(RetrieveInput {
                query: "pricing".to_string(),
                documents: sample_documents(),
            })
            .await
            .unwrap();

        assert_eq!(output.documents, sample_documents());
        let warning = output.take_warning().unwrap();
        assert!(matches!(warning, StageError::Degraded { .. }));
        assert!(warning.to_string().contains("indexing seed documents failed"));
    }
}
