//! Builds collaborators and the orchestrator from configuration.

use anyhow::{Context, Result};
use sift_chart::SvgChartRenderer;
use sift_core::config::IndexBackend;
use sift_core::{
    Collaborators, ConstantQuality, Embedder, Orchestrator, PipelineSettings, SiftConfig,
    SimilarityIndex,
};
use sift_embedding::{OllamaEmbedder, QdrantIndex, SqliteIndex};
use sift_sources::ArxivSearch;
use std::sync::Arc;

pub fn embedder(config: &SiftConfig) -> Arc<dyn Embedder> {
    let embedding = &config.embedding;
    Arc::new(
        OllamaEmbedder::new(
            &embedding.base_url,
            &embedding.model,
            embedding.dimension,
            embedding.timeout_secs,
        )
        .with_retry(config.retry.clone()),
    )
}

pub async fn index(config: &SiftConfig, embedder: Arc<dyn Embedder>) -> Result<Arc<dyn SimilarityIndex>> {
    let index: Arc<dyn SimilarityIndex> = match config.index.backend {
        IndexBackend::Sqlite => {
            let path = config.index.path.as_path();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            Arc::new(
                SqliteIndex::open(path, embedder)
                    .with_context(|| format!("Failed to open index at {}", path.display()))?,
            )
        }
        IndexBackend::Qdrant => Arc::new(
            QdrantIndex::new(&config.index.qdrant_url, &config.index.collection, embedder)
                .with_context(|| format!("Invalid Qdrant URL {}", config.index.qdrant_url))?,
        ),
    };
    Ok(index)
}

pub fn search(config: &SiftConfig) -> ArxivSearch {
    ArxivSearch::new(&config.search.arxiv_url, config.search.timeout_secs).with_retry(config.retry.clone())
}

pub async fn collaborators(config: &SiftConfig) -> Result<Collaborators> {
    let generator = sift_llm::from_config(&config.generation, &config.retry)?;
    let embedder = embedder(config);
    let index = index(config, embedder.clone()).await?;

    Ok(Collaborators::new(
        generator,
        embedder,
        Arc::new(search(config)),
        index,
        Arc::new(SvgChartRenderer::new()),
    )
    .with_quality(Arc::new(ConstantQuality(config.scoring.default_quality))))
}

pub async fn orchestrator(config: &SiftConfig) -> Result<Orchestrator> {
    let collaborators = collaborators(config).await?;
    Ok(Orchestrator::new(collaborators, PipelineSettings::from(config)))
}
