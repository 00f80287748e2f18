//! Sift Core Library
//!
//! Research orchestration engine and retrieval fusion. Collaborators
//! (generation, embeddings, search, similarity index, charts) are traits
//! implemented in the sibling crates and injected at construction.

pub mod capability;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod model;
pub mod retry;
pub mod stage;
pub mod tokens;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use capability::{
    ChartRenderer, ConstantQuality, DocumentSearch, Embedder, GenerationRequest, Generator,
    QualityScorer, SimilarityIndex,
};
pub use config::SiftConfig;
pub use engine::{Collaborators, Orchestrator, PipelineSettings, RunOutcome, RunStatus};
pub use error::{Capability, CollaboratorError, SiftError, SiftResult, StageError};
pub use fusion::{FusionOutcome, FusionSettings, RetrievalFusion};
pub use model::{Document, ResearchState, ResearchSummary, StageName};
pub use retry::RetryPolicy;
