//! Data model shared by every stage.

mod chart;
mod document;
mod state;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use chart::{ChartArtifact, ChartData, ChartKind, ChartPoint};
pub use document::{clamp_score, Document, DEFAULT_QUALITY_SCORE, UNTITLED};
pub use state::{Analysis, DocumentSummary, Report, ResearchState, ResearchSummary};

/// Pipeline stages, in execution order.
///
/// The derived `Ord` follows declaration order, so maps keyed by stage
/// iterate in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Search,
    Retrieve,
    Summarize,
    Analyze,
    Visualize,
    Coordinate,
}

impl StageName {
    pub const ALL: [StageName; 6] = [
        Self::Search,
        Self::Retrieve,
        Self::Summarize,
        Self::Analyze,
        Self::Visualize,
        Self::Coordinate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Retrieve => "retrieve",
            Self::Summarize => "summarize",
            Self::Analyze => "analyze",
            Self::Visualize => "visualize",
            Self::Coordinate => "coordinate",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
