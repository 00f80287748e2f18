//! Retrieved document model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

use crate::dedup::ContentKey;

/// Quality score used when no scorer provides one.
pub const DEFAULT_QUALITY_SCORE: f64 = 0.7;

/// Title given to documents that arrive without one.
pub const UNTITLED: &str = "Untitled";

/// Clamp a score into `[0, 1]`, replacing NaN with `default`.
pub fn clamp_score(value: f64, default: f64) -> f64 {
    if value.is_nan() {
        default
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// One retrieved unit of knowledge.
///
/// Scores are private so they can only be set through the clamping setters;
/// deserialization clamps as well.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub content: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub authors: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_relevance")]
    relevance_score: f64,
    #[serde(
        default = "default_quality",
        deserialize_with = "deserialize_quality"
    )]
    quality_score: f64,
}

impl Document {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            source: source.into(),
            url: None,
            authors: BTreeSet::new(),
            published: None,
            relevance_score: 0.0,
            quality_score: DEFAULT_QUALITY_SCORE,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors
            .into_iter()
            .map(Into::into)
            .filter(|a: &String| !a.trim().is_empty())
            .collect();
        self
    }

    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }

    pub fn with_relevance(mut self, score: f64) -> Self {
        self.set_relevance_score(score);
        self
    }

    pub fn with_quality(mut self, score: f64) -> Self {
        self.set_quality_score(score);
        self
    }

    pub fn relevance_score(&self) -> f64 {
        self.relevance_score
    }

    pub fn quality_score(&self) -> f64 {
        self.quality_score
    }

    pub fn set_relevance_score(&mut self, score: f64) {
        self.relevance_score = clamp_score(score, 0.0);
    }

    pub fn set_quality_score(&mut self, score: f64) {
        self.quality_score = clamp_score(score, DEFAULT_QUALITY_SCORE);
    }

    /// Stable identity of this document's content.
    pub fn content_key(&self) -> ContentKey {
        ContentKey::of(&self.content)
    }

    /// Title with whitespace trimmed, or [`UNTITLED`] when blank.
    pub fn display_title(&self) -> &str {
        let title = self.title.trim();
        if title.is_empty() {
            UNTITLED
        } else {
            title
        }
    }
}

fn default_quality() -> f64 {
    DEFAULT_QUALITY_SCORE
}

fn deserialize_relevance<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<f64> = Option::deserialize(deserializer)?;
    Ok(value.map_or(0.0, |v| clamp_score(v, 0.0)))
}

fn deserialize_quality<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<f64> = Option::deserialize(deserializer)?;
    Ok(value.map_or(DEFAULT_QUALITY_SCORE, |v| {
        clamp_score(v, DEFAULT_QUALITY_SCORE)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scores_are_clamped() {
        let doc = Document::new("t", "c", "s")
            .with_relevance(1.7)
            .with_quality(-0.2);
        assert_eq!(doc.relevance_score(), 1.0);
        assert_eq!(doc.quality_score(), 0.0);

        let doc = Document::new("t", "c", "s")
            .with_relevance(f64::NAN)
            .with_quality(f64::NAN);
        assert_eq!(doc.relevance_score(), 0.0);
        assert_eq!(doc.quality_score(), DEFAULT_QUALITY_SCORE);
    }

    #[test]
    fn test_deserialize_defaults_missing_and_null_scores() {
        let doc: Document = serde_json::from_str(
            r#"{"title":"A","content":"B","source":"arxiv","relevance_score":null}"#,
        )
        .unwrap();
        assert_eq!(doc.relevance_score(), 0.0);
        assert_eq!(doc.quality_score(), DEFAULT_QUALITY_SCORE);

        let doc: Document = serde_json::from_str(
            r#"{"title":"A","content":"B","source":"arxiv","relevance_score":3.0,"quality_score":0.25}"#,
        )
        .unwrap();
        assert_eq!(doc.relevance_score(), 1.0);
        assert_eq!(doc.quality_score(), 0.25);
    }

    #[test]
    fn test_authors_are_order_insensitive() {
        let a = Document::new("t", "c", "s").with_authors(["Lovelace", "Babbage"]);
        let b = Document::new("t", "c", "s").with_authors(["Babbage", "Lovelace", " "]);
        assert_eq!(a.authors, b.authors);
        assert_eq!(a.authors.len(), 2);
    }

    #[test]
    fn test_display_title() {
        assert_eq!(Document::new("  ", "c", "s").display_title(), UNTITLED);
        assert_eq!(Document::new(" Paper ", "c", "s").display_title(), "Paper");
    }
}
