//! arXiv search via the public Atom API.
//!
//! Results are sorted by submission date, newest first. Each entry becomes a
//! [`Document`] whose content is the abstract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use sift_core::{Capability, CollaboratorError, Document, DocumentSearch, RetryPolicy};
use tracing::{debug, info};

/// Public arXiv query endpoint.
pub const DEFAULT_ARXIV_URL: &str = "http://export.arxiv.org/api/query";

/// Source name stamped on every document.
pub const SOURCE: &str = "arxiv";

#[derive(Clone)]
pub struct ArxivSearch {
    base_url: String,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl ArxivSearch {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.to_string(),
            retry: RetryPolicy::default(),
            client,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch(&self, query: &str, max_results: usize) -> Result<String, CollaboratorError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("search_query", format!("all:{}", query)),
                ("start", "0".to_string()),
                ("max_results", max_results.to_string()),
                ("sortBy", "submittedDate".to_string()),
                ("sortOrder", "descending".to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                CollaboratorError::unavailable(
                    Capability::DocumentSearch,
                    format!("Failed to reach arXiv: {}", e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::from_status(
                Capability::DocumentSearch,
                status.as_u16(),
                &body,
            ));
        }

        response.text().await.map_err(|e| {
            CollaboratorError::unavailable(
                Capability::DocumentSearch,
                format!("Failed to read arXiv response: {}", e),
            )
        })
    }
}

#[async_trait]
impl DocumentSearch for ArxivSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Document>, CollaboratorError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let body = self
            .retry
            .run("arxiv.search", || self.fetch(query, max_results))
            .await?;
        let documents = parse_feed(&body)?;
        info!(query, count = documents.len(), "arXiv search");
        Ok(documents)
    }
}

#[derive(Default)]
struct Entry {
    id: String,
    title: String,
    summary: String,
    published: Option<DateTime<Utc>>,
    authors: Vec<String>,
    link: Option<String>,
}

impl Entry {
    fn into_document(self) -> Document {
        let mut doc = Document::new(collapse(&self.title), collapse(&self.summary), SOURCE)
            .with_authors(self.authors);
        if let Some(url) = self.link.or((!self.id.is_empty()).then_some(self.id)) {
            doc = doc.with_url(url);
        }
        if let Some(published) = self.published {
            doc = doc.with_published(published);
        }
        doc
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

/// Parse an arXiv Atom feed into documents, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<Document>, CollaboratorError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut documents = Vec::new();
    let mut entry: Option<Entry> = None;
    let mut field: Option<Field> = None;
    let mut in_author = false;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(e) => match e.local_name().as_ref() {
                b"entry" => entry = Some(Entry::default()),
                b"author" => in_author = true,
                b"name" if in_author => field = Some(Field::AuthorName),
                b"id" => field = Some(Field::Id),
                b"title" => field = Some(Field::Title),
                b"summary" => field = Some(Field::Summary),
                b"published" => field = Some(Field::Published),
                b"link" => read_link(&e, entry.as_mut())?,
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"link" => {
                read_link(&e, entry.as_mut())?;
            }
            Event::Text(t) => {
                if let (Some(current), Some(f)) = (entry.as_mut(), field) {
                    let text = t.unescape().map_err(malformed)?;
                    match f {
                        Field::Id => current.id.push_str(&text),
                        Field::Title => current.title.push_str(&text),
                        Field::Summary => current.summary.push_str(&text),
                        Field::AuthorName => current.authors.push(text.trim().to_string()),
                        Field::Published => {
                            current.published = DateTime::parse_from_rfc3339(text.trim())
                                .ok()
                                .map(|d| d.with_timezone(&Utc));
                        }
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"entry" => {
                    if let Some(done) = entry.take() {
                        documents.push(done.into_document());
                    }
                    field = None;
                }
                b"author" => in_author = false,
                _ => field = None,
            },
            Event::Eof => break,
            _ => {}
        }
    }

    debug!(count = documents.len(), "Parsed arXiv feed");
    Ok(documents)
}

/// Keep the `alternate` (abstract page) link of an entry.
fn read_link(e: &BytesStart<'_>, entry: Option<&mut Entry>) -> Result<(), CollaboratorError> {
    let Some(entry) = entry else {
        return Ok(());
    };
    let rel = match e.try_get_attribute("rel").map_err(malformed)? {
        Some(attr) => attr.unescape_value().map_err(malformed)?.into_owned(),
        None => "alternate".to_string(),
    };
    if rel != "alternate" || entry.link.is_some() {
        return Ok(());
    }
    if let Some(href) = e.try_get_attribute("href").map_err(malformed)? {
        entry.link = Some(href.unescape_value().map_err(malformed)?.into_owned());
    }
    Ok(())
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn malformed(e: impl std::fmt::Display) -> CollaboratorError {
    CollaboratorError::malformed(Capability::DocumentSearch, format!("Invalid arXiv feed: {}", e))
}
