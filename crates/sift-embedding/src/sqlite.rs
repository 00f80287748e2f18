//! SQLite similarity index.
//!
//! A single connection in WAL mode, serialized behind a mutex and driven from
//! the blocking thread pool, so a write is visible to the next query on the
//! same index. Queries scan every stored
//! vector and rank by cosine similarity, ties broken by insertion order.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use rusqlite_migration::{Migrations, M};
use sift_core::capability::cosine_similarity;
use sift_core::{
    Capability, CollaboratorError, Document, Embedder, SiftError, SiftResult, SimilarityIndex,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::embed_documents;

/// SQL schema definition.
const SCHEMA: &str = include_str!("migrations/schema.sql");

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(SCHEMA)])
}

pub struct SqliteIndex {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn Embedder>,
    name: String,
}

/// Row ready to insert: content key, title, source, document JSON, vector.
type PendingRow = (String, String, String, String, Vec<f32>);

impl SqliteIndex {
    /// Open (or create) the index file and bring its schema up to date.
    pub fn open(path: &Path, embedder: Arc<dyn Embedder>) -> SiftResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(corruption)?;
        let index = Self::init(conn, embedder, path.display().to_string())?;
        info!(path = %path.display(), "Opened SQLite index");
        Ok(index)
    }

    /// Fresh index in memory.
    pub fn in_memory(embedder: Arc<dyn Embedder>) -> SiftResult<Self> {
        let conn = Connection::open_in_memory().map_err(corruption)?;
        Self::init(conn, embedder, ":memory:".to_string())
    }

    fn init(mut conn: Connection, embedder: Arc<dyn Embedder>, name: String) -> SiftResult<Self> {
        let mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(corruption)?;
        debug!(journal_mode = %mode, "SQLite journal mode");

        let check: String = conn
            .query_row("PRAGMA quick_check", [], |row| row.get(0))
            .map_err(corruption)?;
        if check != "ok" {
            return Err(SiftError::IndexCorruption(format!("{}: {}", name, check)));
        }

        migrations()
            .to_latest(&mut conn)
            .map_err(|e| SiftError::IndexCorruption(format!("migration failed: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            embedder,
            name,
        })
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, CollaboratorError>
    where
        F: FnOnce(&mut Connection) -> Result<T, CollaboratorError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| {
                CollaboratorError::unavailable(Capability::SimilarityIndex, "connection lock poisoned")
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| CollaboratorError::unavailable(Capability::SimilarityIndex, e.to_string()))?
    }

    /// Which of `keys` are already stored.
    async fn stored_keys(&self, keys: Vec<String>) -> Result<HashSet<String>, CollaboratorError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT 1 FROM documents WHERE content_key = ?1")
                .map_err(db_err)?;
            let mut found = HashSet::new();
            for key in keys {
                if stmt.exists(params![key]).map_err(db_err)? {
                    found.insert(key);
                }
            }
            Ok(found)
        })
        .await
    }
}

#[async_trait]
impl SimilarityIndex for SqliteIndex {
    fn name(&self) -> &str {
        &self.name
    }

    /// Store new documents in one transaction. Documents whose embedding
    /// fails are skipped; the call fails only if none could be embedded.
    async fn add(&self, documents: &[Document]) -> Result<usize, CollaboratorError> {
        let keys: Vec<String> = documents.iter().map(|d| d.content_key().to_string()).collect();
        let stored = self.stored_keys(keys.clone()).await?;

        let mut seen = HashSet::new();
        let pending: Vec<&Document> = documents
            .iter()
            .zip(&keys)
            .filter(|(_, key)| !stored.contains(*key) && seen.insert((*key).clone()))
            .map(|(doc, _)| doc)
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let batch = embed_documents(self.embedder.as_ref(), pending).await;
        batch.check()?;

        let rows: Vec<PendingRow> = batch
            .embedded
            .iter()
            .map(|(doc, vector)| {
                let json = serde_json::to_string(doc).map_err(|e| {
                    CollaboratorError::malformed(Capability::SimilarityIndex, e.to_string())
                })?;
                Ok((
                    doc.content_key().to_string(),
                    doc.title.clone(),
                    doc.source.clone(),
                    json,
                    vector.clone(),
                ))
            })
            .collect::<Result<_, CollaboratorError>>()?;

        let added = self
            .with_conn(move |conn| {
                let tx = conn.transaction().map_err(db_err)?;
                let mut added = 0;
                {
                    let mut stmt = tx
                        .prepare(
                            "INSERT OR IGNORE INTO documents (content_key, title, source, document, embedding, dimension)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        )
                        .map_err(db_err)?;
                    for (key, title, source, json, vector) in &rows {
                        added += stmt
                            .execute(params![
                                key,
                                title,
                                source,
                                json,
                                encode_vector(vector),
                                vector.len() as i64
                            ])
                            .map_err(db_err)?;
                    }
                }
                tx.commit().map_err(db_err)?;
                Ok(added)
            })
            .await?;

        if batch.failed > 0 {
            warn!(index = %self.name, added, skipped = batch.failed, "Stored documents, some could not be embedded");
        } else {
            debug!(index = %self.name, added, "Stored documents");
        }
        Ok(added)
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<Document>, CollaboratorError> {
        let query = self.embedder.embed(text).await?;
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT rowid, document, embedding FROM documents ORDER BY rowid")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })
                .map_err(db_err)?;

            let mut scored = Vec::new();
            for row in rows {
                let (rowid, json, blob) = row.map_err(db_err)?;
                let vector = decode_vector(&blob).ok_or_else(|| {
                    CollaboratorError::malformed(
                        Capability::SimilarityIndex,
                        format!("row {} has a truncated embedding", rowid),
                    )
                })?;
                scored.push((cosine_similarity(&query, &vector), rowid, json));
            }
            scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

            scored
                .into_iter()
                .take(k)
                .map(|(score, rowid, json)| {
                    serde_json::from_str::<Document>(&json)
                        .map(|doc| doc.with_relevance(score))
                        .map_err(|e| {
                            CollaboratorError::malformed(
                                Capability::SimilarityIndex,
                                format!("row {}: {}", rowid, e),
                            )
                        })
                })
                .collect()
        })
        .await
    }

    async fn count(&self) -> Result<usize, CollaboratorError> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get::<_, i64>(0))
                .map_err(db_err)
        })
        .await
        .map(|n| n as usize)
    }
}

fn db_err(e: rusqlite::Error) -> CollaboratorError {
    CollaboratorError::unavailable(Capability::SimilarityIndex, e.to_string())
}

fn corruption(e: rusqlite::Error) -> SiftError {
    SiftError::IndexCorruption(e.to_string())
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_vector(blob: &[u8]) -> Option<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return None;
    }
    Some(
        blob.chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
