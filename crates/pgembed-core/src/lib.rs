use std::error::Error as StdError;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

mod filter;
mod metadata;

pub use filter::Filter;
pub use metadata::{Metadata, MetadataValue};

// ---------------------------------------------------------------------------
// PgEmbedError
// ---------------------------------------------------------------------------

/// Errors reported by embedding stores.
///
/// Configuration and schema variants are raised while a store is being
/// constructed and mean the store was never built. `InvariantViolation` is
/// raised before any statement reaches the database. `Storage` wraps the
/// driver error together with the operation and table it happened on.
#[derive(Debug, Error)]
pub enum PgEmbedError {
    #[error("config error: {0}")]
    Config(String),
    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),
    #[error("table \"{schema}\".\"{table}\" does not exist or has no columns")]
    TableNotFound { schema: String, table: String },
    #[error("{role} column \"{column}\" does not exist in \"{schema}\".\"{table}\"")]
    MissingColumn {
        schema: String,
        table: String,
        column: String,
        role: &'static str,
    },
    #[error(
        "{role} column \"{column}\" in \"{schema}\".\"{table}\" has type {actual}, expected {expected}"
    )]
    TypeMismatch {
        schema: String,
        table: String,
        column: String,
        role: &'static str,
        expected: &'static str,
        actual: String,
    },
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
    #[error("encoding error: {0}")]
    Encoding(String),
}

impl PgEmbedError {
    /// Wrap a driver error with the operation it interrupted.
    pub fn storage(
        context: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Storage {
            context: context.into(),
            source: source.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Embedding / TextSegment
// ---------------------------------------------------------------------------

/// A dense embedding vector.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Embedding {
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(vector: Vec<f32>) -> Self {
        Self::new(vector)
    }
}

/// The text an embedding was computed from, with its metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextSegment {
    pub text: String,
    pub metadata: Metadata,
}

impl TextSegment {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(text: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            text: text.into(),
            metadata,
        }
    }
}

// ---------------------------------------------------------------------------
// Search request / match
// ---------------------------------------------------------------------------

/// A nearest-neighbor query.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingSearchRequest {
    pub query_embedding: Embedding,
    /// Upper bound on returned matches. `None` lets the store apply its
    /// configured default.
    pub max_results: Option<usize>,
    pub filter: Option<Filter>,
}

impl EmbeddingSearchRequest {
    pub fn new(query_embedding: impl Into<Embedding>) -> Self {
        Self {
            query_embedding: query_embedding.into(),
            max_results: None,
            filter: None,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// One row returned by a search, nearest first.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatch {
    /// Distance to the query under the store's distance strategy (lower is
    /// closer).
    pub distance: f64,
    pub embedding_id: String,
    pub embedding: Embedding,
    /// `None` when the row was stored without text.
    pub embedded: Option<TextSegment>,
}

// ---------------------------------------------------------------------------
// EmbeddingStore trait
// ---------------------------------------------------------------------------

/// Generate a fresh embedding identifier (random UUID v4).
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Storage for embeddings with nearest-neighbor search.
///
/// Implementations provide the three primitive operations; the `add*` and
/// `remove` conveniences are expressed in terms of them.
#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Insert one row per `(id, embedding, segment)` triple as a single batch.
    /// The three lists must have the same length.
    async fn add_all_with_ids(
        &self,
        ids: Vec<String>,
        embeddings: Vec<Embedding>,
        segments: Vec<Option<TextSegment>>,
    ) -> Result<(), PgEmbedError>;

    /// Delete the rows with the given ids. `ids` must not be empty.
    async fn remove_all(&self, ids: &[String]) -> Result<(), PgEmbedError>;

    /// Nearest-neighbor search, nearest first.
    async fn search(
        &self,
        request: EmbeddingSearchRequest,
    ) -> Result<Vec<EmbeddingMatch>, PgEmbedError>;

    /// Store an embedding under a freshly generated id and return that id.
    async fn add(&self, embedding: Embedding) -> Result<String, PgEmbedError> {
        let id = generate_id();
        self.add_all_with_ids(vec![id.clone()], vec![embedding], vec![None]).await?;
        Ok(id)
    }

    /// Store an embedding under a caller-supplied id.
    async fn add_with_id(&self, id: &str, embedding: Embedding) -> Result<(), PgEmbedError> {
        self.add_all_with_ids(vec![id.to_string()], vec![embedding], vec![None]).await
    }

    /// Store an embedding together with the segment it was computed from.
    async fn add_with_segment(
        &self,
        embedding: Embedding,
        segment: TextSegment,
    ) -> Result<String, PgEmbedError> {
        let id = generate_id();
        self.add_all_with_ids(vec![id.clone()], vec![embedding], vec![Some(segment)]).await?;
        Ok(id)
    }

    /// Store embeddings without text or metadata, one generated id each.
    async fn add_all(&self, embeddings: Vec<Embedding>) -> Result<Vec<String>, PgEmbedError> {
        let ids: Vec<String> = embeddings.iter().map(|_| generate_id()).collect();
        let segments = vec![None; embeddings.len()];
        self.add_all_with_ids(ids.clone(), embeddings, segments).await?;
        Ok(ids)
    }

    /// Store embeddings with their segments, one generated id each.
    async fn add_all_with_segments(
        &self,
        embeddings: Vec<Embedding>,
        segments: Vec<TextSegment>,
    ) -> Result<Vec<String>, PgEmbedError> {
        if embeddings.len() != segments.len() {
            return Err(PgEmbedError::InvariantViolation(format!(
                "embeddings ({}) and segments ({}) must have the same length",
                embeddings.len(),
                segments.len()
            )));
        }
        let ids: Vec<String> = embeddings.iter().map(|_| generate_id()).collect();
        let segments = segments.into_iter().map(Some).collect();
        self.add_all_with_ids(ids.clone(), embeddings, segments).await?;
        Ok(ids)
    }

    /// Delete a single row.
    async fn remove(&self, id: &str) -> Result<(), PgEmbedError> {
        self.remove_all(&[id.to_string()]).await
    }
}
