use std::fmt;
use std::sync::Arc;

use ai::{Embedder, EmbeddingError};
use db::{SchemaStore, StoreError, TableMatch};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 20;
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.3;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaSearchRequest {
    pub query: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f64,
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn default_min_similarity() -> f64 {
    DEFAULT_MIN_SIMILARITY
}

impl SchemaSearchRequest {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_LIMIT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }

    /// # Errors
    ///
    /// [`RetrievalError::InvalidRequest`] when `limit` or `min_similarity` is
    /// out of range.
    pub fn validate(&self) -> Result<(), RetrievalError> {
        if !(1..=MAX_LIMIT).contains(&self.limit) {
            return Err(RetrievalError::InvalidRequest(format!(
                "limit must be between 1 and {MAX_LIMIT}, got {}",
                self.limit
            )));
        }

        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(RetrievalError::InvalidRequest(format!(
                "minSimilarity must be between 0 and 1, got {}",
                self.min_similarity
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaSearchResponse {
    pub tables: Vec<TableMatch>,
}

/// Embeds a natural-language request and ranks stored table descriptions
/// against it. Ranking itself belongs to the store.
pub struct SchemaRetriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn SchemaStore>,
}

impl fmt::Debug for SchemaRetriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRetriever")
            .field("dimensions", &self.embedder.dimensions())
            .finish_non_exhaustive()
    }
}

impl SchemaRetriever {
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn SchemaStore>) -> Self {
        Self { embedder, store }
    }

    /// # Errors
    ///
    /// Fails on an invalid request, or when embedding or the store lookup
    /// fails. No partial result is returned.
    #[tracing::instrument(
        skip_all,
        fields(limit = request.limit, min_similarity = request.min_similarity)
    )]
    pub async fn search(
        &self,
        request: &SchemaSearchRequest,
    ) -> Result<SchemaSearchResponse, RetrievalError> {
        request.validate()?;

        let embedding = self.embedder.embed(&request.query).await?;
        let tables = self
            .store
            .search(&embedding, request.min_similarity, request.limit)
            .await?;

        tracing::info!(matches = tables.len(), "schema search finished");
        Ok(SchemaSearchResponse { tables })
    }
}
