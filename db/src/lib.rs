pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;

pub use memory::InMemorySchemaStore;
pub use postgres::PostgresSchemaStore;

/// Table holding one description and embedding per warehouse table.
pub const EMBEDDINGS_TABLE: &str = "operational_schema_embeddings";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vector store query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("expected a {expected}-dimension embedding, got {actual}")]
    Dimensions { expected: usize, actual: usize },
}

/// A warehouse table ranked against a search embedding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMatch {
    pub table_name: String,
    pub schema_description: String,
    pub similarity_score: f64,
}

/// A row as written by the metadata producer.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSchemaEmbedding {
    pub table_name: String,
    pub schema_description: String,
    pub embedding: Vec<f32>,
}

/// A persisted row.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaEmbeddingRecord {
    pub id: i64,
    pub table_name: String,
    pub schema_description: String,
    pub embedding: Vec<f32>,
}

/// Trait defining the interface for the schema embedding store
#[async_trait]
pub trait SchemaStore: Send + Sync {
    /// Rank stored tables by `1 - cosine_distance` to `embedding`, keeping only
    /// scores strictly above `min_similarity`, best first, at most `limit` rows.
    async fn search(
        &self,
        embedding: &[f32],
        min_similarity: f64,
        limit: usize,
    ) -> Result<Vec<TableMatch>, StoreError>;

    /// Delete every stored row and insert `records` in their place as one
    /// atomic step. Returns the number of rows inserted.
    async fn replace_all(&self, records: Vec<NewSchemaEmbedding>) -> Result<usize, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;
}

pub(crate) fn check_dimensions(expected: usize, embedding: &[f32]) -> Result<(), StoreError> {
    if embedding.len() == expected {
        Ok(())
    } else {
        Err(StoreError::Dimensions {
            expected,
            actual: embedding.len(),
        })
    }
}
