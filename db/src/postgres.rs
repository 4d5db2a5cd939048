use crate::{
    EMBEDDINGS_TABLE, NewSchemaEmbedding, SchemaStore, StoreError, TableMatch, check_dimensions,
};

use pgvector::Vector;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::fmt::Display;

const MAX_CONNECTIONS: u32 = 5;

/// Schema embedding store backed by Postgres with the `pgvector` extension.
///
/// Ranking is pushed down to the `<=>` cosine-distance operator so the HNSW
/// index on `embedding` serves the lookup.
#[derive(Debug, Clone)]
pub struct PostgresSchemaStore {
    pool: PgPool,
    dimensions: usize,
}

#[derive(sqlx::FromRow)]
struct MatchRow {
    table_name: String,
    schema_description: String,
    similarity_score: f64,
}

impl PostgresSchemaStore {
    pub async fn connect(url: impl Display, dimensions: usize) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(&url.to_string())
            .await?;

        Ok(Self::from_pool(pool, dimensions))
    }

    pub fn from_pool(pool: PgPool, dimensions: usize) -> Self {
        Self { pool, dimensions }
    }

    /// Creates the extension, table and similarity index when missing.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in schema_statements(self.dimensions) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn schema_statements(dimensions: usize) -> [String; 3] {
    [
        "CREATE EXTENSION IF NOT EXISTS vector".to_string(),
        format!(
            r#"CREATE TABLE IF NOT EXISTS {EMBEDDINGS_TABLE} (
                id BIGSERIAL PRIMARY KEY,
                schema_description TEXT NOT NULL,
                table_name TEXT NOT NULL,
                embedding VECTOR({dimensions}) NOT NULL
            )"#
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS schema_embeddings_embedding_idx \
             ON {EMBEDDINGS_TABLE} USING hnsw (embedding vector_cosine_ops)"
        ),
    ]
}

fn search_statement() -> String {
    format!(
        r#"SELECT
                table_name,
                schema_description,
                1 - (embedding <=> $1) AS similarity_score
            FROM {EMBEDDINGS_TABLE}
            WHERE 1 - (embedding <=> $1) > $2
            ORDER BY similarity_score DESC
            LIMIT $3"#
    )
}

#[async_trait::async_trait]
impl SchemaStore for PostgresSchemaStore {
    async fn search(
        &self,
        embedding: &[f32],
        min_similarity: f64,
        limit: usize,
    ) -> Result<Vec<TableMatch>, StoreError> {
        check_dimensions(self.dimensions, embedding)?;

        let rows: Vec<MatchRow> = sqlx::query_as(&search_statement())
            .bind(Vector::from(embedding.to_vec()))
            .bind(min_similarity)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| TableMatch {
                table_name: row.table_name,
                schema_description: row.schema_description,
                similarity_score: row.similarity_score,
            })
            .collect())
    }

    async fn replace_all(&self, records: Vec<NewSchemaEmbedding>) -> Result<usize, StoreError> {
        for record in &records {
            check_dimensions(self.dimensions, &record.embedding)?;
        }

        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(&format!("DELETE FROM {EMBEDDINGS_TABLE}"))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let insert = format!(
            "INSERT INTO {EMBEDDINGS_TABLE} (schema_description, table_name, embedding) \
             VALUES ($1, $2, $3)"
        );
        for record in &records {
            sqlx::query(&insert)
                .bind(&record.schema_description)
                .bind(&record.table_name)
                .bind(Vector::from(record.embedding.clone()))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        tracing::info!(deleted, inserted = records.len(), "replaced schema embeddings");

        Ok(records.len())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {EMBEDDINGS_TABLE}"))
            .fetch_one(&self.pool)
            .await?;

        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_uses_configured_dimensions_and_cosine_index() {
        let [extension, table, index] = schema_statements(1536);

        assert_eq!(extension, "CREATE EXTENSION IF NOT EXISTS vector");
        assert!(table.contains("VECTOR(1536) NOT NULL"));
        assert!(table.contains("id BIGSERIAL PRIMARY KEY"));
        assert!(index.contains("USING hnsw (embedding vector_cosine_ops)"));
    }

    #[test]
    fn search_filters_strictly_and_orders_descending() {
        let sql = search_statement();

        assert!(sql.contains("1 - (embedding <=> $1) > $2"));
        assert!(sql.contains("ORDER BY similarity_score DESC"));
        assert!(sql.contains("LIMIT $3"));
    }
}
