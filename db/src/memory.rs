use crate::{
    NewSchemaEmbedding, SchemaEmbeddingRecord, SchemaStore, StoreError, TableMatch,
    check_dimensions,
};

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Process-local store that scores every record on each search.
#[derive(Debug)]
pub struct InMemorySchemaStore {
    dimensions: usize,
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    next_id: i64,
    records: Vec<SchemaEmbeddingRecord>,
}

impl InMemorySchemaStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            state: RwLock::new(State {
                next_id: 1,
                records: Vec::new(),
            }),
        }
    }

    pub async fn records(&self) -> Vec<SchemaEmbeddingRecord> {
        self.state.read().await.records.clone()
    }
}

/// Calculate cosine similarity between two embeddings
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let magnitude_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let magnitude_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        0.0
    } else {
        dot_product / (magnitude_a * magnitude_b)
    }
}

#[async_trait]
impl SchemaStore for InMemorySchemaStore {
    async fn search(
        &self,
        embedding: &[f32],
        min_similarity: f64,
        limit: usize,
    ) -> Result<Vec<TableMatch>, StoreError> {
        check_dimensions(self.dimensions, embedding)?;

        let state = self.state.read().await;
        let mut matches: Vec<TableMatch> = state
            .records
            .iter()
            .map(|record| TableMatch {
                table_name: record.table_name.clone(),
                schema_description: record.schema_description.clone(),
                similarity_score: cosine_similarity(&record.embedding, embedding),
            })
            .filter(|candidate| candidate.similarity_score > min_similarity)
            .collect();

        matches.sort_by(|a, b| b.similarity_score.total_cmp(&a.similarity_score));
        matches.truncate(limit);

        Ok(matches)
    }

    async fn replace_all(&self, records: Vec<NewSchemaEmbedding>) -> Result<usize, StoreError> {
        for record in &records {
            check_dimensions(self.dimensions, &record.embedding)?;
        }

        let mut state = self.state.write().await;
        state.records.clear();

        for record in records {
            let id = state.next_id;
            state.next_id += 1;
            state.records.push(SchemaEmbeddingRecord {
                id,
                table_name: record.table_name,
                schema_description: record.schema_description,
                embedding: record.embedding,
            });
        }

        Ok(state.records.len())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.state.read().await.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, embedding: [f32; 3]) -> NewSchemaEmbedding {
        NewSchemaEmbedding {
            table_name: name.to_string(),
            schema_description: format!("Table: {name}"),
            embedding: embedding.to_vec(),
        }
    }

    async fn seeded() -> InMemorySchemaStore {
        let store = InMemorySchemaStore::new(3);
        store
            .replace_all(vec![
                record("orders", [1.0, 0.0, 0.0]),
                record("customers", [0.8, 0.6, 0.0]),
                record("invoices", [0.6, 0.8, 0.0]),
                record("audit_log", [0.0, 0.0, 1.0]),
            ])
            .await
            .unwrap();
        store
    }

    #[test]
    fn cosine_similarity_of_known_vectors() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0], &[1.0, 0.0]).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ranks_descending_and_filters_strictly() {
        let store = seeded().await;

        let matches = store.search(&[1.0, 0.0, 0.0], 0.7, 10).await.unwrap();
        let names: Vec<&str> = matches.iter().map(|m| m.table_name.as_str()).collect();

        // invoices (~0.6) and audit_log (0.0) fall below the threshold
        assert_eq!(names, ["orders", "customers"]);
        assert!(matches.iter().all(|m| m.similarity_score > 0.7));
        assert!(
            matches
                .windows(2)
                .all(|pair| pair[0].similarity_score >= pair[1].similarity_score)
        );
    }

    #[tokio::test]
    async fn respects_limit() {
        let store = seeded().await;

        let matches = store.search(&[1.0, 0.0, 0.0], 0.0, 2).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].table_name, "orders");
    }

    #[tokio::test]
    async fn replace_all_discards_previous_rows() {
        let store = seeded().await;
        assert_eq!(store.count().await.unwrap(), 4);

        let inserted = store
            .replace_all(vec![record("orders", [1.0, 0.0, 0.0])])
            .await
            .unwrap();

        assert_eq!(inserted, 1);
        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].table_name, "orders");
        assert_eq!(records[0].id, 5);
    }

    #[tokio::test]
    async fn rejects_mismatched_dimensions_without_touching_rows() {
        let store = seeded().await;

        let err = store
            .replace_all(vec![NewSchemaEmbedding {
                table_name: "bad".to_string(),
                schema_description: String::new(),
                embedding: vec![1.0],
            }])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Dimensions { expected: 3, actual: 1 }));
        assert_eq!(store.count().await.unwrap(), 4);
        assert!(store.search(&[1.0], 0.0, 1).await.is_err());
    }
}
