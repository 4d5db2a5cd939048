use ai::Embedder;
use anyhow::Context;
use db::{NewSchemaEmbedding, SchemaStore};
use warehouse::MetadataExtractor;

use crate::describe::format_table_content;

/// Rebuilds the store from the warehouse catalog. Nothing is written unless
/// every table was extracted and embedded.
pub(crate) async fn rebuild_embeddings(
    extractor: &mut dyn MetadataExtractor,
    embedder: &dyn Embedder,
    store: &dyn SchemaStore,
) -> anyhow::Result<usize> {
    let tables = extractor
        .list_tables()
        .await
        .context("could not list warehouse tables")?;

    if tables.is_empty() {
        tracing::warn!("warehouse schema has no tables, the store will be emptied");
    } else {
        tracing::info!(tables = tables.len(), "found tables to process");
    }

    let total = tables.len();
    let mut records = Vec::with_capacity(total);

    for (index, table_name) in tables.into_iter().enumerate() {
        tracing::info!("[{}/{total}] {table_name}", index + 1);

        let metadata = extractor
            .extract_table(&table_name)
            .await
            .with_context(|| format!("could not read metadata for {table_name}"))?;
        let schema_description = format_table_content(&metadata);

        let embedding = embedder
            .embed(&schema_description)
            .await
            .with_context(|| format!("could not embed {table_name}"))?;

        records.push(NewSchemaEmbedding {
            table_name,
            schema_description,
            embedding,
        });
    }

    let inserted = store
        .replace_all(records)
        .await
        .context("could not replace stored embeddings")?;

    tracing::info!(inserted, "stored schema embeddings");
    Ok(inserted)
}
