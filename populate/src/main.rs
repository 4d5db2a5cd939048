//! Offline producer for the schema embedding store. Reads table metadata from
//! the warehouse, describes and embeds each table, then swaps the store
//! contents in one transaction.

mod describe;
mod job;

use ai::OpenAiEmbedder;
use anyhow::Context;
use config::AppConfig;
use db::PostgresSchemaStore;
use tracing_subscriber::EnvFilter;
use warehouse::{DatabricksWarehouse, SessionScope, SparkMetadataExtractor, Warehouse};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        tracing::error!("fatal error: {err:#}");
        return Err(err);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    let conf = AppConfig::load().context("could not load configuration")?;

    let store = PostgresSchemaStore::connect(&conf.database.url, conf.embedding.dimensions)
        .await
        .context("could not connect to the vector store")?;
    store
        .ensure_schema()
        .await
        .context("could not prepare the embeddings table")?;
    tracing::info!("connected to the vector store");

    let embedder =
        OpenAiEmbedder::new(&conf.embedding).context("could not create the embedding client")?;

    let warehouse = DatabricksWarehouse::new(&conf.databricks)
        .context("could not create the warehouse client")?;
    let scope = SessionScope {
        catalog: conf.databricks.catalog.clone(),
        schema: conf.databricks.schema.clone(),
    };

    let mut connection = warehouse
        .connect()
        .await
        .context("could not connect to the warehouse")?;

    let outcome = match connection.open_session(&scope).await {
        Ok(session) => {
            tracing::info!(
                catalog = %scope.catalog,
                schema = %scope.schema,
                "opened warehouse session"
            );
            let mut extractor = SparkMetadataExtractor::new(session, scope);
            let outcome = job::rebuild_embeddings(&mut extractor, &embedder, &store).await;

            if let Err(err) = extractor.close().await {
                tracing::warn!(error = %err, "failed to close warehouse session");
            }
            outcome
        }
        Err(err) => Err(err).context("could not open a warehouse session"),
    };

    if let Err(err) = connection.close().await {
        tracing::warn!(error = %err, "failed to close warehouse connection");
    }
    store.close().await;

    let inserted = outcome?;
    tracing::info!("inserted {inserted} embeddings");
    Ok(())
}
