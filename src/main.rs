mod protocol;

use std::sync::Arc;

use ai::OpenAiEmbedder;
use anyhow::Context;
use config::AppConfig;
use db::PostgresSchemaStore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tools::{QueryExecutor, SchemaRetriever, Toolbox};
use tracing_subscriber::EnvFilter;
use warehouse::{DatabricksWarehouse, SessionScope};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let conf = AppConfig::load().context("could not load configuration")?;

    let warehouse = DatabricksWarehouse::new(&conf.databricks)
        .context("could not create the warehouse client")?;
    let scope = SessionScope {
        catalog: conf.databricks.catalog.clone(),
        schema: conf.databricks.schema.clone(),
    };

    let store = PostgresSchemaStore::connect(&conf.database.url, conf.embedding.dimensions)
        .await
        .context("could not connect to the vector store")?;
    let embedder =
        OpenAiEmbedder::new(&conf.embedding).context("could not create the embedding client")?;

    let toolbox = Arc::new(Toolbox::new(
        QueryExecutor::new(Arc::new(warehouse), scope),
        SchemaRetriever::new(Arc::new(embedder), Arc::new(store.clone())),
    ));

    tracing::info!(
        name = protocol::SERVER_NAME,
        version = env!("CARGO_PKG_VERSION"),
        "serving tools on stdio"
    );

    serve(toolbox, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await?;

    store.close().await;
    tracing::info!("stdin closed, shutting down");
    Ok(())
}

/// Reads requests line by line and answers each on its own task, so a slow
/// query never blocks schema searches or pings. A single writer owns the
/// output and is handed back once input ends.
async fn serve<R, W>(toolbox: Arc<Toolbox>, mut input: R, output: W) -> anyhow::Result<W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<String>(64);

    let writer = tokio::spawn(async move {
        let mut output = output;
        while let Some(line) = rx.recv().await {
            output.write_all(line.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok::<_, std::io::Error>(output)
    });

    let mut tasks = tokio::task::JoinSet::new();
    let mut frame = Vec::new();

    loop {
        frame.clear();
        if input.read_until(b'\n', &mut frame).await? == 0 {
            break;
        }

        let line = frame.trim_ascii().to_vec();
        if line.is_empty() {
            continue;
        }

        let toolbox = Arc::clone(&toolbox);
        let tx = tx.clone();
        tasks.spawn(async move {
            let Some(response) = protocol::handle_frame(&toolbox, &line).await else {
                return;
            };
            match serde_json::to_string(&response) {
                Ok(encoded) => {
                    if tx.send(encoded).await.is_err() {
                        tracing::warn!("output writer has stopped");
                    }
                }
                Err(err) => tracing::error!(error = %err, "could not encode response"),
            }
        });

        // Reap finished requests as we go.
        while tasks.try_join_next().is_some() {}
    }

    while tasks.join_next().await.is_some() {}
    drop(tx);

    Ok(writer.await.context("output writer panicked")??)
}
