pub mod databricks;
pub mod metadata;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

pub use databricks::DatabricksWarehouse;
pub use metadata::{MetadataExtractor, SparkMetadataExtractor, TableMetadata};

/// One result row, column name to value, in result-set column order.
pub type Row = Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    #[error("{0}")]
    Http(#[from] reqwest::Error),

    #[error("warehouse returned {status}: {body}")]
    Api { status: u16, body: String },

    /// The statement reached a terminal failure state. The message is the
    /// engine's own text, e.g. `[PARSE_SYNTAX_ERROR] Syntax error at ...`.
    #[error("{message}")]
    Statement { message: String },

    #[error("statement execution timeout after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("statement {0} was canceled")]
    Canceled(String),

    #[error("unexpected warehouse response: {0}")]
    Protocol(String),

    #[error("invalid warehouse configuration: {0}")]
    Config(String),
}

/// Catalog and schema a session resolves unqualified names against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionScope {
    pub catalog: String,
    pub schema: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementOptions {
    /// Server-side cap on returned rows.
    pub max_rows: usize,
    /// Budget for the statement to reach a terminal state.
    pub timeout: Duration,
}

/// Shared, long-lived handle to the warehouse. Created once at startup and
/// reused by every invocation.
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Connection>, WarehouseError>;
}

#[async_trait]
pub trait Connection: Send {
    async fn open_session(
        &mut self,
        scope: &SessionScope,
    ) -> Result<Box<dyn Session>, WarehouseError>;

    async fn close(self: Box<Self>) -> Result<(), WarehouseError>;
}

/// A session belongs to exactly one invocation and is never shared.
#[async_trait]
pub trait Session: Send {
    /// Submits `sql` and waits until it finishes or `options.timeout` passes.
    async fn execute_statement(
        &mut self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<Box<dyn Operation>, WarehouseError>;

    async fn close(self: Box<Self>) -> Result<(), WarehouseError>;
}

/// A finished statement whose rows can be fetched.
#[async_trait]
pub trait Operation: Send {
    async fn fetch_all(&mut self) -> Result<Vec<Row>, WarehouseError>;

    async fn close(self: Box<Self>) -> Result<(), WarehouseError>;
}

/// Runs `sql` on `session`, fetches every row and closes the statement handle.
/// The handle is closed even when fetching fails.
pub async fn query_all(
    session: &mut dyn Session,
    sql: &str,
    options: &StatementOptions,
) -> Result<Vec<Row>, WarehouseError> {
    let mut operation = session.execute_statement(sql, options).await?;
    let rows = operation.fetch_all().await;
    let closed = operation.close().await;

    let rows = rows?;
    closed?;
    Ok(rows)
}
