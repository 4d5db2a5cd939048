use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::definitions::{EXECUTE_QUERY, SEARCH_SCHEMA, SqlQueryRequest};
use crate::executor::QueryExecutor;
use crate::retriever::{RetrievalError, SchemaRetriever, SchemaSearchRequest};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: &'static str, reason: String },

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("Could not encode tool result: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Routes tool calls to the executor or the retriever. Holds no state of its
/// own, so one instance serves concurrent calls.
#[derive(Debug)]
pub struct Toolbox {
    executor: QueryExecutor,
    retriever: SchemaRetriever,
}

impl Toolbox {
    #[must_use]
    pub fn new(executor: QueryExecutor, retriever: SchemaRetriever) -> Self {
        Self {
            executor,
            retriever,
        }
    }

    /// Runs tool `name` with JSON `arguments` and returns its JSON result.
    ///
    /// # Errors
    ///
    /// Unknown tools and malformed arguments are errors. A failed query is not:
    /// it comes back as a `QueryResult` with `success: false`.
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        match name {
            SEARCH_SCHEMA => {
                let request: SchemaSearchRequest = parse_arguments(SEARCH_SCHEMA, arguments)?;
                let response = self.retriever.search(&request).await?;
                Ok(serde_json::to_value(response)?)
            }
            EXECUTE_QUERY => {
                let request: SqlQueryRequest = parse_arguments(EXECUTE_QUERY, arguments)?;
                let result = self.executor.execute(&request.sql_query).await;
                Ok(serde_json::to_value(result)?)
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }
}

fn parse_arguments<T: DeserializeOwned>(
    tool: &'static str,
    arguments: Value,
) -> Result<T, ToolError> {
    // A call without arguments arrives as null.
    let arguments = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments
    };

    serde_json::from_value(arguments).map_err(|err| ToolError::InvalidArguments {
        tool,
        reason: err.to_string(),
    })
}
