use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use warehouse::{Row, SessionScope, StatementOptions, Warehouse, WarehouseError};

use crate::guard::QueryGuard;

pub const MAX_ROWS: usize = 1000;
pub const QUERY_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const SQL_DIALECT: &str = "Spark SQL";

// Headroom after the statement deadline for fetching result chunks.
const FETCH_GRACE: Duration = Duration::from_secs(5);

static LIMIT_CLAUSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\blimit\b").expect("limit pattern is valid"));

/// Outcome of `execute_query`. Failures are values, never errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Row>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    #[must_use]
    pub fn succeeded(rows: Vec<Row>) -> Self {
        Self {
            success: true,
            row_count: Some(rows.len()),
            rows: Some(rows),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            rows: None,
            row_count: None,
            error: Some(error.into()),
        }
    }
}

/// Validates, bounds and runs read-only SQL against the warehouse.
pub struct QueryExecutor {
    warehouse: Arc<dyn Warehouse>,
    scope: SessionScope,
    guard: QueryGuard,
    options: StatementOptions,
}

impl fmt::Debug for QueryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryExecutor")
            .field("scope", &self.scope)
            .field("guard", &self.guard)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl QueryExecutor {
    #[must_use]
    pub fn new(warehouse: Arc<dyn Warehouse>, scope: SessionScope) -> Self {
        Self {
            warehouse,
            scope,
            guard: QueryGuard::default(),
            options: StatementOptions {
                max_rows: MAX_ROWS,
                timeout: QUERY_TIMEOUT,
            },
        }
    }

    #[must_use]
    pub fn with_guard(mut self, guard: QueryGuard) -> Self {
        self.guard = guard;
        self
    }

    #[tracing::instrument(skip_all)]
    pub async fn execute(&self, sql_query: &str) -> QueryResult {
        if sql_query.trim().is_empty() {
            return QueryResult::failed("sqlQuery must not be empty");
        }

        let validation = self.guard.validate(sql_query);
        if !validation.valid {
            let reason = validation
                .reason
                .unwrap_or_else(|| "Query validation failed".to_string());
            tracing::info!(%reason, "rejected query");
            return QueryResult::failed(reason);
        }

        let statement = apply_row_limit(sql_query, self.options.max_rows);

        match self.run(&statement).await {
            Ok(mut rows) => {
                rows.truncate(self.options.max_rows);
                tracing::info!(rows = rows.len(), "query succeeded");
                QueryResult::succeeded(rows)
            }
            Err(err) => {
                tracing::warn!(error = %err, "query failed");
                QueryResult::failed(classify_error(&err.to_string(), self.options.timeout))
            }
        }
    }

    /// Connection and session are released on every path once acquired.
    async fn run(&self, statement: &str) -> Result<Vec<Row>, WarehouseError> {
        let mut connection = self.warehouse.connect().await?;

        let outcome = match connection.open_session(&self.scope).await {
            Ok(mut session) => {
                let query = warehouse::query_all(session.as_mut(), statement, &self.options);
                let rows = tokio::time::timeout(self.options.timeout + FETCH_GRACE, query)
                    .await
                    .unwrap_or(Err(WarehouseError::Timeout(self.options.timeout)));

                if let Err(err) = session.close().await {
                    tracing::warn!(error = %err, "failed to close warehouse session");
                }
                rows
            }
            Err(err) => Err(err),
        };

        if let Err(err) = connection.close().await {
            tracing::warn!(error = %err, "failed to close warehouse connection");
        }

        outcome
    }
}

/// Appends `LIMIT <max_rows>` unless the query already has a `LIMIT` word.
#[must_use]
pub fn apply_row_limit(sql_query: &str, max_rows: usize) -> Cow<'_, str> {
    let collapsed = sql_query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if LIMIT_CLAUSE.is_match(&collapsed) {
        Cow::Borrowed(sql_query)
    } else {
        Cow::Owned(format!("{} LIMIT {max_rows}", sql_query.trim()))
    }
}

/// Rewrites timeout and syntax failures into caller-facing messages.
#[must_use]
pub fn classify_error(message: &str, timeout: Duration) -> String {
    let lowered = message.to_lowercase();

    if lowered.contains("timeout") {
        format!("Query timeout after {}s: {message}", timeout.as_secs())
    } else if lowered.contains("syntax") {
        format!("SQL syntax error ({SQL_DIALECT} dialect): {message}")
    } else {
        message.to_string()
    }
}
