//! Databricks SQL warehouse client over the Statement Execution API 2.0.
//!
//! The REST API has no server-side session object. A session only carries
//! the catalog/schema scope, and every statement is submitted with that scope
//! attached.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use config::DatabricksConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tokio::time::Instant;

use crate::{
    Connection, Operation, Row, Session, SessionScope, StatementOptions, Warehouse, WarehouseError,
};

const STATEMENTS_PATH: &str = "/api/2.0/sql/statements";
const POLL_INTERVAL: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// Bounds the API accepts for `wait_timeout`, in seconds. Zero means
// "return immediately".
const MIN_WAIT_SECS: u64 = 5;
const MAX_WAIT_SECS: u64 = 50;

/// Long-lived client holding the pooled HTTP client and credentials.
#[derive(Clone)]
pub struct DatabricksWarehouse {
    api: Arc<Api>,
}

struct Api {
    client: reqwest::Client,
    base_url: String,
    warehouse_id: String,
    token: SecretString,
}

// Keeps the access token out of Debug output.
impl fmt::Debug for DatabricksWarehouse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabricksWarehouse")
            .field("base_url", &self.api.base_url)
            .field("warehouse_id", &self.api.warehouse_id)
            .finish_non_exhaustive()
    }
}

impl DatabricksWarehouse {
    pub fn new(config: &DatabricksConfig) -> Result<Self, WarehouseError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            api: Arc::new(Api {
                client,
                base_url: base_url(&config.host),
                warehouse_id: warehouse_id(&config.http_path)?,
                token: config.access_token.clone(),
            }),
        })
    }
}

fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("https://") || host.starts_with("http://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// `/sql/1.0/warehouses/<id>` (or the legacy `/sql/1.0/endpoints/<id>`).
fn warehouse_id(http_path: &str) -> Result<String, WarehouseError> {
    let mut segments = http_path.split('/').filter(|segment| !segment.trim().is_empty());

    segments
        .by_ref()
        .find(|segment| matches!(*segment, "warehouses" | "endpoints"))
        .and_then(|_| segments.next())
        .map(|id| id.trim().to_string())
        .ok_or_else(|| {
            WarehouseError::Config(format!("no warehouse id in HTTP path {http_path:?}"))
        })
}

/// Server-side wait for the first response, clamped to what the API allows.
fn wait_timeout(timeout: Duration) -> String {
    let secs = timeout.as_secs();
    if secs < MIN_WAIT_SECS {
        "0s".to_string()
    } else {
        format!("{}s", secs.min(MAX_WAIT_SECS))
    }
}

#[derive(Debug, Serialize)]
struct StatementRequest<'a> {
    statement: &'a str,
    warehouse_id: &'a str,
    catalog: &'a str,
    schema: &'a str,
    wait_timeout: String,
    on_wait_timeout: &'static str,
    row_limit: usize,
    format: &'static str,
    disposition: &'static str,
}

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: String,
    status: StatementStatus,
    #[serde(default)]
    manifest: Option<Manifest>,
    #[serde(default)]
    result: Option<ResultChunk>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: StatementState,
    #[serde(default)]
    error: Option<ServiceError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum StatementState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    Closed,
}

impl StatementState {
    fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

#[derive(Debug, Deserialize)]
struct ServiceError {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    schema: ManifestSchema,
}

#[derive(Debug, Deserialize)]
struct ManifestSchema {
    #[serde(default)]
    columns: Vec<ColumnSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct ColumnSchema {
    name: String,
    #[serde(default)]
    type_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultChunk {
    #[serde(default)]
    data_array: Vec<Vec<Option<String>>>,
    #[serde(default)]
    next_chunk_internal_link: Option<String>,
}

impl Api {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned + Send>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, WarehouseError> {
        let response = request.bearer_auth(self.token.expose_secret()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json().await?)
    }

    async fn submit(
        &self,
        body: &StatementRequest<'_>,
    ) -> Result<StatementResponse, WarehouseError> {
        self.send(self.client.post(self.url(STATEMENTS_PATH)).json(body))
            .await
    }

    async fn status(&self, statement_id: &str) -> Result<StatementResponse, WarehouseError> {
        self.send(
            self.client
                .get(self.url(&format!("{STATEMENTS_PATH}/{statement_id}"))),
        )
        .await
    }

    async fn chunk(&self, internal_link: &str) -> Result<ResultChunk, WarehouseError> {
        self.send(self.client.get(self.url(internal_link))).await
    }

    async fn cancel(&self, statement_id: &str) -> Result<(), WarehouseError> {
        let response = self
            .client
            .post(self.url(&format!("{STATEMENTS_PATH}/{statement_id}/cancel")))
            .bearer_auth(self.token.expose_secret())
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(WarehouseError::Api {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}

#[async_trait]
impl Warehouse for DatabricksWarehouse {
    async fn connect(&self) -> Result<Box<dyn Connection>, WarehouseError> {
        Ok(Box::new(DatabricksConnection {
            api: Arc::clone(&self.api),
        }))
    }
}

struct DatabricksConnection {
    api: Arc<Api>,
}

#[async_trait]
impl Connection for DatabricksConnection {
    async fn open_session(
        &mut self,
        scope: &SessionScope,
    ) -> Result<Box<dyn Session>, WarehouseError> {
        tracing::debug!(
            catalog = %scope.catalog,
            schema = %scope.schema,
            "opened warehouse session"
        );

        Ok(Box::new(DatabricksSession {
            api: Arc::clone(&self.api),
            scope: scope.clone(),
        }))
    }

    async fn close(self: Box<Self>) -> Result<(), WarehouseError> {
        Ok(())
    }
}

struct DatabricksSession {
    api: Arc<Api>,
    scope: SessionScope,
}

#[async_trait]
impl Session for DatabricksSession {
    #[tracing::instrument(
        skip_all,
        fields(catalog = %self.scope.catalog, schema = %self.scope.schema)
    )]
    async fn execute_statement(
        &mut self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<Box<dyn Operation>, WarehouseError> {
        let deadline = Instant::now() + options.timeout;

        let mut response = self
            .api
            .submit(&StatementRequest {
                statement: sql,
                warehouse_id: &self.api.warehouse_id,
                catalog: &self.scope.catalog,
                schema: &self.scope.schema,
                wait_timeout: wait_timeout(options.timeout),
                on_wait_timeout: "CONTINUE",
                row_limit: options.max_rows,
                format: "JSON_ARRAY",
                disposition: "INLINE",
            })
            .await?;

        let statement_id = response.statement_id.clone();
        tracing::debug!(%statement_id, state = ?response.status.state, "submitted statement");

        while !response.status.state.is_terminal() {
            if Instant::now() >= deadline {
                if let Err(err) = self.api.cancel(&statement_id).await {
                    tracing::warn!(
                        %statement_id,
                        error = %err,
                        "failed to cancel timed out statement"
                    );
                }
                return Err(WarehouseError::Timeout(options.timeout));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(POLL_INTERVAL.min(remaining)).await;
            response = self.api.status(&statement_id).await?;
        }

        match response.status.state {
            StatementState::Succeeded => {
                let columns = response
                    .manifest
                    .map(|manifest| manifest.schema.columns)
                    .unwrap_or_default();

                Ok(Box::new(DatabricksOperation {
                    api: Arc::clone(&self.api),
                    statement_id,
                    columns,
                    pending: response.result,
                    max_rows: options.max_rows,
                }))
            }
            StatementState::Failed => Err(statement_error(response.status.error)),
            StatementState::Canceled | StatementState::Closed => {
                Err(WarehouseError::Canceled(statement_id))
            }
            StatementState::Pending | StatementState::Running => Err(WarehouseError::Protocol(
                "statement left the wait loop unfinished".to_string(),
            )),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), WarehouseError> {
        tracing::debug!(
            catalog = %self.scope.catalog,
            schema = %self.scope.schema,
            "closed warehouse session"
        );
        Ok(())
    }
}

fn statement_error(error: Option<ServiceError>) -> WarehouseError {
    let message = match error {
        Some(ServiceError {
            message: Some(message),
            ..
        }) => message,
        Some(ServiceError {
            error_code: Some(code),
            message: None,
        }) => code,
        _ => "statement failed without an error message".to_string(),
    };

    WarehouseError::Statement { message }
}

struct DatabricksOperation {
    api: Arc<Api>,
    statement_id: String,
    columns: Vec<ColumnSchema>,
    pending: Option<ResultChunk>,
    max_rows: usize,
}

#[async_trait]
impl Operation for DatabricksOperation {
    async fn fetch_all(&mut self) -> Result<Vec<Row>, WarehouseError> {
        let mut rows = Vec::new();

        while let Some(chunk) = self.pending.take() {
            let room = self.max_rows.saturating_sub(rows.len());
            rows.extend(
                chunk
                    .data_array
                    .into_iter()
                    .take(room)
                    .map(|values| to_row(&self.columns, values)),
            );

            // Later chunks would only be discarded.
            if rows.len() >= self.max_rows {
                break;
            }

            if let Some(link) = chunk.next_chunk_internal_link {
                self.pending = Some(self.api.chunk(&link).await?);
            }
        }

        tracing::debug!(statement_id = %self.statement_id, rows = rows.len(), "fetched rows");
        Ok(rows)
    }

    async fn close(self: Box<Self>) -> Result<(), WarehouseError> {
        // Succeeded statements hold no server resources beyond their result
        // chunks, which expire on their own.
        Ok(())
    }
}

fn to_row(columns: &[ColumnSchema], values: Vec<Option<String>>) -> Row {
    columns
        .iter()
        .zip(values)
        .map(|(column, value)| {
            let value = match value {
                Some(raw) => to_value(column.type_name.as_deref().unwrap_or("STRING"), raw),
                None => Value::Null,
            };
            (column.name.clone(), value)
        })
        .collect()
}

/// The JSON_ARRAY format carries every value as a string; restore the
/// native JSON shape from the column's declared type.
fn to_value(type_name: &str, raw: String) -> Value {
    match type_name {
        "BYTE" | "SHORT" | "INT" | "LONG" => raw
            .parse::<i64>()
            .map_or(Value::String(raw), |v| Value::Number(v.into())),

        "FLOAT" | "DOUBLE" => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map_or(Value::String(raw), Value::Number),

        "BOOLEAN" => match raw.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw),
        },

        "ARRAY" | "MAP" | "STRUCT" => {
            serde_json::from_str(&raw).unwrap_or(Value::String(raw))
        }

        // DECIMAL stays a string so no precision is lost.
        _ => Value::String(raw),
    }
}
