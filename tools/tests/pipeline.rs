use std::sync::{Arc, Mutex};
use std::time::Duration;

use ai::{Embedder, EmbeddingError};
use async_trait::async_trait;
use db::{InMemorySchemaStore, NewSchemaEmbedding, SchemaStore};
use serde_json::{Value, json};
use tools::definitions::{EXECUTE_QUERY, SEARCH_SCHEMA};
use tools::{QueryExecutor, SchemaRetriever, ToolError, Toolbox};
use warehouse::{
    Connection, Operation, Row, Session, SessionScope, StatementOptions, Warehouse, WarehouseError,
};

#[derive(Debug, Default)]
struct Log {
    statements: Vec<String>,
    options: Vec<StatementOptions>,
    scopes: Vec<SessionScope>,
    connections_opened: usize,
    connections_closed: usize,
    sessions_opened: usize,
    sessions_closed: usize,
}

#[derive(Debug, Clone, Copy)]
enum Script {
    Rows(usize),
    Fail(&'static str),
    SessionFails,
    Hang,
}

struct FakeWarehouse {
    log: Arc<Mutex<Log>>,
    script: Script,
}

struct FakeConnection {
    log: Arc<Mutex<Log>>,
    script: Script,
}

struct FakeSession {
    log: Arc<Mutex<Log>>,
    script: Script,
}

struct FakeOperation {
    rows: Vec<Row>,
}

#[async_trait]
impl Warehouse for FakeWarehouse {
    async fn connect(&self) -> Result<Box<dyn Connection>, WarehouseError> {
        self.log.lock().unwrap().connections_opened += 1;
        Ok(Box::new(FakeConnection {
            log: Arc::clone(&self.log),
            script: self.script,
        }))
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn open_session(
        &mut self,
        scope: &SessionScope,
    ) -> Result<Box<dyn Session>, WarehouseError> {
        if let Script::SessionFails = self.script {
            return Err(WarehouseError::Api {
                status: 503,
                body: "warehouse is starting".to_string(),
            });
        }

        let mut log = self.log.lock().unwrap();
        log.sessions_opened += 1;
        log.scopes.push(scope.clone());

        Ok(Box::new(FakeSession {
            log: Arc::clone(&self.log),
            script: self.script,
        }))
    }

    async fn close(self: Box<Self>) -> Result<(), WarehouseError> {
        self.log.lock().unwrap().connections_closed += 1;
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn execute_statement(
        &mut self,
        sql: &str,
        options: &StatementOptions,
    ) -> Result<Box<dyn Operation>, WarehouseError> {
        {
            let mut log = self.log.lock().unwrap();
            log.statements.push(sql.to_string());
            log.options.push(*options);
        }

        match self.script {
            Script::Rows(count) => Ok(Box::new(FakeOperation {
                rows: (0..count)
                    .map(|n| {
                        let mut row = Row::new();
                        row.insert("n".to_string(), json!(n));
                        row
                    })
                    .collect(),
            })),
            Script::Fail(message) => Err(WarehouseError::Statement {
                message: message.to_string(),
            }),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(WarehouseError::Protocol("woke up".to_string()))
            }
            Script::SessionFails => unreachable!("no session is opened"),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), WarehouseError> {
        self.log.lock().unwrap().sessions_closed += 1;
        Ok(())
    }
}

#[async_trait]
impl Operation for FakeOperation {
    async fn fetch_all(&mut self) -> Result<Vec<Row>, WarehouseError> {
        Ok(std::mem::take(&mut self.rows))
    }

    async fn close(self: Box<Self>) -> Result<(), WarehouseError> {
        Ok(())
    }
}

/// Maps a few keywords onto fixed axes so similarity is predictable.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let text = text.to_lowercase();
        let axis = |word: &str| if text.contains(word) { 1.0 } else { 0.0 };
        Ok(vec![axis("order"), axis("customer"), axis("audit")])
    }

    fn dimensions(&self) -> usize {
        3
    }
}

fn scope() -> SessionScope {
    SessionScope {
        catalog: "main".to_string(),
        schema: "operational".to_string(),
    }
}

fn executor(script: Script) -> (QueryExecutor, Arc<Mutex<Log>>) {
    let log = Arc::new(Mutex::new(Log::default()));
    let warehouse = Arc::new(FakeWarehouse {
        log: Arc::clone(&log),
        script,
    });
    (QueryExecutor::new(warehouse, scope()), log)
}

fn assert_released(log: &Log) {
    assert_eq!(log.connections_opened, log.connections_closed);
    assert_eq!(log.sessions_opened, log.sessions_closed);
}

#[tokio::test]
async fn select_without_limit_is_bounded_and_resources_released() {
    let (executor, log) = executor(Script::Rows(3));

    let result = executor.execute("SELECT * FROM orders").await;

    assert!(result.success);
    assert_eq!(result.row_count, Some(3));
    let log = log.lock().unwrap();
    assert_eq!(log.statements, ["SELECT * FROM orders LIMIT 1000"]);
    assert_eq!(log.options[0].max_rows, 1000);
    assert_eq!(log.options[0].timeout, Duration::from_secs(30));
    assert_eq!(log.scopes, [scope()]);
    assert_eq!(log.sessions_opened, 1);
    assert_released(&log);
}

#[tokio::test]
async fn existing_limit_is_submitted_unmodified() {
    let (executor, log) = executor(Script::Rows(1));
    let query = "select id\nfrom orders\nLiMiT 5";

    executor.execute(query).await;

    assert_eq!(log.lock().unwrap().statements, [query]);
}

#[tokio::test]
async fn rejected_query_never_reaches_the_warehouse() {
    let (executor, log) = executor(Script::Rows(1));

    let result = executor.execute("DROP TABLE orders").await;

    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("DROP operations are not allowed"));
    let log = log.lock().unwrap();
    assert_eq!(log.connections_opened, 0);
    assert!(log.statements.is_empty());
}

#[tokio::test]
async fn multiple_statements_are_rejected() {
    let (executor, log) = executor(Script::Rows(1));

    let result = executor.execute("SELECT 1; SELECT 2").await;

    assert_eq!(
        result.error.as_deref(),
        Some("Multiple statements not allowed (found semicolon)")
    );
    assert_eq!(log.lock().unwrap().connections_opened, 0);
}

#[tokio::test]
async fn empty_query_is_rejected() {
    let (executor, log) = executor(Script::Rows(1));

    let result = executor.execute("   ").await;

    assert!(!result.success);
    assert_eq!(log.lock().unwrap().connections_opened, 0);
}

#[tokio::test]
async fn row_count_never_exceeds_cap() {
    let (executor, _log) = executor(Script::Rows(1500));

    let result = executor.execute("SELECT * FROM events").await;

    let rows = result.rows.unwrap();
    assert_eq!(rows.len(), 1000);
    assert_eq!(result.row_count, Some(rows.len()));
}

#[tokio::test]
async fn syntax_errors_name_the_dialect_and_release_resources() {
    let (executor, log) =
        executor(Script::Fail("[PARSE_SYNTAX_ERROR] Syntax error at or near 'FORM'"));

    let result = executor.execute("SELECT * FORM orders").await;

    assert!(!result.success);
    assert_eq!(
        result.error.as_deref(),
        Some("SQL syntax error (Spark SQL dialect): [PARSE_SYNTAX_ERROR] Syntax error at or near 'FORM'")
    );
    assert_released(&log.lock().unwrap());
}

#[tokio::test]
async fn session_failure_still_closes_the_connection() {
    let (executor, log) = executor(Script::SessionFails);

    let result = executor.execute("SELECT 1").await;

    assert_eq!(
        result.error.as_deref(),
        Some("warehouse returned 503: warehouse is starting")
    );
    let log = log.lock().unwrap();
    assert_eq!(log.connections_opened, 1);
    assert_eq!(log.connections_closed, 1);
    assert_eq!(log.sessions_opened, 0);
}

#[tokio::test(start_paused = true)]
async fn hung_statement_times_out_and_releases_resources() {
    let (executor, log) = executor(Script::Hang);

    let result = executor.execute("SELECT * FROM huge").await;

    let error = result.error.unwrap();
    assert!(error.starts_with("Query timeout after 30s: "), "{error}");
    assert_released(&log.lock().unwrap());
}

#[tokio::test]
async fn concurrent_invocations_use_separate_sessions() {
    let (executor, log) = executor(Script::Rows(2));

    let (first, second) = tokio::join!(
        executor.execute("SELECT * FROM orders"),
        executor.execute("SELECT * FROM customers"),
    );

    assert!(first.success && second.success);
    let log = log.lock().unwrap();
    assert_eq!(log.sessions_opened, 2);
    assert_released(&log);
}

async fn toolbox() -> (Toolbox, Arc<Mutex<Log>>) {
    let store = Arc::new(InMemorySchemaStore::new(3));
    store
        .replace_all(vec![
            NewSchemaEmbedding {
                table_name: "orders".to_string(),
                schema_description: "Table: orders".to_string(),
                embedding: vec![1.0, 0.2, 0.0],
            },
            NewSchemaEmbedding {
                table_name: "customers".to_string(),
                schema_description: "Table: customers".to_string(),
                embedding: vec![0.3, 1.0, 0.0],
            },
            NewSchemaEmbedding {
                table_name: "audit_log".to_string(),
                schema_description: "Table: audit_log".to_string(),
                embedding: vec![0.0, 0.0, 1.0],
            },
        ])
        .await
        .unwrap();

    let (executor, log) = executor(Script::Rows(1));
    let retriever = SchemaRetriever::new(Arc::new(KeywordEmbedder), store);
    (Toolbox::new(executor, retriever), log)
}

#[tokio::test]
async fn search_schema_tool_returns_ranked_tables() {
    let (toolbox, _log) = toolbox().await;

    let result = toolbox
        .call(
            SEARCH_SCHEMA,
            json!({ "query": "customer orders and purchases", "limit": 5, "minSimilarity": 0.5 }),
        )
        .await
        .unwrap();

    let tables = result["tables"].as_array().unwrap();
    assert!(tables.len() <= 5);
    let names: Vec<&str> = tables
        .iter()
        .map(|t| t["tableName"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["customers", "orders"]);

    let scores: Vec<f64> = tables
        .iter()
        .map(|t| t["similarityScore"].as_f64().unwrap())
        .collect();
    assert!(scores.iter().all(|score| *score > 0.5));
    assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
    assert_eq!(tables[0]["schemaDescription"], "Table: customers");
}

#[tokio::test]
async fn execute_query_tool_returns_structured_result() {
    let (toolbox, log) = toolbox().await;

    let result = toolbox
        .call(EXECUTE_QUERY, json!({ "sqlQuery": "SELECT n FROM numbers" }))
        .await
        .unwrap();

    assert_eq!(
        result,
        json!({ "success": true, "rows": [{ "n": 0 }], "rowCount": 1 })
    );
    assert_eq!(
        log.lock().unwrap().statements,
        ["SELECT n FROM numbers LIMIT 1000"]
    );
}

#[tokio::test]
async fn bad_arguments_and_unknown_tools_are_errors() {
    let (toolbox, _log) = toolbox().await;

    assert!(matches!(
        toolbox.call(EXECUTE_QUERY, Value::Null).await,
        Err(ToolError::InvalidArguments { tool: EXECUTE_QUERY, .. })
    ));
    assert!(matches!(
        toolbox.call(SEARCH_SCHEMA, json!({ "query": "x", "limit": -1 })).await,
        Err(ToolError::InvalidArguments { .. })
    ));
    assert!(matches!(
        toolbox.call(SEARCH_SCHEMA, json!({ "query": "x", "limit": 50 })).await,
        Err(ToolError::Retrieval(_))
    ));
    assert!(matches!(
        toolbox.call("drop_everything", json!({})).await,
        Err(ToolError::UnknownTool(name)) if name == "drop_everything"
    ));
}
