use ai::{HashMap, Tool, Value, create_tool, json};
use serde::Deserialize;

use crate::executor::{MAX_ROWS, QUERY_TIMEOUT, SQL_DIALECT};
use crate::retriever::{DEFAULT_LIMIT, DEFAULT_MIN_SIMILARITY, MAX_LIMIT};

pub const SEARCH_SCHEMA: &str = "search_schema";
pub const EXECUTE_QUERY: &str = "execute_query";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqlQueryRequest {
    #[serde(rename = "sqlQuery")]
    pub sql_query: String,
}

fn parameters(schema: Value) -> HashMap<String, Value> {
    match schema {
        Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    }
}

#[must_use]
pub fn search_schema_tool() -> Tool {
    let parameters = parameters(json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Natural language description of the data you are looking for, e.g. 'customer orders and purchases' or 'product inventory and pricing'.",
            },
            "limit": {
                "type": "integer",
                "minimum": 1,
                "maximum": MAX_LIMIT,
                "default": DEFAULT_LIMIT,
                "description": format!("Maximum number of tables to return. Defaults to {DEFAULT_LIMIT}, maximum {MAX_LIMIT}."),
            },
            "minSimilarity": {
                "type": "number",
                "minimum": 0,
                "maximum": 1,
                "default": DEFAULT_MIN_SIMILARITY,
                "description": format!("Only tables scoring above this similarity (0-1) are returned. Defaults to {DEFAULT_MIN_SIMILARITY}."),
            },
        },
        "required": ["query"],
    }));

    create_tool(
        SEARCH_SCHEMA,
        "Find warehouse tables relevant to a natural-language request. Use this before writing \
         a query to learn which tables hold the data. Each match carries the table's columns \
         and types, primary and foreign keys, and sample values for categorical columns, \
         ranked by semantic similarity (higher is better).",
        parameters,
    )
    .with_title("Search Warehouse Schema")
    .read_only()
}

#[must_use]
pub fn execute_query_tool() -> Tool {
    let parameters = parameters(json!({
        "type": "object",
        "properties": {
            "sqlQuery": {
                "type": "string",
                "minLength": 1,
                "description": format!(
                    "A single read-only SELECT statement in {SQL_DIALECT} syntax."
                ),
            },
        },
        "required": ["sqlQuery"],
    }));

    create_tool(
        EXECUTE_QUERY,
        format!(
            "Run a read-only {SQL_DIALECT} query against the data warehouse. SELECT, WITH (CTEs), \
             window and aggregate functions, joins, subqueries, set operations, EXPLAIN, DESCRIBE \
             and SHOW are supported. Write operations (INSERT, UPDATE, DELETE, DROP, CREATE, ALTER, \
             TRUNCATE, GRANT, REVOKE, MERGE, COPY, CALL) and multiple statements are rejected. \
             Results are capped at {MAX_ROWS} rows and queries time out after {} seconds.",
            QUERY_TIMEOUT.as_secs()
        ),
        parameters,
    )
    .with_title("Execute Warehouse Query")
    .read_only()
}

#[must_use]
pub fn all_tools() -> Vec<Tool> {
    vec![search_schema_tool(), execute_query_tool()]
}
