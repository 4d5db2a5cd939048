pub mod embedding;
pub mod openai;

use serde::Serialize;

pub use embedding::{Embedder, EmbeddingError};
pub use openai::OpenAiEmbedder;

// Re-export types that consumers will need to create and use tools
pub use serde_json::{Value, json};
pub use std::collections::HashMap;

/// A tool as advertised to the agent runtime in a `tools/list` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub description: String,
    pub input_schema: Value,
    pub annotations: ToolAnnotations,
}

/// Behavioural hints for the agent runtime.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub read_only_hint: bool,
    pub open_world_hint: bool,
}

impl Tool {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.annotations.title = Some(title.clone());
        self.title = Some(title);
        self
    }

    /// Marks the tool as read-only and reaching outside the process.
    pub fn read_only(mut self) -> Self {
        self.annotations.read_only_hint = true;
        self.annotations.open_world_hint = true;
        self
    }
}

/// Helper function to create a tool with the given name, description, and parameters
///
/// # Example
/// ```rust
/// use ai::{create_tool, json, HashMap, Value};
///
/// let parameters: HashMap<String, Value> = serde_json::from_value(json!({
///     "type": "object",
///     "properties": {
///         "sqlQuery": {
///             "type": "string",
///             "description": "The SQL query to execute",
///         },
///     },
///     "required": ["sqlQuery"],
/// })).unwrap();
///
/// let tool = create_tool(
///     "execute_query",
///     "Execute a read-only SQL query against the warehouse",
///     parameters,
/// )
/// .read_only();
///
/// assert_eq!(tool.name, "execute_query");
/// assert!(tool.annotations.read_only_hint);
/// ```
pub fn create_tool(
    name: impl Into<String>,
    description: impl Into<String>,
    parameters: HashMap<String, Value>,
) -> Tool {
    Tool {
        name: name.into(),
        title: None,
        description: description.into(),
        input_schema: Value::Object(parameters.into_iter().collect()),
        annotations: ToolAnnotations::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_tool_descriptor() {
        let parameters: HashMap<String, Value> =
            serde_json::from_value(json!({ "type": "object", "properties": {} })).unwrap();

        let tool = create_tool("search_schema", "Find tables", parameters)
            .with_title("Search Schema")
            .read_only();

        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["name"], "search_schema");
        assert_eq!(value["title"], "Search Schema");
        assert_eq!(value["inputSchema"]["type"], "object");
        assert_eq!(value["annotations"]["readOnlyHint"], true);
        assert_eq!(value["annotations"]["openWorldHint"], true);
        assert_eq!(value["annotations"]["title"], "Search Schema");
    }
}
