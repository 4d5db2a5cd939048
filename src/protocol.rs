use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tools::{ToolError, Toolbox, all_tools};

pub(crate) const PROTOCOL_VERSION: &str = "2024-11-05";
pub(crate) const SERVER_NAME: &str = "analytics-mcp";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Serialize)]
pub(crate) struct Response {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl Response {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// Answers one raw stdin line. A line that is not UTF-8 is rejected on its
/// own without affecting the lines around it.
pub(crate) async fn handle_frame(toolbox: &Toolbox, frame: &[u8]) -> Option<Response> {
    match std::str::from_utf8(frame) {
        Ok(line) => handle_message(toolbox, line).await,
        Err(err) => Some(Response::error(
            Value::Null,
            PARSE_ERROR,
            format!("Parse error: {err}"),
        )),
    }
}

/// Answers one newline-delimited JSON-RPC message. Notifications produce no
/// response.
pub(crate) async fn handle_message(toolbox: &Toolbox, line: &str) -> Option<Response> {
    let message: Value = match serde_json::from_str(line) {
        Ok(message) => message,
        Err(err) => {
            return Some(Response::error(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {err}"),
            ));
        }
    };

    let id = message.get("id").cloned().unwrap_or(Value::Null);
    let request: Request = match serde_json::from_value(message) {
        Ok(request) => request,
        Err(err) => {
            return Some(Response::error(
                id,
                INVALID_REQUEST,
                format!("Invalid request: {err}"),
            ));
        }
    };

    let Some(id) = request.id else {
        tracing::debug!(method = %request.method, "notification");
        return None;
    };

    let response = match request.method.as_str() {
        "initialize" => Response::result(id, initialize_result()),
        "ping" => Response::result(id, json!({})),
        "tools/list" => Response::result(id, json!({ "tools": all_tools() })),
        "tools/call" => call_tool(toolbox, id, request.params).await,
        "" => Response::error(id, INVALID_REQUEST, "Missing method"),
        other => Response::error(id, METHOD_NOT_FOUND, format!("Method not found: {other}")),
    };

    Some(response)
}

fn initialize_result() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

async fn call_tool(toolbox: &Toolbox, id: Value, params: Value) -> Response {
    let params: CallParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(err) => return Response::error(id, INVALID_PARAMS, format!("Invalid params: {err}")),
    };

    tracing::info!(tool = %params.name, "tool call");

    match toolbox.call(&params.name, params.arguments).await {
        Ok(output) => {
            // execute_query reports its own failures in the payload.
            let is_error = output.get("success") == Some(&Value::Bool(false));
            Response::result(id, tool_content(&output, is_error))
        }
        Err(err @ ToolError::UnknownTool(_)) => {
            Response::error(id, INVALID_PARAMS, err.to_string())
        }
        Err(err) => {
            tracing::warn!(error = %err, tool = %params.name, "tool call failed");
            Response::result(id, tool_content(&json!({ "error": err.to_string() }), true))
        }
    }
}

fn tool_content(output: &Value, is_error: bool) -> Value {
    let text = serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string());
    json!({
        "content": [{ "type": "text", "text": text }],
        "isError": is_error,
    })
}
