//! The stdio JSON-RPC transport adapter. Contains no business logic: it
//! reads one newline-delimited JSON-RPC request per line from stdin, hands
//! the method/params to a [`ToolDispatcher`], and writes the JSON-RPC
//! response back to stdout.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use uuid::Uuid;

use crate::dispatcher::ToolDispatcher;
use crate::error::Error;

const JSONRPC_VERSION: &str = "2.0";
const INVALID_REQUEST_CODE: i64 = -32600;
const PARSE_ERROR_CODE: i64 = -32700;

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    jsonrpc: Option<String>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    id: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcErrorBody>,
    id: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
    data: Value,
}

fn ok_response(id: Value, result: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION,
        result: Some(result),
        error: None,
        id,
    }
}

fn error_response(id: Value, code: i64, message: impl Into<String>, data: Value) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: JSONRPC_VERSION,
        result: None,
        error: Some(JsonRpcErrorBody {
            code,
            message: message.into(),
            data,
        }),
        id,
    }
}

fn from_dispatch_error(id: Value, err: Error) -> JsonRpcResponse {
    let correlation_id = Uuid::new_v4().to_string();
    let data = serde_json::to_value(err.to_error_data(correlation_id))
        .unwrap_or(Value::Null);
    error_response(id, err.json_rpc_code(), err.to_string(), data)
}

/// Reads newline-delimited JSON-RPC requests from stdin until EOF, routing
/// each to `dispatcher` and writing a response line to stdout. Malformed
/// envelopes (wrong `jsonrpc` version, missing `method`, or invalid JSON) are
/// answered with `-32600 Invalid Request` / `-32700 Parse error` without
/// reaching the dispatcher. Returns once stdin is closed.
pub async fn stdio_loop(dispatcher: Arc<ToolDispatcher>) -> crate::error::Result<()> {
    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = reader
        .next_line()
        .await
        .map_err(|e| Error::internal(format!("stdin read error: {e}")))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&dispatcher, &line).await;
        let mut serialized = serde_json::to_string(&response)
            .unwrap_or_else(|_| "{\"jsonrpc\":\"2.0\",\"error\":{\"code\":-32603,\"message\":\"internal\"},\"id\":null}".to_string());
        serialized.push('\n');
        stdout
            .write_all(serialized.as_bytes())
            .await
            .map_err(|e| Error::internal(format!("stdout write error: {e}")))?;
        stdout
            .flush()
            .await
            .map_err(|e| Error::internal(format!("stdout flush error: {e}")))?;
    }

    Ok(())
}

async fn handle_line(dispatcher: &Arc<ToolDispatcher>, line: &str) -> JsonRpcResponse {
    let request: JsonRpcRequest = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            tracing::warn!(error = %e, "received malformed JSON-RPC envelope");
            return error_response(Value::Null, PARSE_ERROR_CODE, "Parse error", Value::Null);
        }
    };

    if request.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
        return error_response(
            request.id,
            INVALID_REQUEST_CODE,
            "Invalid Request: jsonrpc must be \"2.0\"",
            Value::Null,
        );
    }

    let Some(method) = request.method else {
        return error_response(
            request.id,
            INVALID_REQUEST_CODE,
            "Invalid Request: missing method",
            Value::Null,
        );
    };

    let span = tracing::info_span!("dispatch", method = %method);
    let _enter = span.enter();

    match dispatcher.dispatch(&method, request.params).await {
        Ok(result) => ok_response(request.id, result),
        Err(err) => from_dispatch_error(request.id, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_jsonrpc_field_is_rejected_without_dispatch() {
        let response = serde_json::to_value(error_response(
            Value::from(1),
            INVALID_REQUEST_CODE,
            "Invalid Request: jsonrpc must be \"2.0\"",
            Value::Null,
        ))
        .unwrap();
        assert_eq!(response["error"]["code"], INVALID_REQUEST_CODE);
    }

    #[tokio::test]
    async fn unparseable_line_yields_parse_error() {
        use crate::health::HealthMonitor;
        use crate::provider::ProviderGateway;
        use crate::router::Router;
        use crate::scheduler::{ConversationScheduler, SchedulerConfig};
        use crate::tournament::TournamentEngine;

        let gateway = Arc::new(ProviderGateway::new());
        let router = Arc::new(Router::with_default_strategies());
        let scheduler = Arc::new(ConversationScheduler::new(
            Arc::clone(&gateway),
            SchedulerConfig::default(),
        ));
        let tournament = Arc::new(TournamentEngine::new(Arc::clone(&gateway)));
        let health = Arc::new(HealthMonitor::new());
        let dispatcher = Arc::new(ToolDispatcher::new(router, scheduler, tournament, gateway, health));

        let response = handle_line(&dispatcher, "not json at all").await;
        let value = serde_json::to_value(response).unwrap();
        assert_eq!(value["error"]["code"], PARSE_ERROR_CODE);
    }

    #[tokio::test]
    async fn unknown_method_surfaces_not_found_error_code() {
        use crate::health::HealthMonitor;
        use crate::provider::ProviderGateway;
        use crate::router::Router;
        use crate::scheduler::{ConversationScheduler, SchedulerConfig};
        use crate::tournament::TournamentEngine;

        let gateway = Arc::new(ProviderGateway::new());
        let router = Arc::new(Router::with_default_strategies());
        let scheduler = Arc::new(ConversationScheduler::new(
            Arc::clone(&gateway),
            SchedulerConfig::default(),
        ));
        let tournament = Arc::new(TournamentEngine::new(Arc::clone(&gateway)));
        let health = Arc::new(HealthMonitor::new());
        let dispatcher = Arc::new(ToolDispatcher::new(router, scheduler, tournament, gateway, health));

        let line = serde_json::json!({"jsonrpc": "2.0", "method": "no_such_tool", "params": {}, "id": 7}).to_string();
        let response = handle_line(&dispatcher, &line).await;
        let value = serde_json::to_value(response).unwrap();
        assert_eq!(value["error"]["data"]["kind"], "NotFound");
        assert_eq!(value["id"], 7);
    }
}
