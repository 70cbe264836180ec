use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use solgate_core::{
    manager::ConnectionManager,
    metrics::HealthStatus,
    types::{JsonRpcRequest, JsonRpcResponse, Priority, JSONRPC_VERSION},
};
use std::sync::Arc;
use tracing::debug;

/// Header carrying the caller's priority, 0 to 10.
pub const PRIORITY_HEADER: &str = "x-solgate-priority";

/// Largest JSON-RPC batch accepted in one HTTP request.
const MAX_BATCH_ITEMS: usize = 100;

/// Handles JSON-RPC requests, single or batched.
///
/// Batch items run concurrently through the manager, so identical items share one
/// upstream call and account lookups coalesce.
pub async fn handle_rpc(
    State(manager): State<Arc<ConnectionManager>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> impl IntoResponse {
    let priority = priority_from(&headers);

    match payload {
        Value::Array(items) if items.is_empty() || items.len() > MAX_BATCH_ITEMS => (
            StatusCode::BAD_REQUEST,
            Json(to_value(JsonRpcResponse::error(
                -32600,
                format!("Invalid Request: batch must hold 1 to {MAX_BATCH_ITEMS} items"),
                Arc::new(Value::Null),
            ))),
        ),
        Value::Array(items) => {
            let calls = items.into_iter().map(|item| handle_single(&manager, item, priority));
            let responses: Vec<Value> =
                futures::future::join_all(calls).await.into_iter().map(to_value).collect();
            (StatusCode::OK, Json(Value::Array(responses)))
        }
        payload => {
            let response = handle_single(&manager, payload, priority).await;
            let status =
                if response.error.is_some() { StatusCode::BAD_REQUEST } else { StatusCode::OK };
            (status, Json(to_value(response)))
        }
    }
}

async fn handle_single(
    manager: &ConnectionManager,
    payload: Value,
    priority: Priority,
) -> JsonRpcResponse {
    let request = match parse_request(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let params = request.params.unwrap_or(Value::Array(Vec::new()));
    match manager.call(&request.method, params, priority).await {
        Ok(result) => JsonRpcResponse::success(result, request.id),
        Err(e) => {
            debug!(method = %request.method, kind = e.kind(), error = %e, "call failed");
            JsonRpcResponse::error(e.json_rpc_code(), e.to_string(), request.id)
        }
    }
}

/// Reads one request envelope. Valid JSON that is not a JSON-RPC 2.0 request object is
/// answered with `-32600`, echoing its id when a usable one is present.
fn parse_request(payload: Value) -> Result<JsonRpcRequest, JsonRpcResponse> {
    let id = payload
        .get("id")
        .filter(|id| id.is_string() || id.is_number())
        .cloned()
        .unwrap_or(Value::Null);
    let invalid = |reason: String| {
        JsonRpcResponse::error(-32600, format!("Invalid Request: {reason}"), Arc::new(id.clone()))
    };

    let request: JsonRpcRequest =
        serde_json::from_value(payload).map_err(|e| invalid(e.to_string()))?;
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(invalid(format!("jsonrpc must be \"{JSONRPC_VERSION}\"")));
    }
    Ok(request)
}

fn priority_from(headers: &HeaderMap) -> Priority {
    headers
        .get(PRIORITY_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u8>().ok())
        .map_or(Priority::NORMAL, Priority::new)
}

fn to_value(response: JsonRpcResponse) -> Value {
    serde_json::to_value(response).unwrap_or(Value::Null)
}

/// Serves the JSON health summary. Unhealthy maps to 503 so load balancers drain the
/// instance.
pub async fn handle_health(State(manager): State<Arc<ConnectionManager>>) -> impl IntoResponse {
    let summary = manager.health_summary().await;
    let status = match summary.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(summary))
}

/// Serves Prometheus metrics in text exposition format.
pub async fn handle_metrics(State(manager): State<Arc<ConnectionManager>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        manager.metrics_text(),
    )
}
