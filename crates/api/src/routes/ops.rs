use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use fullon_core::common::Params;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::error::GatewayError;
use crate::middleware::auth::CurrentIdentity;
use crate::protocol::{self, ErrorCode};
use crate::router::Dispatch;
use crate::server::AppState;

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

/// 客户端可通过该请求头指定 `request_id`
pub const REQUEST_ID_HEADER: &str = "x-request-id";

fn parse_params(body: &[u8]) -> Result<Params, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Params::new());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(params)) => Ok(params),
        Ok(Value::Null) => Ok(Params::new()),
        Ok(_) => Err(GatewayError::new(ErrorCode::Malformed, "params must be a JSON object")),
        Err(e) => Err(GatewayError::new(ErrorCode::Malformed, format!("invalid JSON: {}", e))),
    }
}

/// 通过 HTTP 调用一个一元操作
///
/// 请求体即 `params` 对象，响应体为标准 Response 信封。
/// 流式操作只能经 `/ws` 订阅。
#[utoipa::path(
    post,
    path = "/ops/{operation}",
    tag = "操作 (Operations)",
    params(
        ("operation" = String, Path, description = "操作名，例如 get_ticker")
    ),
    request_body(content = Object, content_type = "application/json", description = "操作参数对象，可省略"),
    responses(
        (status = 200, description = "调用成功", body = protocol::Response),
        (status = 400, description = "参数缺失或请求体非法", body = protocol::Response),
        (status = 401, description = "鉴权失败", body = protocol::Response),
        (status = 404, description = "未知操作或数据不存在", body = protocol::Response),
        (status = 429, description = "超出限流额度", body = protocol::Response),
        (status = 503, description = "服务不可用或熔断", body = protocol::Response),
        (status = 504, description = "后端超时", body = protocol::Response)
    ),
    security(("bearer_jwt" = []))
)]
pub async fn invoke_operation(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(operation): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("http-{}", NEXT_REQUEST.fetch_add(1, Ordering::Relaxed)));

    let params = match parse_params(&body) {
        Ok(params) => params,
        Err(err) => return failure(err, request_id),
    };
    let request = protocol::Request {
        request_id: request_id.clone(),
        operation,
        params,
    };

    let started = Instant::now();
    let outcome = match state.router.dispatch(request) {
        Ok(Dispatch::Unary(handler, request)) => handler.call(&request.params, &identity).await,
        Ok(Dispatch::Streaming(_, request)) => Err(GatewayError::new(
            ErrorCode::InvalidRoute,
            format!("{} is a streaming operation, subscribe over /ws", request.operation),
        )),
        Err(err) => Err(err),
    };
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match outcome {
        Ok(result) => (
            StatusCode::OK,
            Json(protocol::Response::ok(request_id, result).with_latency(latency_ms)),
        )
            .into_response(),
        Err(err) => failure(err, request_id),
    }
}

fn failure(err: GatewayError, request_id: String) -> Response {
    let status = err.status();
    (status, Json(err.into_response_envelope(request_id))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        assert!(parse_params(b"").unwrap().is_empty());
        assert!(parse_params(b"  \n").unwrap().is_empty());
        assert_eq!(parse_params(br#"{"exchange":"kraken"}"#).unwrap()["exchange"], "kraken");
        assert_eq!(parse_params(b"[1]").unwrap_err().code, ErrorCode::Malformed);
        assert_eq!(parse_params(b"{oops").unwrap_err().code, ErrorCode::Malformed);
    }
}
