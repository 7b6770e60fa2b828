use axum::body::{Body, Bytes};
use axum::extract::{Path, RawQuery, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use fullon_core::backend::entity::HttpForward;
use tracing::debug;

use crate::error::GatewayError;
use crate::middleware::auth::CurrentIdentity;
use crate::protocol::ErrorCode;
use crate::server::AppState;

/// # Summary
/// `ANY /proxy/{service}/{*path}`：把请求原样转发给负载均衡选出的实例。
///
/// # Logic
/// 1. 未登记的服务返回 `INVALID_ROUTE` (404)。
/// 2. 方法、路径、查询串、`Content-Type` 与请求体原样转发。
/// 3. 实例的状态码与响应体原样带回；网关自身的失败转为错误信封。
pub async fn forward(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path((service, path)): Path<(String, String)>,
    method: Method,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.registry().services().contains(&service) {
        return GatewayError::new(ErrorCode::InvalidRoute, format!("Unknown service: {}", service)).into_response();
    }

    let request = HttpForward {
        method: method.to_string(),
        path: format!("/{}", path),
        query,
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    };
    debug!(service = %service, method = %request.method, path = %request.path, subject = %identity.subject, "Proxying HTTP request");

    let relay = match state.client.forward(&service, request).await {
        Ok(relay) => relay,
        Err(err) => return GatewayError::from(err).into_response(),
    };

    let status = StatusCode::from_u16(relay.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    if let Some(content_type) = &relay.content_type {
        builder = builder.header(CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from(relay.body))
        .unwrap_or_else(|e| GatewayError::internal(format!("relay response build failed: {}", e)).into_response())
}
