//! # 网关统一错误处理
//!
//! 将下层各 crate 的错误类型统一映射到线上错误码、HTTP 状态码与 JSON 信封。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fullon_balancer::error::{BalancerError, InvokeError};
use fullon_core::auth::error::AuthError;
use fullon_core::backend::error::BackendError;
use thiserror::Error;

use crate::protocol::{self, ErrorCode};

/// 内部错误对客户端统一展示的文案
const INTERNAL_MESSAGE: &str = "Internal gateway error";

/// # Summary
/// 接入层统一错误：一个错误码加一段可读说明。
///
/// # Invariants
/// - `INTERNAL` 的说明只写入日志，对外替换为固定文案。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct GatewayError {
    pub code: ErrorCode,
    pub message: String,
}

impl GatewayError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_route(operation: &str) -> Self {
        Self::new(ErrorCode::InvalidRoute, format!("Unknown operation: {}", operation))
    }

    pub fn invalid_params(missing: &[&str]) -> Self {
        Self::new(
            ErrorCode::InvalidParams,
            format!("Missing required parameters: {}", missing.join(", ")),
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    /// HTTP 状态码映射
    pub fn status(&self) -> StatusCode {
        match self.code {
            ErrorCode::ServiceUnavailable | ErrorCode::CircuitBreakerOpen => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::AuthFailed => StatusCode::UNAUTHORIZED,
            ErrorCode::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::ProxyTimeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCode::InvalidRoute | ErrorCode::CacheMiss => StatusCode::NOT_FOUND,
            ErrorCode::InvalidParams | ErrorCode::Malformed => StatusCode::BAD_REQUEST,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// # Summary
    /// 对客户端可见的说明。
    ///
    /// # Logic
    /// 内部错误在此处落日志，返回固定文案，不向客户端透传细节。
    pub fn public_message(&self) -> String {
        if self.code == ErrorCode::Internal {
            tracing::error!(error = %self.message, "Internal gateway error");
            INTERNAL_MESSAGE.to_string()
        } else {
            self.message.clone()
        }
    }

    /// 转为一元应答信封
    pub fn into_response_envelope(self, request_id: impl Into<String>) -> protocol::Response {
        let message = self.public_message();
        protocol::Response::fail(request_id, self.code, message)
    }
}

/// 将 `GatewayError` 转换为 axum 的 HTTP 响应
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(self.into_response_envelope(""));
        (status, body).into_response()
    }
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        GatewayError::new(ErrorCode::AuthFailed, err.to_string())
    }
}

impl From<BalancerError> for GatewayError {
    fn from(err: BalancerError) -> Self {
        let code = match err {
            BalancerError::CircuitOpen(_) => ErrorCode::CircuitBreakerOpen,
            BalancerError::UnknownService(_) | BalancerError::NoEligibleInstance(_) => ErrorCode::ServiceUnavailable,
        };
        GatewayError::new(code, err.to_string())
    }
}

/// # Summary
/// 后端自身报告的错误 (例如推送流中途失败)。
///
/// # Logic
/// - NotFound -> `CACHE_MISS`，Timeout -> `PROXY_TIMEOUT`。
/// - 上游网关带回的已知错误码原样保留，未知码视为内部错误。
/// - 其余传输类故障视为服务不可用。
impl From<BackendError> for GatewayError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(key) => GatewayError::new(ErrorCode::CacheMiss, format!("Not found: {}", key)),
            BackendError::Timeout => GatewayError::new(ErrorCode::ProxyTimeout, "Backend call timed out"),
            BackendError::Remote { code, message } => match ErrorCode::parse(&code) {
                Some(parsed) => GatewayError::new(parsed, message),
                None => GatewayError::internal(format!("{}: {}", code, message)),
            },
            BackendError::Unsupported(what) => GatewayError::internal(format!("Unsupported: {}", what)),
            other => GatewayError::new(ErrorCode::ServiceUnavailable, other.to_string()),
        }
    }
}

impl From<InvokeError> for GatewayError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::Unavailable(inner) => inner.into(),
            InvokeError::CircuitOpen(address) => GatewayError::new(
                ErrorCode::CircuitBreakerOpen,
                format!("Circuit breaker open for {}", address),
            ),
            InvokeError::Timeout(address) => {
                GatewayError::new(ErrorCode::ProxyTimeout, format!("Call to {} exceeded its deadline", address))
            }
            InvokeError::CacheMiss(key) => GatewayError::new(ErrorCode::CacheMiss, format!("Not found: {}", key)),
            InvokeError::Backend { source, .. } => source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ErrorCode::ServiceUnavailable, 503),
            (ErrorCode::CircuitBreakerOpen, 503),
            (ErrorCode::AuthFailed, 401),
            (ErrorCode::RateLimitExceeded, 429),
            (ErrorCode::ProxyTimeout, 504),
            (ErrorCode::InvalidRoute, 404),
        ];
        for (code, status) in cases {
            assert_eq!(GatewayError::new(code, "").status().as_u16(), status);
        }
    }

    #[test]
    fn test_invoke_error_mapping() {
        let err: GatewayError = InvokeError::CircuitOpen("mem://a".into()).into();
        assert_eq!(err.code, ErrorCode::CircuitBreakerOpen);

        let err: GatewayError = InvokeError::Unavailable(BalancerError::UnknownService("x".into())).into();
        assert_eq!(err.code, ErrorCode::ServiceUnavailable);

        let err: GatewayError = InvokeError::Unavailable(BalancerError::CircuitOpen("cache".into())).into();
        assert_eq!(err.code, ErrorCode::CircuitBreakerOpen);
        assert_eq!(err.status().as_u16(), 503);

        let err: GatewayError = InvokeError::CacheMiss("get_ticker".into()).into();
        assert_eq!(err.code, ErrorCode::CacheMiss);

        let err: GatewayError = InvokeError::Backend {
            address: "http://a".into(),
            source: BackendError::Remote {
                code: "INVALID_PARAMS".into(),
                message: "symbol".into(),
            },
        }
        .into();
        assert_eq!(err, GatewayError::new(ErrorCode::InvalidParams, "symbol"));
    }

    #[test]
    fn test_internal_message_is_not_leaked() {
        let envelope = GatewayError::internal("db password wrong").into_response_envelope("r1");
        assert_eq!(envelope.error.as_deref(), Some(INTERNAL_MESSAGE));
        assert_eq!(envelope.error_code, Some(ErrorCode::Internal));
    }
}
