//! # 线上消息协议
//!
//! 客户端与网关之间交换的 JSON 信封：请求、取消、应答、推送帧与错误信封。
//! 编解码都是同步的纯函数，不触碰任何 I/O。

use fullon_core::common::Params;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

/// 取消请求使用的保留操作名
pub const CANCEL_OPERATION: &str = "cancel";

/// 编码失败时替代输出的固定信封
const ENCODE_FAILURE: &str =
    r#"{"type":"error","error_code":"INTERNAL","error":"Internal gateway error"}"#;

/// # Summary
/// 对外暴露的错误码集合。
///
/// # Invariants
/// - 线上形式为全大写蛇形，例如 `CIRCUIT_BREAKER_OPEN`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Malformed,
    InvalidRoute,
    InvalidParams,
    AuthFailed,
    RateLimitExceeded,
    ServiceUnavailable,
    CircuitBreakerOpen,
    ProxyTimeout,
    CacheMiss,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Malformed => "MALFORMED",
            ErrorCode::InvalidRoute => "INVALID_ROUTE",
            ErrorCode::InvalidParams => "INVALID_PARAMS",
            ErrorCode::AuthFailed => "AUTH_FAILED",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorCode::ProxyTimeout => "PROXY_TIMEOUT",
            ErrorCode::CacheMiss => "CACHE_MISS",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// 从上游报告的错误码字符串还原，未知码返回 None
    pub fn parse(code: &str) -> Option<Self> {
        serde_json::from_value(Value::String(code.to_string())).ok()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
//  入站消息
// ============================================================

/// 一次操作请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Request {
    pub request_id: String,
    pub operation: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: Params,
}

/// 取消某个进行中的请求 (通常是订阅)
#[derive(Debug, Clone, PartialEq)]
pub struct CancelRequest {
    pub request_id: String,
    pub target_request_id: String,
}

/// 解码后的入站消息
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request(Request),
    Cancel(CancelRequest),
}

/// # Summary
/// 入站帧无法解析为合法消息。
///
/// # Invariants
/// - 对外一律映射为 `MALFORMED`。
/// - 能从残缺帧中读出 `request_id` 时一并携带，便于客户端关联。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed message: {reason}")]
pub struct DecodeError {
    pub request_id: Option<String>,
    pub reason: String,
}

impl DecodeError {
    fn new(request_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            reason: reason.into(),
        }
    }
}

fn non_empty_str<'a>(object: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// # Summary
/// 解码一帧入站文本。
///
/// # Logic
/// 1. 必须是 JSON 对象。
/// 2. `request_id`、`operation` 必须是非空字符串。
/// 3. `params` 缺省为空对象，出现时必须是对象。
/// 4. `operation == "cancel"` 时必须带字符串 `params.target_request_id`。
///
/// # Arguments
/// * `bytes`: 原始帧内容。
///
/// # Returns
/// 成功返回 `Inbound`，否则返回 `DecodeError`。
pub fn decode(bytes: &[u8]) -> Result<Inbound, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError::new(None, format!("invalid JSON: {}", e)))?;
    let Value::Object(mut object) = value else {
        return Err(DecodeError::new(None, "message must be a JSON object"));
    };

    let request_id = non_empty_str(&object, "request_id")
        .map(str::to_string)
        .ok_or_else(|| DecodeError::new(None, "missing request_id"))?;
    let operation = non_empty_str(&object, "operation")
        .map(str::to_string)
        .ok_or_else(|| DecodeError::new(Some(request_id.clone()), "missing operation"))?;
    let params = match object.remove("params") {
        None | Some(Value::Null) => Params::new(),
        Some(Value::Object(params)) => params,
        Some(_) => {
            return Err(DecodeError::new(Some(request_id), "params must be an object"));
        }
    };

    if operation == CANCEL_OPERATION {
        let target_request_id = non_empty_str(&params, "target_request_id")
            .map(str::to_string)
            .ok_or_else(|| DecodeError::new(Some(request_id.clone()), "cancel requires target_request_id"))?;
        return Ok(Inbound::Cancel(CancelRequest {
            request_id,
            target_request_id,
        }));
    }

    Ok(Inbound::Request(Request {
        request_id,
        operation,
        params,
    }))
}

// ============================================================
//  出站消息
// ============================================================

/// # Summary
/// 一元请求的应答信封。
///
/// # Invariants
/// - `request_id` 与请求完全一致。
/// - `success == true` 时只带 `result`，否则只带 `error_code` 与 `error`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Response {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Object)]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl Response {
    pub fn ok(request_id: impl Into<String>, result: Value) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            result: Some(result),
            error_code: None,
            error: None,
            latency_ms: None,
        }
    }

    pub fn fail(request_id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            result: None,
            error_code: Some(code),
            error: Some(message.into()),
            latency_ms: None,
        }
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }
}

/// 订阅结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Completed,
    Cancelled,
    Error,
}

/// # Summary
/// 服务端主动推送的帧，以 `type` 字段区分。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    StreamUpdate {
        subscription_id: String,
        sequence: u64,
        payload: Value,
    },
    StreamEnd {
        subscription_id: String,
        reason: EndReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// 无法归属到合法请求的错误
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        error_code: ErrorCode,
        error: String,
    },
}

impl PushFrame {
    pub fn update(subscription_id: impl Into<String>, sequence: u64, payload: Value) -> Self {
        PushFrame::StreamUpdate {
            subscription_id: subscription_id.into(),
            sequence,
            payload,
        }
    }

    pub fn end(subscription_id: impl Into<String>, reason: EndReason) -> Self {
        PushFrame::StreamEnd {
            subscription_id: subscription_id.into(),
            reason,
            error_code: None,
            error: None,
        }
    }

    pub fn end_with_error(subscription_id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        PushFrame::StreamEnd {
            subscription_id: subscription_id.into(),
            reason: EndReason::Error,
            error_code: Some(code),
            error: Some(message.into()),
        }
    }

    pub fn error(request_id: Option<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        PushFrame::Error {
            request_id,
            error_code: code,
            error: message.into(),
        }
    }
}

/// 任意一条出站消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Response(Response),
    Push(PushFrame),
}

impl From<Response> for Outbound {
    fn from(response: Response) -> Self {
        Outbound::Response(response)
    }
}

impl From<PushFrame> for Outbound {
    fn from(frame: PushFrame) -> Self {
        Outbound::Push(frame)
    }
}

/// # Summary
/// 编码一条出站消息。
///
/// # Logic
/// 内部构造的值总能序列化；万一失败属于程序缺陷，记录错误并输出固定的 `INTERNAL` 信封。
pub fn encode(message: &Outbound) -> String {
    match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode outbound message");
            ENCODE_FAILURE.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_request_defaults_params() {
        let inbound = decode(br#"{"request_id":"r1","operation":"get_bots"}"#).unwrap();
        assert_eq!(
            inbound,
            Inbound::Request(Request {
                request_id: "r1".into(),
                operation: "get_bots".into(),
                params: Params::new(),
            })
        );
    }

    #[test]
    fn test_decode_cancel() {
        let raw = br#"{"request_id":"c1","operation":"cancel","params":{"target_request_id":"s1"}}"#;
        assert_eq!(
            decode(raw).unwrap(),
            Inbound::Cancel(CancelRequest {
                request_id: "c1".into(),
                target_request_id: "s1".into(),
            })
        );
    }

    #[test]
    fn test_decode_rejections() {
        assert_eq!(decode(b"not json").unwrap_err().request_id, None);
        assert!(decode(b"[1,2]").is_err());
        assert!(decode(br#"{"operation":"ping"}"#).is_err());
        assert!(decode(br#"{"request_id":"","operation":"ping"}"#).is_err());

        let err = decode(br#"{"request_id":"r9","params":{}}"#).unwrap_err();
        assert_eq!(err.request_id.as_deref(), Some("r9"));

        let err = decode(br#"{"request_id":"r2","operation":"ping","params":[1]}"#).unwrap_err();
        assert_eq!(err.reason, "params must be an object");

        let err = decode(br#"{"request_id":"c1","operation":"cancel","params":{}}"#).unwrap_err();
        assert_eq!(err.request_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_response_wire_shape() {
        let miss = Response::fail("r1", ErrorCode::CacheMiss, "no ticker");
        let value: Value = serde_json::from_str(&encode(&miss.into())).unwrap();
        assert_eq!(
            value,
            json!({"request_id": "r1", "success": false, "error_code": "CACHE_MISS", "error": "no ticker"})
        );

        let ok = Response::ok("r2", json!({"bid": 1})).with_latency(3);
        let value: Value = serde_json::from_str(&encode(&ok.into())).unwrap();
        assert_eq!(value, json!({"request_id": "r2", "success": true, "result": {"bid": 1}, "latency_ms": 3}));
    }

    #[test]
    fn test_push_frame_wire_shape() {
        let update: Value = serde_json::from_str(&encode(&PushFrame::update("s1", 4, json!([1])).into())).unwrap();
        assert_eq!(update, json!({"type": "stream_update", "subscription_id": "s1", "sequence": 4, "payload": [1]}));

        let end: Value = serde_json::from_str(&encode(&PushFrame::end("s1", EndReason::Cancelled).into())).unwrap();
        assert_eq!(end, json!({"type": "stream_end", "subscription_id": "s1", "reason": "cancelled"}));

        let frame = PushFrame::error(None, ErrorCode::Malformed, "bad");
        let error: Value = serde_json::from_str(&encode(&frame.into())).unwrap();
        assert_eq!(error, json!({"type": "error", "error_code": "MALFORMED", "error": "bad"}));
    }

    #[test]
    fn test_outbound_decodes_back_by_shape() {
        let text = r#"{"type":"stream_end","subscription_id":"s1","reason":"error","error_code":"PROXY_TIMEOUT","error":"late"}"#;
        let parsed: Outbound = serde_json::from_str(text).unwrap();
        assert_eq!(
            parsed,
            Outbound::Push(PushFrame::end_with_error("s1", ErrorCode::ProxyTimeout, "late"))
        );
    }

    #[test]
    fn test_error_code_parse() {
        assert_eq!(ErrorCode::parse("RATE_LIMIT_EXCEEDED"), Some(ErrorCode::RateLimitExceeded));
        assert_eq!(ErrorCode::parse("NOPE"), None);
        assert_eq!(ErrorCode::CircuitBreakerOpen.to_string(), "CIRCUIT_BREAKER_OPEN");
    }
}
