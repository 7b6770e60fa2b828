use crate::backend::error::BackendError;
use crate::common::Params;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

/// # Summary
/// 后端推送的载荷流。
///
/// # Invariants
/// - `None` 表示后端自然结束；`Some(Err)` 表示不可恢复的故障，之后不再读取。
pub type PayloadStream = Pin<Box<dyn Stream<Item = Result<Value, BackendError>> + Send>>;

/// # Summary
/// 发往后端实例的一次逻辑调用。
#[derive(Debug, Clone, PartialEq)]
pub struct BackendCall {
    // 操作名，例如 `get_ticker`
    pub operation: String,
    // 操作参数
    pub params: Params,
}

impl BackendCall {
    pub fn new(operation: impl Into<String>, params: Params) -> Self {
        Self {
            operation: operation.into(),
            params,
        }
    }
}

/// # Summary
/// 需要原样转发到后端的 HTTP 请求。
#[derive(Debug, Clone, Default)]
pub struct HttpForward {
    // 大写的 HTTP 方法名
    pub method: String,
    // 后端路径 (以 `/` 开头)
    pub path: String,
    // 原始查询串 (不含 `?`)
    pub query: Option<String>,
    // 请求体的 Content-Type
    pub content_type: Option<String>,
    // 请求体
    pub body: Vec<u8>,
}

/// # Summary
/// 后端返回的原始 HTTP 响应，网关不做改写。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRelay {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}
