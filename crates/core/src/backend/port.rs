use crate::backend::entity::{BackendCall, HttpForward, HttpRelay, PayloadStream};
use crate::backend::error::BackendError;
use async_trait::async_trait;
use serde_json::Value;

/// # Summary
/// 后端传输能力接口 (Port)。
/// 负责对某个具体实例地址执行一次调用，不做重试、不做熔断、不做截止时间控制，
/// 这些策略由上层调用器统一施加。
///
/// # Invariants
/// - 实现类必须保证线程安全 (`Send` + `Sync`)。
/// - 被丢弃的 Future 必须释放其占用的连接资源。
#[async_trait]
pub trait Backend: Send + Sync {
    /// # Summary
    /// 执行一次一元调用。
    ///
    /// # Arguments
    /// * `address`: 实例地址。
    /// * `call`: 操作名与参数。
    ///
    /// # Returns
    /// 成功返回结果载荷；数据不存在返回 `BackendError::NotFound`。
    async fn call(&self, address: &str, call: &BackendCall) -> Result<Value, BackendError>;

    /// # Summary
    /// 建立一条流式订阅。
    ///
    /// # Logic
    /// 1. 与实例建立长连接或挂载到数据源。
    /// 2. 返回的流在被丢弃时必须断开底层连接。
    ///
    /// # Returns
    /// 成功返回载荷流 `PayloadStream`。
    async fn subscribe(&self, address: &str, call: &BackendCall) -> Result<PayloadStream, BackendError>;

    /// # Summary
    /// 轻量级存活探测。
    async fn probe(&self, address: &str) -> Result<(), BackendError>;

    /// # Summary
    /// 原样转发 HTTP 请求，默认不支持。
    async fn forward(&self, address: &str, request: HttpForward) -> Result<HttpRelay, BackendError> {
        let _ = request;
        Err(BackendError::Unsupported(format!("HTTP forwarding to {}", address)))
    }
}
