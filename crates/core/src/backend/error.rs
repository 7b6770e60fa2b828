use crate::cache::error::CacheError;
use thiserror::Error;

/// # Summary
/// 后端调用错误枚举，区分 "后端正常应答的业务结果" 与 "后端故障"。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
/// - 只有故障类变体计入熔断器失败次数，见 [`BackendError::is_breaker_failure`]。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// 后端报告数据不存在 (透传为 CACHE_MISS)
    #[error("Not found: {0}")]
    NotFound(String),
    /// 调用超过截止时间
    #[error("Backend call timed out")]
    Timeout,
    /// 连接失败或连接被拒绝
    #[error("Connection error: {0}")]
    Connect(String),
    /// 后端返回非成功状态码
    #[error("Backend returned status {0}")]
    Status(u16),
    /// 后端应答格式不合法
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// 后端以结构化错误拒绝了请求
    #[error("{code}: {message}")]
    Remote { code: String, message: String },
    /// 该后端不支持此能力
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl BackendError {
    /// 是否为瞬时故障 (允许换实例重试一次)
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Timeout | BackendError::Connect(_))
    }

    /// 是否计入熔断器失败
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout
                | BackendError::Connect(_)
                | BackendError::Status(_)
                | BackendError::Protocol(_)
        )
    }
}

impl From<CacheError> for BackendError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable(msg) | CacheError::Closed(msg) => BackendError::Connect(msg),
            CacheError::Timeout => BackendError::Timeout,
            CacheError::Storage(msg) => BackendError::Protocol(msg),
        }
    }
}
