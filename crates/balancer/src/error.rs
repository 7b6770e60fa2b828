use fullon_core::backend::error::BackendError;
use thiserror::Error;

/// 熔断器拒绝准入
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Circuit breaker is open")]
pub struct BreakerRejected;

/// # Summary
/// 实例选择错误。
///
/// # Invariants
/// - `CircuitOpen` 对外映射为 `CIRCUIT_BREAKER_OPEN`，其余为 `SERVICE_UNAVAILABLE`。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalancerError {
    #[error("Unknown service: {0}")]
    UnknownService(String),
    #[error("No eligible instance for service {0}")]
    NoEligibleInstance(String),
    // 健康实例全部处于熔断中
    #[error("Circuit breaker open for every healthy instance of {0}")]
    CircuitOpen(String),
}

/// # Summary
/// 一次经过负载均衡与熔断保护的调用的失败原因。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    #[error(transparent)]
    Unavailable(#[from] BalancerError),
    // 熔断器拒绝，未发起任何网络调用
    #[error("Circuit breaker open for {0}")]
    CircuitOpen(String),
    // 超过截止时间，调用已被放弃
    #[error("Call to {0} exceeded its deadline")]
    Timeout(String),
    // 后端报告数据不存在
    #[error("Not found: {0}")]
    CacheMiss(String),
    #[error("Backend {address} failed: {source}")]
    Backend {
        address: String,
        #[source]
        source: BackendError,
    },
}

impl InvokeError {
    /// 是否允许换一个实例重试
    pub fn is_transient(&self) -> bool {
        match self {
            InvokeError::Timeout(_) => true,
            InvokeError::Backend { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}
