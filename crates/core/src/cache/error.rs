use thiserror::Error;

/// # Summary
/// 缓存域错误枚举，处理连接、超时及底层存储故障。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
/// - "键不存在" 不是错误，由 `Ok(None)` 表达。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    // 缓存服务不可达
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
    // 操作超时
    #[error("Cache operation timed out")]
    Timeout,
    // 底层存储引擎故障
    #[error("Storage error: {0}")]
    Storage(String),
    // 更新流被数据源关闭
    #[error("Stream closed: {0}")]
    Closed(String),
}
