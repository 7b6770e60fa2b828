use crate::cache::error::CacheError;
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

/// # Summary
/// 缓存更新流别名，使用动态分发的异步流。
///
/// # Invariants
/// - 流是无界的，直到数据源结束或消费方丢弃流 (Drop 即取消)。
pub type CacheStream = Pin<Box<dyn Stream<Item = Result<Value, CacheError>> + Send>>;

/// # Summary
/// 只读缓存能力接口 (Port)。
/// 网关不关心底层是 Redis 还是内存，只通过键读取快照或订阅更新。
///
/// # Invariants
/// - 只读：本接口不提供任何写入操作。
/// - 实现类必须保证线程安全 (`Send` + `Sync`)。
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// # Summary
    /// 读取键对应的当前值。
    ///
    /// # Logic
    /// 1. 根据键检索存储内容。
    ///
    /// # Arguments
    /// * `key`: 唯一键。
    ///
    /// # Returns
    /// 存在则返回 `Some(Value)`，不存在返回 `None` (即 NotFound)。
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// # Summary
    /// 订阅键的更新流。
    ///
    /// # Logic
    /// 1. 挂载到该键的广播源。
    /// 2. 持续产出后续的更新值，直到数据源结束。
    ///
    /// # Arguments
    /// * `key`: 唯一键。
    ///
    /// # Returns
    /// 成功返回异步流 `CacheStream`。
    async fn stream(&self, key: &str) -> Result<CacheStream, CacheError>;

    /// # Summary
    /// 存活探测，默认实现视为始终可用。
    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
