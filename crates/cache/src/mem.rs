use async_trait::async_trait;
use dashmap::DashMap;
use fullon_core::cache::error::CacheError;
use fullon_core::cache::port::{CacheStream, CacheStore};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

// 每个键的广播缓冲，慢订阅者超出后丢弃最旧的更新
const CHANNEL_CAPACITY: usize = 1024;

/// # Summary
/// 基于 DashMap 的内存缓存实现。
///
/// # Invariants
/// - 所有操作均通过并发哈希表 `DashMap` 执行，保证多线程安全。
/// - 每个键最多一个广播发送端；发送端被移除后，该键的所有订阅流自然结束。
/// - 不提供自动过期或容量限制，数据由写入方管理。
pub struct MemCache {
    // 键 -> 最新快照
    storage: DashMap<String, Value>,
    // 键 -> 更新广播源
    channels: DashMap<String, broadcast::Sender<Value>>,
}

impl MemCache {
    /// # Summary
    /// 创建一个新的 MemCache 实例。
    pub fn new() -> Self {
        Self {
            storage: DashMap::new(),
            channels: DashMap::new(),
        }
    }

    /// # Summary
    /// 写入快照并通知订阅者。
    ///
    /// # Logic
    /// 1. 覆盖键的当前值。
    /// 2. 若该键存在订阅者，广播新值；无订阅者时发送失败被忽略。
    ///
    /// # Arguments
    /// * `key`: 唯一键。
    /// * `value`: 新值。
    pub fn put(&self, key: &str, value: Value) {
        self.storage.insert(key.to_string(), value.clone());
        self.publish(key, value);
    }

    /// # Summary
    /// 仅广播一次更新，不改动快照。
    ///
    /// # Returns
    /// 收到该更新的订阅者数量。
    pub fn publish(&self, key: &str, value: Value) -> usize {
        match self.channels.get(key) {
            Some(tx) => tx.send(value).unwrap_or(0),
            None => 0,
        }
    }

    /// 删除快照，订阅流不受影响
    pub fn remove(&self, key: &str) {
        self.storage.remove(key);
    }

    /// # Summary
    /// 关闭键的更新源，当前所有订阅流随之结束。
    pub fn close(&self, key: &str) {
        if self.channels.remove(key).is_some() {
            debug!(key, "Cache channel closed");
        }
    }

    /// 当前订阅某键的接收端数量
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.channels.get(key).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    fn sender(&self, key: &str) -> broadcast::Sender<Value> {
        self.channels
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

impl Default for MemCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemCache {
    /// # Summary
    /// 获取键的当前快照。
    ///
    /// # Logic
    /// 从哈希表中检索键对应的引用，并克隆为独立的所有权对象返回。
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        Ok(self.storage.get(key).map(|v| v.value().clone()))
    }

    /// # Summary
    /// 订阅键的后续更新。
    ///
    /// # Logic
    /// 1. 取得 (或创建) 键的广播源并挂载接收端。
    /// 2. 接收端落后时跳过丢失部分并记录告警，继续接收。
    /// 3. 广播源关闭后流结束。
    async fn stream(&self, key: &str) -> Result<CacheStream, CacheError> {
        let mut rx = self.sender(key).subscribe();
        let key = key.to_string();
        let s = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(value) => yield Ok(value),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(key = %key, skipped, "Cache subscriber lagged, updates skipped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(s))
    }
}
