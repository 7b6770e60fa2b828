use async_trait::async_trait;
use dashmap::DashMap;
use fullon_core::backend::entity::{BackendCall, PayloadStream};
use fullon_core::backend::error::BackendError;
use fullon_core::backend::port::Backend;
use fullon_core::cache::port::CacheStore;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;

/// # Summary
/// 由操作名与参数推导缓存键。
///
/// # Logic
/// 1. 无参数时键即操作名。
/// 2. 否则为 `operation?k1=v1&k2=v2`，参数按键名升序；字符串值原样拼接，其他值使用 JSON 文本。
///
/// # Returns
/// 确定性的缓存键，相同的调用总是得到相同的键。
pub fn cache_key(call: &BackendCall) -> String {
    if call.params.is_empty() {
        return call.operation.clone();
    }
    let mut pairs: Vec<(&String, String)> = call
        .params
        .iter()
        .map(|(k, v)| {
            let text = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k, text)
        })
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));
    let query: Vec<String> = pairs.into_iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}?{}", call.operation, query.join("&"))
}

/// # Summary
/// 把 `CacheStore` 暴露为 `Backend` 的适配器，实例地址即 `mem://<name>`。
///
/// # Invariants
/// - 单元调用读快照，键不存在映射为 `BackendError::NotFound`。
/// - 订阅只转发后续更新，不回放快照。
/// - 未单独挂载存储的地址回落到默认存储。
pub struct CacheBackend {
    default_store: Arc<dyn CacheStore>,
    stores: DashMap<String, Arc<dyn CacheStore>>,
}

impl CacheBackend {
    pub fn new(default_store: Arc<dyn CacheStore>) -> Self {
        Self {
            default_store,
            stores: DashMap::new(),
        }
    }

    /// 为指定实例地址挂载独立的存储
    pub fn mount(&self, address: &str, store: Arc<dyn CacheStore>) {
        self.stores.insert(address.to_string(), store);
    }

    fn store_for(&self, address: &str) -> Arc<dyn CacheStore> {
        self.stores
            .get(address)
            .map(|s| s.value().clone())
            .unwrap_or_else(|| self.default_store.clone())
    }
}

#[async_trait]
impl Backend for CacheBackend {
    async fn call(&self, address: &str, call: &BackendCall) -> Result<Value, BackendError> {
        let key = cache_key(call);
        match self.store_for(address).get(&key).await? {
            Some(value) => Ok(value),
            None => Err(BackendError::NotFound(key)),
        }
    }

    async fn subscribe(&self, address: &str, call: &BackendCall) -> Result<PayloadStream, BackendError> {
        let key = cache_key(call);
        let stream = self.store_for(address).stream(&key).await?;
        Ok(Box::pin(stream.map(|item| item.map_err(BackendError::from))))
    }

    async fn probe(&self, address: &str) -> Result<(), BackendError> {
        self.store_for(address).ping().await.map_err(BackendError::from)
    }
}
