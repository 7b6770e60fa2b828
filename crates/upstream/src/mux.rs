use async_trait::async_trait;
use fullon_core::backend::entity::{BackendCall, HttpForward, HttpRelay, PayloadStream};
use fullon_core::backend::error::BackendError;
use fullon_core::backend::port::Backend;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// # Summary
/// 按实例地址的 scheme 分发到具体后端实现。
///
/// # Invariants
/// - 路由表在构造后不再变化。
/// - 未登记的 scheme 返回 `Unsupported`，不会被计为熔断失败。
#[derive(Default)]
pub struct BackendMux {
    routes: HashMap<String, Arc<dyn Backend>>,
}

impl BackendMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记 scheme (不含 `://`)
    pub fn route(mut self, scheme: &str, backend: Arc<dyn Backend>) -> Self {
        self.routes.insert(scheme.to_ascii_lowercase(), backend);
        self
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.routes.keys().cloned().collect();
        schemes.sort();
        schemes
    }

    fn resolve(&self, address: &str) -> Result<&Arc<dyn Backend>, BackendError> {
        address
            .split_once("://")
            .and_then(|(scheme, _)| self.routes.get(&scheme.to_ascii_lowercase()))
            .ok_or_else(|| BackendError::Unsupported(format!("no backend for address {}", address)))
    }
}

#[async_trait]
impl Backend for BackendMux {
    async fn call(&self, address: &str, call: &BackendCall) -> Result<Value, BackendError> {
        self.resolve(address)?.call(address, call).await
    }

    async fn subscribe(&self, address: &str, call: &BackendCall) -> Result<PayloadStream, BackendError> {
        self.resolve(address)?.subscribe(address, call).await
    }

    async fn probe(&self, address: &str) -> Result<(), BackendError> {
        self.resolve(address)?.probe(address).await
    }

    async fn forward(&self, address: &str, request: HttpForward) -> Result<HttpRelay, BackendError> {
        self.resolve(address)?.forward(address, request).await
    }
}
