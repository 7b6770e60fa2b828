use crate::balancer::LoadBalancer;
use crate::error::InvokeError;
use crate::invoker::Invoker;
use crate::registry::ServiceInstance;
use fullon_core::backend::entity::{BackendCall, HttpForward, HttpRelay, PayloadStream};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

/// # Summary
/// 面向逻辑服务的调用客户端：选实例、调用、在瞬时故障时换实例重试。
///
/// # Invariants
/// - 仅超时与连接错误会重试，且每次重试都换一个未尝试过的实例。
/// - 总尝试次数不超过 `max_attempts`。
/// - 重试时找不到其他可选实例，返回上一次的原始错误。
pub struct ServiceClient {
    balancer: Arc<LoadBalancer>,
    invoker: Arc<Invoker>,
    max_attempts: usize,
}

impl ServiceClient {
    pub fn new(balancer: Arc<LoadBalancer>, invoker: Arc<Invoker>, max_attempts: u32) -> Self {
        Self {
            balancer,
            invoker,
            max_attempts: usize::try_from(max_attempts.max(1)).unwrap_or(usize::MAX),
        }
    }

    pub fn balancer(&self) -> &Arc<LoadBalancer> {
        &self.balancer
    }

    async fn with_retry<T, F, Fut>(&self, service: &str, mut attempt: F) -> Result<T, InvokeError>
    where
        F: FnMut(Arc<ServiceInstance>) -> Fut,
        Fut: Future<Output = Result<T, InvokeError>>,
    {
        let mut tried: Vec<String> = Vec::new();
        let mut last_error: Option<InvokeError> = None;
        loop {
            let instance = match self.balancer.pick_excluding(service, &tried) {
                Ok(instance) => instance,
                Err(err) => return Err(last_error.unwrap_or_else(|| err.into())),
            };
            let address = instance.address().to_string();
            match attempt(instance).await {
                Err(err) if err.is_transient() && tried.len() + 1 < self.max_attempts => {
                    warn!(service, instance = %address, error = %err, "Transient failure, retrying on another instance");
                    tried.push(address);
                    last_error = Some(err);
                }
                other => return other,
            }
        }
    }

    /// 一元调用
    pub async fn call(&self, service: &str, call: &BackendCall) -> Result<Value, InvokeError> {
        self.with_retry(service, |instance| {
            let invoker = self.invoker.clone();
            async move { invoker.call(&instance, call).await }
        })
        .await
    }

    /// 建立订阅 (只重试建立过程)
    pub async fn subscribe(&self, service: &str, call: &BackendCall) -> Result<PayloadStream, InvokeError> {
        self.with_retry(service, |instance| {
            let invoker = self.invoker.clone();
            async move { invoker.subscribe(&instance, call).await }
        })
        .await
    }

    /// 转发 HTTP 请求
    pub async fn forward(&self, service: &str, request: HttpForward) -> Result<HttpRelay, InvokeError> {
        self.with_retry(service, |instance| {
            let invoker = self.invoker.clone();
            let request = request.clone();
            async move { invoker.forward(&instance, request).await }
        })
        .await
    }
}
