use crate::breaker::BreakerPermit;
use crate::error::InvokeError;
use crate::registry::ServiceInstance;
use fullon_core::backend::entity::{BackendCall, HttpForward, HttpRelay, PayloadStream};
use fullon_core::backend::error::BackendError;
use fullon_core::backend::port::Backend;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// # Summary
/// 单次后端调用执行器。
///
/// # Logic
/// 1. 申请熔断许可，被拒绝时不发起任何网络调用。
/// 2. 登记在途调用 (RAII)。
/// 3. 在截止时间内执行调用，超时即放弃。
/// 4. 按结果结算许可：超时、连接错误、非成功状态计为失败；NotFound 计为成功。
///
/// # Invariants
/// - 不做任何重试，重试策略属于调用方。
pub struct Invoker {
    backend: Arc<dyn Backend>,
    deadline: Duration,
}

impl Invoker {
    pub fn new(backend: Arc<dyn Backend>, deadline: Duration) -> Self {
        Self { backend, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    fn admit(instance: &ServiceInstance) -> Result<BreakerPermit, InvokeError> {
        instance
            .breaker()
            .try_acquire()
            .map_err(|_| InvokeError::CircuitOpen(instance.address().to_string()))
    }

    fn settle<T>(
        &self,
        instance: &ServiceInstance,
        permit: BreakerPermit,
        outcome: Result<Result<T, BackendError>, tokio::time::error::Elapsed>,
    ) -> Result<T, InvokeError> {
        let address = instance.address();
        match outcome {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(BackendError::NotFound(key))) => {
                permit.success();
                Err(InvokeError::CacheMiss(key))
            }
            Ok(Err(source)) => {
                if source.is_breaker_failure() {
                    permit.failure();
                } else {
                    permit.success();
                }
                warn!(instance = address, error = %source, "Backend call failed");
                Err(InvokeError::Backend {
                    address: address.to_string(),
                    source,
                })
            }
            Err(_) => {
                permit.failure();
                warn!(instance = address, deadline = ?self.deadline, "Backend call timed out");
                Err(InvokeError::Timeout(address.to_string()))
            }
        }
    }

    /// 一元调用
    pub async fn call(&self, instance: &Arc<ServiceInstance>, call: &BackendCall) -> Result<Value, InvokeError> {
        let permit = Self::admit(instance)?;
        let _in_flight = instance.begin_call();
        let outcome = tokio::time::timeout(self.deadline, self.backend.call(instance.address(), call)).await;
        self.settle(instance, permit, outcome)
    }

    /// # Summary
    /// 建立流式订阅。
    ///
    /// # Logic
    /// 截止时间只约束建立过程；建立成功即结算许可。
    /// 在途计数随返回的流一起存活，流被丢弃时归还。
    pub async fn subscribe(&self, instance: &Arc<ServiceInstance>, call: &BackendCall) -> Result<PayloadStream, InvokeError> {
        let permit = Self::admit(instance)?;
        let in_flight = instance.begin_call();
        let outcome = tokio::time::timeout(self.deadline, self.backend.subscribe(instance.address(), call)).await;
        let mut upstream = self.settle(instance, permit, outcome)?;
        let s = async_stream::stream! {
            let _in_flight = in_flight;
            while let Some(item) = upstream.next().await {
                yield item;
            }
        };
        Ok(Box::pin(s))
    }

    /// # Summary
    /// 转发原始 HTTP 请求。
    ///
    /// # Logic
    /// 后端的任何状态码都原样返回；5xx 额外计为一次熔断失败。
    pub async fn forward(&self, instance: &Arc<ServiceInstance>, request: HttpForward) -> Result<HttpRelay, InvokeError> {
        let permit = Self::admit(instance)?;
        let _in_flight = instance.begin_call();
        let outcome = tokio::time::timeout(self.deadline, self.backend.forward(instance.address(), request)).await;
        match outcome {
            Ok(Ok(relay)) if relay.status >= 500 => {
                permit.failure();
                warn!(instance = instance.address(), status = relay.status, "Backend answered with server error");
                Ok(relay)
            }
            other => self.settle(instance, permit, other),
        }
    }
}
