use crate::error::BalancerError;
use crate::registry::{ServiceInstance, ServiceRegistry};
use crate::strategy::{Strategy, strategy_for};
use fullon_core::config::BalanceStrategy;
use std::sync::Arc;
use tracing::debug;

/// # Summary
/// 负载均衡器：在注册表的某个服务下挑选一个可选实例。
///
/// # Invariants
/// - 可选 = 健康 且 熔断器可准入。
/// - 选择只持有目标服务的选择锁，不同服务之间互不阻塞。
pub struct LoadBalancer {
    registry: Arc<ServiceRegistry>,
    strategy: Arc<dyn Strategy>,
}

impl LoadBalancer {
    pub fn new(registry: Arc<ServiceRegistry>, strategy: Arc<dyn Strategy>) -> Self {
        Self { registry, strategy }
    }

    pub fn with_strategy(registry: Arc<ServiceRegistry>, kind: BalanceStrategy) -> Self {
        Self::new(registry, strategy_for(kind))
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// # Summary
    /// 为服务挑选一个实例。
    ///
    /// # Returns
    /// 服务不存在或无可选实例时返回 `BalancerError`。
    pub fn pick(&self, service: &str) -> Result<Arc<ServiceInstance>, BalancerError> {
        self.pick_excluding(service, &[])
    }

    /// # Summary
    /// 挑选实例，排除已经尝试过的地址。
    ///
    /// # Logic
    /// 1. 取服务实例快照，计算每个实例的可选标记。
    /// 2. 持选择锁调用策略。
    /// 3. 选不出实例时，若存在未尝试过的健康实例仅因熔断被排除，返回 `CircuitOpen`。
    pub fn pick_excluding(&self, service: &str, tried: &[String]) -> Result<Arc<ServiceInstance>, BalancerError> {
        let group = self
            .registry
            .group(service)
            .ok_or_else(|| BalancerError::UnknownService(service.to_string()))?;
        let instances = group.snapshot();
        let eligible: Vec<bool> = instances
            .iter()
            .map(|i| i.is_eligible() && !tried.iter().any(|t| t == i.address()))
            .collect();

        let picked = {
            let mut state = group.selection.lock().unwrap_or_else(|e| e.into_inner());
            self.strategy.select(&instances, &eligible, &mut state)
        };

        match picked.and_then(|i| instances.get(i)) {
            Some(instance) => {
                debug!(service, instance = instance.address(), strategy = self.strategy.name(), "Instance picked");
                Ok(instance.clone())
            }
            None => {
                let tripped = instances
                    .iter()
                    .any(|i| i.is_healthy() && !i.breaker().is_eligible() && !tried.iter().any(|t| t == i.address()));
                if tripped {
                    Err(BalancerError::CircuitOpen(service.to_string()))
                } else {
                    Err(BalancerError::NoEligibleInstance(service.to_string()))
                }
            }
        }
    }
}
