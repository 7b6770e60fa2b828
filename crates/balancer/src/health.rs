use crate::registry::{HealthStatus, ServiceInstance, ServiceRegistry};
use fullon_core::backend::port::Backend;
use fullon_core::config::HealthConfig;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// # Summary
/// 后台健康检查器。
///
/// # Logic
/// 每个周期对注册表中所有实例并发发起一次带超时的探测：
/// 连续失败达到阈值标记不健康，一次成功即恢复健康。
///
/// # Invariants
/// - 探测失败不移除实例。
/// - 单个实例的探测超时不影响同一轮其他实例的探测。
pub struct HealthChecker {
    registry: Arc<ServiceRegistry>,
    backend: Arc<dyn Backend>,
    config: HealthConfig,
}

impl HealthChecker {
    pub fn new(registry: Arc<ServiceRegistry>, backend: Arc<dyn Backend>, config: HealthConfig) -> Self {
        Self {
            registry,
            backend,
            config,
        }
    }

    /// # Summary
    /// 启动周期探测任务，令牌取消后退出。
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.config.interval_secs, "Health checker started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => self.check_all().await,
                }
            }
            info!("Health checker stopped");
        })
    }

    /// 执行一轮探测
    pub async fn check_all(&self) {
        let instances = self.registry.all_instances();
        let probes = instances.iter().map(|instance| self.check_one(instance));
        join_all(probes).await;
    }

    async fn check_one(&self, instance: &Arc<ServiceInstance>) {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.config.timeout(), self.backend.probe(instance.address())).await {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(e)) => {
                debug!(instance = instance.address(), error = %e, "Probe failed");
                Err(())
            }
            Err(_) => {
                debug!(instance = instance.address(), "Probe timed out");
                Err(())
            }
        };

        let now = self.registry.clock().now();
        match instance.record_probe(outcome, self.config.failure_threshold, now) {
            Some(HealthStatus::Unhealthy) => {
                warn!(service = instance.service(), instance = instance.address(), "Instance marked unhealthy");
            }
            Some(HealthStatus::Healthy) => {
                info!(service = instance.service(), instance = instance.address(), "Instance recovered");
            }
            None => {}
        }
    }
}
