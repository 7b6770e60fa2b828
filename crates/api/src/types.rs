//! # 接入层 DTO
//!
//! HTTP 接口的请求与响应结构，同时为 OpenAPI 文档提供 Schema。

use chrono::{DateTime, Utc};
use fullon_balancer::breaker::BreakerState;
use fullon_balancer::registry::{HealthStatus, ServiceInstance, ServiceRegistry};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use utoipa::ToSchema;

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// 单个实例的健康视图
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InstanceHealth {
    pub address: String,
    pub weight: u32,
    #[schema(value_type = String, example = "healthy")]
    pub status: HealthStatus,
    #[schema(value_type = String, example = "closed")]
    pub breaker: BreakerState,
    pub consecutive_failures: u32,
    pub in_flight: usize,
    /// 最近一次成功探测耗时
    pub latency_ms: Option<u64>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl InstanceHealth {
    fn of(instance: &Arc<ServiceInstance>) -> Self {
        let health = instance.health();
        Self {
            address: instance.address().to_string(),
            weight: instance.weight(),
            status: health.status,
            breaker: instance.breaker().state(),
            consecutive_failures: health.consecutive_failures,
            in_flight: instance.in_flight(),
            latency_ms: health.latency.map(millis),
            last_checked: health.last_checked,
        }
    }
}

/// 服务整体状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// 全部实例可用
    Healthy,
    /// 部分实例可用
    Degraded,
    /// 没有可用实例
    Unhealthy,
}

/// 单个逻辑服务的健康视图
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ServiceHealth {
    pub status: ServiceStatus,
    /// 可用实例最近探测耗时的平均值
    pub latency_ms: Option<u64>,
    pub instances: Vec<InstanceHealth>,
}

/// # Summary
/// `GET /health` 与 `health_check` 操作的响应体：服务名 -> 健康视图。
///
/// # Invariants
/// - 实例既健康且熔断器允许准入时才算可用。
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(transparent)]
pub struct HealthReport(pub BTreeMap<String, ServiceHealth>);

impl HealthReport {
    pub fn from_registry(registry: &ServiceRegistry) -> Self {
        let mut services = BTreeMap::new();
        for service in registry.services() {
            let instances = registry.instances(&service);
            let eligible: Vec<&Arc<ServiceInstance>> = instances.iter().filter(|i| i.is_eligible()).collect();

            let status = if eligible.is_empty() {
                ServiceStatus::Unhealthy
            } else if eligible.len() == instances.len() {
                ServiceStatus::Healthy
            } else {
                ServiceStatus::Degraded
            };

            let latencies: Vec<u64> = eligible
                .iter()
                .filter_map(|i| i.health().latency.map(millis))
                .collect();
            let latency_ms = u64::try_from(latencies.len())
                .ok()
                .filter(|n| *n > 0)
                .map(|n| latencies.iter().fold(0u64, |acc, l| acc.saturating_add(*l)) / n);

            services.insert(
                service,
                ServiceHealth {
                    status,
                    latency_ms,
                    instances: instances.iter().map(InstanceHealth::of).collect(),
                },
            );
        }
        HealthReport(services)
    }

    /// 是否所有服务都至少有一个可用实例
    pub fn is_serving(&self) -> bool {
        self.0.values().all(|s| s.status != ServiceStatus::Unhealthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fullon_core::common::time::FakeClockProvider;
    use fullon_core::config::BreakerConfig;

    #[test]
    fn test_report_degrades_with_open_breaker() {
        let clock = Arc::new(FakeClockProvider::new(Utc::now()));
        let config = BreakerConfig {
            failure_threshold: 1,
            timeout_secs: 30,
        };
        let registry = ServiceRegistry::new(config, clock);
        registry.register("cache", "mem://a", 1);
        let b = registry.register("cache", "mem://b", 1);
        registry.register("ohlcv", "mem://c", 1);

        let report = HealthReport::from_registry(&registry);
        assert_eq!(report.0["cache"].status, ServiceStatus::Healthy);
        assert!(report.is_serving());

        b.breaker().try_acquire().unwrap().failure();
        let report = HealthReport::from_registry(&registry);
        assert_eq!(report.0["cache"].status, ServiceStatus::Degraded);
        assert_eq!(report.0["cache"].instances[1].breaker, BreakerState::Open);
        assert_eq!(report.0["ohlcv"].instances.len(), 1);
    }
}
