use crate::breaker::CircuitBreaker;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fullon_core::common::time::TimeProvider;
use fullon_core::config::{BreakerConfig, InstanceConfig};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::info;

/// 实例健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// 健康状态快照
#[derive(Debug, Clone, PartialEq)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    // 连续探测失败次数
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
    // 最近一次成功探测的耗时
    pub latency: Option<Duration>,
}

/// # Summary
/// 逻辑服务下的一个可寻址后端实例。
///
/// # Invariants
/// - 健康状态只由 `HealthChecker` 写入 (`pub(crate)` 入口)。
/// - 熔断状态只由 `Invoker` 通过许可结算写入。
/// - 在途计数只通过 `InFlightGuard` 增减，保证任何退出路径都会归还。
pub struct ServiceInstance {
    service: String,
    address: String,
    weight: u32,
    health: Mutex<HealthSnapshot>,
    breaker: Arc<CircuitBreaker>,
    in_flight: AtomicUsize,
    invocations: AtomicU64,
}

impl std::fmt::Debug for ServiceInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceInstance")
            .field("service", &self.service)
            .field("address", &self.address)
            .field("weight", &self.weight)
            .field("health", &self.health())
            .field("breaker", &self.breaker.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl ServiceInstance {
    pub fn new(service: &str, address: &str, weight: u32, breaker: CircuitBreaker) -> Self {
        Self {
            service: service.to_string(),
            address: address.to_string(),
            weight: weight.max(1),
            health: Mutex::new(HealthSnapshot {
                status: HealthStatus::Healthy,
                consecutive_failures: 0,
                last_checked: None,
                latency: None,
            }),
            breaker: Arc::new(breaker),
            in_flight: AtomicUsize::new(0),
            invocations: AtomicU64::new(0),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn health(&self) -> HealthSnapshot {
        self.health.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.health.lock().unwrap_or_else(|e| e.into_inner()).status == HealthStatus::Healthy
    }

    /// 健康且熔断器可准入
    pub fn is_eligible(&self) -> bool {
        self.is_healthy() && self.breaker.is_eligible()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// 实际发往该实例的调用总数 (被熔断拒绝的不计)
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// 登记一次在途调用
    pub fn begin_call(self: &Arc<Self>) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        self.invocations.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            instance: Arc::clone(self),
        }
    }

    /// # Summary
    /// 记录一次探测结果。
    ///
    /// # Logic
    /// 1. 成功：清零失败计数，状态置为健康，记录耗时。
    /// 2. 失败：累加失败计数，达到阈值置为不健康。
    ///
    /// # Returns
    /// 状态发生翻转时返回新状态。
    pub(crate) fn record_probe(
        &self,
        outcome: Result<Duration, ()>,
        failure_threshold: u32,
        now: DateTime<Utc>,
    ) -> Option<HealthStatus> {
        let mut health = self.health.lock().unwrap_or_else(|e| e.into_inner());
        let before = health.status;
        health.last_checked = Some(now);
        match outcome {
            Ok(latency) => {
                health.consecutive_failures = 0;
                health.latency = Some(latency);
                health.status = HealthStatus::Healthy;
            }
            Err(()) => {
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                if health.consecutive_failures >= failure_threshold.max(1) {
                    health.status = HealthStatus::Unhealthy;
                }
            }
        }
        (health.status != before).then_some(health.status)
    }
}

/// 在途调用守卫，Drop 时归还计数
pub struct InFlightGuard {
    instance: Arc<ServiceInstance>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.instance.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 策略在两次选择之间保留的状态
#[derive(Debug, Default)]
pub struct SelectionState {
    // 下一次扫描的起始位置
    pub cursor: usize,
    // 平滑加权轮询的当前分值，按实例地址索引
    pub scores: HashMap<String, i64>,
}

/// 单个逻辑服务的实例组
pub(crate) struct ServiceGroup {
    pub(crate) instances: RwLock<Vec<Arc<ServiceInstance>>>,
    pub(crate) selection: Mutex<SelectionState>,
}

impl ServiceGroup {
    fn new() -> Self {
        Self {
            instances: RwLock::new(Vec::new()),
            selection: Mutex::new(SelectionState::default()),
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<ServiceInstance>> {
        self.instances.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// # Summary
/// 进程级服务注册表：逻辑服务名 -> 有序实例组。
///
/// # Invariants
/// - 每个服务一把读写锁与一把选择锁，不存在跨服务的全局锁。
/// - 同一服务内地址唯一；注册顺序即轮询顺序。
/// - 探测失败不会移除实例，增删只通过 `register`/`deregister`/`apply`。
pub struct ServiceRegistry {
    groups: DashMap<String, Arc<ServiceGroup>>,
    breaker: BreakerConfig,
    clock: Arc<dyn TimeProvider>,
}

impl ServiceRegistry {
    pub fn new(breaker: BreakerConfig, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            groups: DashMap::new(),
            breaker,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn TimeProvider> {
        &self.clock
    }

    pub(crate) fn group(&self, service: &str) -> Option<Arc<ServiceGroup>> {
        self.groups.get(service).map(|g| g.value().clone())
    }

    /// # Summary
    /// 注册实例；同地址已存在时返回现有实例，保留其状态。
    pub fn register(&self, service: &str, address: &str, weight: u32) -> Arc<ServiceInstance> {
        let group = self
            .groups
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(ServiceGroup::new()))
            .clone();
        let mut instances = group.instances.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = instances.iter().find(|i| i.address() == address) {
            return existing.clone();
        }
        let breaker = CircuitBreaker::new(&self.breaker, self.clock.clone());
        let instance = Arc::new(ServiceInstance::new(service, address, weight, breaker));
        instances.push(instance.clone());
        info!(service, instance = address, weight, "Instance registered");
        instance
    }

    /// 移除实例，返回是否存在
    pub fn deregister(&self, service: &str, address: &str) -> bool {
        let Some(group) = self.group(service) else {
            return false;
        };
        let removed = {
            let mut instances = group.instances.write().unwrap_or_else(|e| e.into_inner());
            let before = instances.len();
            instances.retain(|i| i.address() != address);
            instances.len() != before
        };
        if removed {
            let mut selection = group.selection.lock().unwrap_or_else(|e| e.into_inner());
            selection.scores.remove(address);
            info!(service, instance = address, "Instance deregistered");
        }
        removed
    }

    /// # Summary
    /// 应用一次完整的拓扑配置。
    ///
    /// # Logic
    /// 1. 配置中不再出现的服务整体移除。
    /// 2. 每个服务内：移除消失的地址，按配置顺序注册新地址，保留既有实例的健康与熔断状态。
    pub fn apply(&self, services: &BTreeMap<String, Vec<InstanceConfig>>) {
        let stale: Vec<String> = self
            .groups
            .iter()
            .map(|g| g.key().clone())
            .filter(|name| !services.contains_key(name))
            .collect();
        for name in stale {
            self.groups.remove(&name);
            info!(service = %name, "Service removed from registry");
        }

        for (service, wanted) in services {
            for existing in self.instances(service) {
                if !wanted.iter().any(|w| w.address == existing.address()) {
                    self.deregister(service, existing.address());
                }
            }
            for instance in wanted {
                self.register(service, &instance.address, instance.weight);
            }
        }
    }

    /// 服务下所有实例 (注册顺序)
    pub fn instances(&self, service: &str) -> Vec<Arc<ServiceInstance>> {
        self.group(service).map(|g| g.snapshot()).unwrap_or_default()
    }

    pub fn instance(&self, service: &str, address: &str) -> Option<Arc<ServiceInstance>> {
        self.instances(service).into_iter().find(|i| i.address() == address)
    }

    /// 已注册的服务名 (升序)
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.groups.iter().map(|g| g.key().clone()).collect();
        names.sort();
        names
    }

    pub fn all_instances(&self) -> Vec<Arc<ServiceInstance>> {
        self.services()
            .iter()
            .flat_map(|s| self.instances(s))
            .collect()
    }
}
