use crate::registry::{SelectionState, ServiceInstance};
use fullon_core::config::BalanceStrategy;
use std::sync::Arc;

/// # Summary
/// 可插拔的实例选择策略。
///
/// # Invariants
/// - 只能返回 `eligible[i] == true` 的下标。
/// - 结果只依赖入参与 `state`，相同输入总是得到相同选择。
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// # Arguments
    /// * `instances`: 服务下全部实例，注册顺序。
    /// * `eligible`: 与 `instances` 等长的可选标记。
    /// * `state`: 该服务的选择状态，调用方持锁。
    ///
    /// # Returns
    /// 选中实例的下标，无可选实例时返回 None。
    fn select(&self, instances: &[Arc<ServiceInstance>], eligible: &[bool], state: &mut SelectionState) -> Option<usize>;
}

/// 按配置构造策略
pub fn strategy_for(kind: BalanceStrategy) -> Arc<dyn Strategy> {
    match kind {
        BalanceStrategy::RoundRobin => Arc::new(RoundRobin),
        BalanceStrategy::LeastConnections => Arc::new(LeastConnections),
        BalanceStrategy::Weighted => Arc::new(Weighted),
    }
}

/// 从游标开始按注册顺序扫描的下标序列
fn scan_order(len: usize, cursor: usize) -> impl Iterator<Item = usize> {
    (0..len).map(move |step| (cursor + step) % len)
}

/// # Summary
/// 轮询：从游标处扫描，取第一个可选实例，游标移到其后一位。
/// 跳过不可选实例不会重置其他实例的轮转位置。
pub struct RoundRobin;

impl Strategy for RoundRobin {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select(&self, instances: &[Arc<ServiceInstance>], eligible: &[bool], state: &mut SelectionState) -> Option<usize> {
        let len = instances.len();
        if len == 0 {
            return None;
        }
        let picked = scan_order(len, state.cursor).find(|&i| eligible.get(i).copied().unwrap_or(false))?;
        state.cursor = (picked + 1) % len;
        Some(picked)
    }
}

/// # Summary
/// 最少连接：取在途调用数最小的可选实例。
/// 平局时取从游标开始扫描遇到的第一个，游标随后移过它。
pub struct LeastConnections;

impl Strategy for LeastConnections {
    fn name(&self) -> &'static str {
        "least_connections"
    }

    fn select(&self, instances: &[Arc<ServiceInstance>], eligible: &[bool], state: &mut SelectionState) -> Option<usize> {
        let len = instances.len();
        if len == 0 {
            return None;
        }
        let mut best: Option<(usize, usize)> = None;
        for i in scan_order(len, state.cursor) {
            if !eligible.get(i).copied().unwrap_or(false) {
                continue;
            }
            let load = instances[i].in_flight();
            // 严格小于，保证平局时先扫描到的胜出
            if best.is_none_or(|(_, min)| load < min) {
                best = Some((i, load));
            }
        }
        let (picked, _) = best?;
        state.cursor = (picked + 1) % len;
        Some(picked)
    }
}

/// # Summary
/// 平滑加权轮询 (nginx 算法)。
///
/// # Logic
/// 1. 每个可选实例的分值加上自身权重，同时累计总权重。
/// 2. 分值最高者胜出，平局取注册顺序靠前者。
/// 3. 胜出者分值减去总权重。
pub struct Weighted;

impl Strategy for Weighted {
    fn name(&self) -> &'static str {
        "weighted"
    }

    fn select(&self, instances: &[Arc<ServiceInstance>], eligible: &[bool], state: &mut SelectionState) -> Option<usize> {
        let mut total: i64 = 0;
        let mut best: Option<(usize, i64)> = None;
        for (i, instance) in instances.iter().enumerate() {
            if !eligible.get(i).copied().unwrap_or(false) {
                continue;
            }
            let weight = i64::from(instance.weight());
            total += weight;
            let score = state.scores.entry(instance.address().to_string()).or_insert(0);
            *score += weight;
            if best.is_none_or(|(_, top)| *score > top) {
                best = Some((i, *score));
            }
        }
        let (picked, _) = best?;
        if let Some(score) = state.scores.get_mut(instances[picked].address()) {
            *score -= total;
        }
        Some(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreaker;
    use fullon_core::common::time::RealTimeProvider;
    use std::time::Duration;

    fn instance(address: &str, weight: u32) -> Arc<ServiceInstance> {
        let breaker = CircuitBreaker::with_settings(5, Duration::from_secs(30), Arc::new(RealTimeProvider));
        Arc::new(ServiceInstance::new("svc", address, weight, breaker))
    }

    fn picks(strategy: &dyn Strategy, instances: &[Arc<ServiceInstance>], eligible: &[bool], n: usize) -> Vec<String> {
        let mut state = SelectionState::default();
        (0..n)
            .filter_map(|_| strategy.select(instances, eligible, &mut state))
            .map(|i| instances[i].address().to_string())
            .collect()
    }

    #[test]
    fn test_round_robin_skips_ineligible_without_reset() {
        let list = vec![instance("a", 1), instance("b", 1), instance("c", 1)];
        let seq = picks(&RoundRobin, &list, &[true, false, true], 4);
        assert_eq!(seq, vec!["a", "c", "a", "c"]);
    }

    #[test]
    fn test_least_connections_prefers_idle_instance() {
        let list = vec![instance("a", 1), instance("b", 1), instance("c", 1)];
        let _busy_a = list[0].begin_call();
        let _busy_b = list[1].begin_call();
        let mut state = SelectionState::default();
        let picked = LeastConnections.select(&list, &[true, true, true], &mut state);
        assert_eq!(picked, Some(2));
    }

    #[test]
    fn test_least_connections_ties_follow_cursor() {
        let list = vec![instance("a", 1), instance("b", 1), instance("c", 1)];
        let seq = picks(&LeastConnections, &list, &[true, true, true], 4);
        assert_eq!(seq, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn test_weighted_smooth_sequence() {
        let list = vec![instance("a", 5), instance("b", 1), instance("c", 1)];
        let seq = picks(&Weighted, &list, &[true, true, true], 7);
        assert_eq!(seq, vec!["a", "a", "b", "a", "c", "a", "a"]);
    }

    #[test]
    fn test_no_eligible_instance() {
        let list = vec![instance("a", 1)];
        let mut state = SelectionState::default();
        assert_eq!(RoundRobin.select(&list, &[false], &mut state), None);
        assert_eq!(Weighted.select(&list, &[false], &mut state), None);
        assert_eq!(LeastConnections.select(&[], &[], &mut state), None);
    }
}
