use crate::error::BreakerRejected;
use chrono::{DateTime, Utc};
use fullon_core::common::time::TimeProvider;
use fullon_core::config::BreakerConfig;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    // 半开状态下是否已有试探调用在途
    trial_in_flight: bool,
}

/// # Summary
/// 单个实例的调用级熔断器。
///
/// # Logic
/// - `Closed`：放行；连续失败达到阈值转 `Open` 并记录开启时间，成功清零计数。
/// - `Open`：直接拒绝；开启时长达到 `timeout` 后，下一次准入转为 `HalfOpen` 并作为试探调用放行。
/// - `HalfOpen`：同一时刻只允许一个试探调用；成功转 `Closed`，失败重新 `Open` 并刷新开启时间。
///
/// # Invariants
/// - 状态只在 `Mutex` 临界区内变更，临界区内不做任何 I/O。
/// - 所有时间读取都经过注入的 `TimeProvider`。
pub struct CircuitBreaker {
    failure_threshold: u32,
    open_timeout: Duration,
    clock: Arc<dyn TimeProvider>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: &BreakerConfig, clock: Arc<dyn TimeProvider>) -> Self {
        Self::with_settings(config.failure_threshold, config.open_timeout(), clock)
    }

    pub fn with_settings(failure_threshold: u32, open_timeout: Duration, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            open_timeout,
            clock,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open_elapsed(&self, inner: &BreakerInner) -> bool {
        match inner.opened_at {
            Some(at) => self.clock.elapsed_since(at) >= self.open_timeout,
            None => true,
        }
    }

    /// 当前记录的状态 (超时到期但尚未有调用准入时仍报告 `Open`)
    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// # Summary
    /// 只读判断此刻是否可能被准入，供负载均衡器筛选候选实例。
    ///
    /// # Returns
    /// `Closed`、超时已到的 `Open`、无试探在途的 `HalfOpen` 返回 true。
    pub fn is_eligible(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => self.open_elapsed(&inner),
            BreakerState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// # Summary
    /// 申请一次调用准入。
    ///
    /// # Logic
    /// 1. `Closed` 直接发放普通许可。
    /// 2. `Open` 且超时已到：转 `HalfOpen`，发放试探许可。
    /// 3. `HalfOpen` 且无试探在途：发放试探许可。
    /// 4. 其余情况拒绝。
    ///
    /// # Returns
    /// 许可必须以 `success`/`failure` 结算；未结算即被丢弃的试探许可只归还名额，不计结果。
    pub fn try_acquire(self: &Arc<Self>) -> Result<BreakerPermit, BreakerRejected> {
        let mut inner = self.lock();
        let trial = match inner.state {
            BreakerState::Closed => false,
            BreakerState::Open => {
                if !self.open_elapsed(&inner) {
                    return Err(BreakerRejected);
                }
                inner.state = BreakerState::HalfOpen;
                info!("Circuit breaker half-open, admitting trial call");
                true
            }
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(BreakerRejected);
                }
                true
            }
        };
        if trial {
            inner.trial_in_flight = true;
        }
        Ok(BreakerPermit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        })
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => inner.consecutive_failures = 0,
            BreakerState::HalfOpen if trial => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!("Circuit breaker closed after successful trial");
            }
            // 熔断开启前发出的普通调用迟到的结果不影响状态
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = self.clock.now();
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    warn!(failures = inner.consecutive_failures, "Circuit breaker opened");
                }
            }
            BreakerState::HalfOpen if trial => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
                warn!("Circuit breaker reopened after failed trial");
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

/// # Summary
/// 熔断准入许可 (RAII)。
///
/// # Invariants
/// - 每个许可最多结算一次。
/// - 试探许可在 Drop 时若未结算，归还试探名额。
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    trial: bool,
    settled: bool,
}

impl BreakerPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial();
        }
    }
}
