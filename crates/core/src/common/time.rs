use chrono::{DateTime, Utc};
use std::sync::RwLock;
use std::time::Duration;

/// # Summary
/// 时间供给器接口，用于劫持和隔离物理系统时钟。
/// 熔断器的开启计时、限流窗口都必须通过此接口获取当前时间。
pub trait TimeProvider: Send + Sync {
    /// 获取当前挂载的时间
    fn now(&self) -> DateTime<Utc>;

    /// # Summary
    /// 计算自某一时刻以来经过的时长。
    ///
    /// # Logic
    /// 1. 用当前时间减去起点。
    /// 2. 若时钟回拨导致差值为负，按零处理。
    ///
    /// # Arguments
    /// * `since`: 起点时间。
    ///
    /// # Returns
    /// 非负的标准库时长。
    fn elapsed_since(&self, since: DateTime<Utc>) -> Duration {
        (self.now() - since).to_std().unwrap_or(Duration::ZERO)
    }
}

/// # Summary
/// 针对实际运行的真实时钟，直接返回操作系统当前时间。
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// # Summary
/// 测试专用虚拟时钟，允许主动拨快或回退时间。
///
/// # Invariants
/// - 并发安全：内部利用 `RwLock` 提供给多线程安全修改和读取时间的权限。
pub struct FakeClockProvider {
    current_time: RwLock<DateTime<Utc>>,
}

impl FakeClockProvider {
    /// 使用指定的初始时间创建虚拟时钟
    pub fn new(initial_time: DateTime<Utc>) -> Self {
        Self {
            current_time: RwLock::new(initial_time),
        }
    }

    /// 强制修改时钟的当前时间
    pub fn set_time(&self, new_time: DateTime<Utc>) {
        let mut time = self.current_time.write().unwrap_or_else(|e| e.into_inner());
        *time = new_time;
    }

    /// 将时钟向前拨动指定时长
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut time = self.current_time.write().unwrap_or_else(|e| e.into_inner());
        *time = time.checked_add_signed(delta).unwrap_or(*time);
    }
}

impl TimeProvider for FakeClockProvider {
    fn now(&self) -> DateTime<Utc> {
        *self.current_time.read().unwrap_or_else(|e| e.into_inner())
    }
}
