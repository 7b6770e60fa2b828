//! # `fullon-balancer` - 实例选择与故障隔离
//!
//! 调用链：`ServiceClient` (重试) -> `LoadBalancer` (选实例) -> `Invoker`
//! (熔断许可 + 在途计数 + 截止时间) -> `Backend`。
//! `HealthChecker` 在后台独立探测，是实例健康状态的唯一写入方。

pub mod balancer;
pub mod breaker;
pub mod client;
pub mod error;
pub mod health;
pub mod invoker;
pub mod registry;
pub mod strategy;
