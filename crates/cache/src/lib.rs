//! # `fullon-cache` - 进程内缓存
//!
//! - [`mem::MemCache`]：基于 DashMap + 广播通道的 `CacheStore` 实现。
//! - [`backend::CacheBackend`]：把任意 `CacheStore` 适配为网关可调度的 `Backend`。

pub mod backend;
pub mod mem;
