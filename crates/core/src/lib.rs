//! # `fullon-core` - 网关领域内核
//!
//! 只包含契约 (Port)、实体与错误定义，不依赖任何具体实现。
//! 其余 crate 通过 `Arc<dyn Trait>` 注入实现，编译期只面向本 crate。

pub mod auth;
pub mod backend;
pub mod cache;
pub mod common;
pub mod config;

#[cfg(feature = "test-utils")]
pub mod testing;
