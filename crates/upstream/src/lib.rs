//! # `fullon-upstream` - 网络后端适配
//!
//! 实例地址的 scheme 决定传输方式：
//! - `http://` 由 [`http::HttpBackend`] 处理 (一元调用、探测、HTTP 转发、WebSocket 流)。
//! - 其他 scheme 通过 [`mux::BackendMux`] 路由到对应的 `Backend` 实现。

pub mod http;
pub mod mux;
mod stream;
