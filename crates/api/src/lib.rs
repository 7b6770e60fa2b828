//! # `fullon-api` - 网关接入层
//!
//! 本 crate 是 Fullon 编排网关的对外入口。
//! 使用 `axum` 承载 WebSocket 与 HTTP 接口，通过 `utoipa` 自动生成 OpenAPI 3.0 文档。
//!
//! ## 架构职责
//! - 握手阶段执行 JWT 鉴权，之后每条连接由 `ConnectionManager` 驱动
//! - 按操作名分发请求：一元操作得到一条应答，流式操作建立订阅并持续推送
//! - 经 `ServiceClient` 完成选实例、熔断保护、截止时间与重试
//! - `/proxy` 原样转发 HTTP 请求到负载均衡选出的实例

pub mod connection;
pub mod error;
pub mod middleware;
pub mod operations;
pub mod protocol;
pub mod router;
pub mod routes;
pub mod server;
pub mod stream;
pub mod types;
