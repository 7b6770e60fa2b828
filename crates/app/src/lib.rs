//! # `fullon-app` - 网关装配
//!
//! 纯粹的 DI 容器：读取分层配置、初始化日志、实例化所有具体实现并注入接入层。

pub mod bootstrap;
pub mod logging;
pub mod settings;
