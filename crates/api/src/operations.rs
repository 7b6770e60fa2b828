//! # 操作目录
//!
//! 网关对外开放的全部操作：本地的 `ping`/`health_check`，
//! 以及转发给 `cache`、`ohlcv` 服务的读取与订阅操作。

use async_trait::async_trait;
use chrono::Utc;
use fullon_balancer::client::ServiceClient;
use fullon_balancer::registry::ServiceRegistry;
use fullon_core::auth::entity::Identity;
use fullon_core::backend::entity::{BackendCall, PayloadStream};
use fullon_core::common::{Params, missing_params};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

use crate::error::GatewayError;
use crate::router::{RequestRouter, RouterBuilder, StreamHandler, UnaryHandler};
use crate::types::HealthReport;

/// 转发到哪个逻辑服务
const CACHE: &str = "cache";
const OHLCV: &str = "ohlcv";

/// 目录中的一项：操作名、所属服务、是否流式、必填参数
struct Entry {
    operation: &'static str,
    service: &'static str,
    streaming: bool,
    required: &'static [&'static str],
}

const fn unary(operation: &'static str, service: &'static str, required: &'static [&'static str]) -> Entry {
    Entry {
        operation,
        service,
        streaming: false,
        required,
    }
}

const fn streaming(operation: &'static str, service: &'static str, required: &'static [&'static str]) -> Entry {
    Entry {
        operation,
        service,
        streaming: true,
        required,
    }
}

// 队列长度与封禁状态是一次性读取，不提供订阅形式
const CATALOG: &[Entry] = &[
    unary("get_ticker", CACHE, &["exchange", "symbol"]),
    unary("get_all_tickers", CACHE, &["exchange"]),
    streaming("stream_tickers", CACHE, &["exchange"]),
    unary("get_user_positions", CACHE, &["user_id"]),
    unary("get_user_balances", CACHE, &["user_id"]),
    unary("get_account_status", CACHE, &["user_id"]),
    streaming("stream_user_positions", CACHE, &["user_id"]),
    streaming("stream_user_balances", CACHE, &["user_id"]),
    unary("get_order_status", CACHE, &["exchange", "order_id"]),
    unary("get_queue_length", CACHE, &["exchange"]),
    streaming("stream_order_queue", CACHE, &["exchange"]),
    unary("is_blocked", CACHE, &["exchange", "symbol"]),
    unary("get_bots", CACHE, &[]),
    streaming("stream_bot_status", CACHE, &[]),
    unary("get_trades", CACHE, &["exchange", "symbol"]),
    unary("get_trade_status", CACHE, &["trade_id"]),
    streaming("stream_trade_updates", CACHE, &["exchange"]),
    unary("get_latest_ohlcv_bars", OHLCV, &["symbol", "timeframe"]),
    streaming("stream_ohlcv_updates", OHLCV, &["symbol", "timeframe"]),
    unary("get_active_processes", CACHE, &[]),
    unary("get_system_health", CACHE, &[]),
    streaming("stream_process_health", CACHE, &[]),
];

/// # Summary
/// 转发给某个逻辑服务的操作。
///
/// # Invariants
/// - 必填参数在网关侧校验，缺失时返回 `INVALID_PARAMS` 且不触达后端。
pub struct ProxyOperation {
    service: &'static str,
    operation: &'static str,
    required: &'static [&'static str],
    client: Arc<ServiceClient>,
}

impl ProxyOperation {
    fn backend_call(&self, params: &Params) -> Result<BackendCall, GatewayError> {
        let missing = missing_params(params, self.required);
        if !missing.is_empty() {
            return Err(GatewayError::invalid_params(&missing));
        }
        Ok(BackendCall::new(self.operation, params.clone()))
    }
}

#[async_trait]
impl UnaryHandler for ProxyOperation {
    async fn call(&self, params: &Params, identity: &Identity) -> Result<Value, GatewayError> {
        let call = self.backend_call(params)?;
        debug!(service = self.service, operation = self.operation, subject = %identity.subject, "Proxying unary operation");
        Ok(self.client.call(self.service, &call).await?)
    }
}

#[async_trait]
impl StreamHandler for ProxyOperation {
    async fn open(&self, params: &Params, identity: &Identity) -> Result<PayloadStream, GatewayError> {
        let call = self.backend_call(params)?;
        debug!(service = self.service, operation = self.operation, subject = %identity.subject, "Opening proxied stream");
        Ok(self.client.subscribe(self.service, &call).await?)
    }
}

/// 存活探测，不访问任何后端
pub struct Ping;

#[async_trait]
impl UnaryHandler for Ping {
    async fn call(&self, _params: &Params, _identity: &Identity) -> Result<Value, GatewayError> {
        Ok(json!({"status": "ok", "timestamp": Utc::now()}))
    }
}

/// 返回注册表当前的健康快照
pub struct HealthCheck {
    registry: Arc<ServiceRegistry>,
}

impl HealthCheck {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl UnaryHandler for HealthCheck {
    async fn call(&self, _params: &Params, _identity: &Identity) -> Result<Value, GatewayError> {
        let report = HealthReport::from_registry(&self.registry);
        serde_json::to_value(report).map_err(|e| GatewayError::internal(format!("health report encoding: {}", e)))
    }
}

/// # Summary
/// 把完整操作目录登记到构建器。
///
/// # Arguments
/// * `builder`: 路由构建器，可能已带有其他操作。
/// * `client`: 带负载均衡与重试的服务客户端。
///
/// # Returns
/// 登记完成的构建器。
pub fn register_catalog(builder: RouterBuilder, client: Arc<ServiceClient>) -> RouterBuilder {
    let registry = client.balancer().registry().clone();
    let builder = builder
        .unary("ping", Arc::new(Ping))
        .unary("health_check", Arc::new(HealthCheck::new(registry)));

    CATALOG.iter().fold(builder, |builder, entry| {
        let operation = Arc::new(ProxyOperation {
            service: entry.service,
            operation: entry.operation,
            required: entry.required,
            client: client.clone(),
        });
        if entry.streaming {
            builder.streaming(entry.operation, operation)
        } else {
            builder.unary(entry.operation, operation)
        }
    })
}

/// 仅包含目录操作的路由表
pub fn catalog_router(client: Arc<ServiceClient>) -> RequestRouter {
    register_catalog(RequestRouter::builder(), client).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use crate::router::Handler;
    use fullon_balancer::balancer::LoadBalancer;
    use fullon_balancer::invoker::Invoker;
    use fullon_core::common::time::RealTimeProvider;
    use fullon_core::config::{BalanceStrategy, BreakerConfig};
    use fullon_core::testing::{Script, ScriptedBackend};
    use std::time::Duration;

    fn client(backend: Arc<ScriptedBackend>) -> Arc<ServiceClient> {
        let registry = Arc::new(ServiceRegistry::new(BreakerConfig::default(), Arc::new(RealTimeProvider)));
        registry.register(CACHE, "mem://cache-0", 1);
        let balancer = Arc::new(LoadBalancer::with_strategy(registry, BalanceStrategy::RoundRobin));
        let invoker = Arc::new(Invoker::new(backend, Duration::from_secs(1)));
        Arc::new(ServiceClient::new(balancer, invoker, 2))
    }

    #[test]
    fn test_catalog_kinds() {
        let router = catalog_router(client(Arc::new(ScriptedBackend::new())));
        assert_eq!(router.operations().len(), CATALOG.len() + 2);
        assert!(router.handler("stream_tickers").unwrap().is_streaming());
        assert!(!router.handler("get_queue_length").unwrap().is_streaming());
        assert!(!router.handler("is_blocked").unwrap().is_streaming());
        assert!(router.handler("cancel").is_none());
        assert!(router.handler("get_bot_status").is_none());
    }

    #[tokio::test]
    async fn test_missing_params_never_reach_backend() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script("mem://cache-0", Script::Reply(json!({"bid": 1})));
        let router = catalog_router(client(backend.clone()));
        let Some(Handler::Unary(handler)) = router.handler("get_ticker") else {
            unreachable!("get_ticker is unary");
        };

        let mut params = Params::new();
        params.insert("exchange".into(), json!("binance"));
        let err = handler.call(&params, &Identity::new("u")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert_eq!(err.message, "Missing required parameters: symbol");
        assert_eq!(backend.invocations("mem://cache-0"), 0);

        params.insert("symbol".into(), json!("BTC/USDT"));
        assert_eq!(handler.call(&params, &Identity::new("u")).await.unwrap(), json!({"bid": 1}));
        let recorded = backend.recorded();
        assert_eq!(recorded[0].1.operation, "get_ticker");
        assert_eq!(recorded[0].1.params["symbol"], "BTC/USDT");
    }

    #[tokio::test]
    async fn test_numeric_ids_pass_through_unchanged() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.script("mem://cache-0", Script::Reply(json!([{"currency": "USDT", "free": 10}])));
        let router = catalog_router(client(backend.clone()));
        let Some(Handler::Unary(handler)) = router.handler("get_user_balances") else {
            unreachable!("get_user_balances is unary");
        };

        let params = json!({"user_id": 123, "currency": "USDT"}).as_object().unwrap().clone();
        let result = handler.call(&params, &Identity::new("u")).await.unwrap();
        assert_eq!(result[0]["free"], 10);
        assert_eq!(backend.invocations("mem://cache-0"), 1);
        assert_eq!(backend.recorded()[0].1.params["user_id"], 123);

        let null_id = json!({"user_id": null}).as_object().unwrap().clone();
        let err = handler.call(&null_id, &Identity::new("u")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams);
        assert_eq!(backend.invocations("mem://cache-0"), 1);
    }

    #[tokio::test]
    async fn test_health_check_reports_registry() {
        let router = catalog_router(client(Arc::new(ScriptedBackend::new())));
        let Some(Handler::Unary(handler)) = router.handler("health_check") else {
            unreachable!("health_check is unary");
        };
        let report = handler.call(&Params::new(), &Identity::new("u")).await.unwrap();
        assert_eq!(report["cache"]["status"], "healthy");
        assert_eq!(report["cache"]["instances"][0]["address"], "mem://cache-0");
    }
}
