use fullon_api::connection::ConnectionSettings;
use fullon_api::middleware::auth::JwtAuthenticator;
use fullon_api::middleware::rate_limit::RateLimiter;
use fullon_api::operations::catalog_router;
use fullon_api::server::AppState;
use fullon_balancer::balancer::LoadBalancer;
use fullon_balancer::client::ServiceClient;
use fullon_balancer::health::HealthChecker;
use fullon_balancer::invoker::Invoker;
use fullon_balancer::registry::ServiceRegistry;
use fullon_cache::backend::CacheBackend;
use fullon_cache::mem::MemCache;
use fullon_core::auth::error::AuthError;
use fullon_core::backend::error::BackendError;
use fullon_core::backend::port::Backend;
use fullon_core::common::time::{RealTimeProvider, TimeProvider};
use fullon_core::config::AppConfig;
use fullon_upstream::http::HttpBackend;
use fullon_upstream::mux::BackendMux;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// 默认缓存实例地址
pub const CACHE_ADDRESS: &str = "mem://cache-0";
/// K 线缓存实例地址
pub const OHLCV_ADDRESS: &str = "mem://ohlcv-0";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("authenticator setup failed: {0}")]
    Auth(#[from] AuthError),
    #[error("backend setup failed: {0}")]
    Backend(#[from] BackendError),
}

/// 组装完成的网关
pub struct Gateway {
    pub state: AppState,
    pub health: Arc<HealthChecker>,
    /// 进程内缓存，供同进程的写入方发布行情
    pub cache: Arc<MemCache>,
    pub ohlcv: Arc<MemCache>,
}

/// # Summary
/// 按配置实例化所有具体实现并注入接入层。
///
/// # Logic
/// 1. 基础设施：进程内缓存 (`mem://`) 与 HTTP 上游 (`http://`) 按地址 scheme 复用为一个后端。
/// 2. 服务注册表按配置拓扑登记实例，未配置时使用内置缓存拓扑。
/// 3. 负载均衡、调用器与服务客户端串起一次逻辑调用。
/// 4. 操作目录、鉴权、限流构成共享状态。
///
/// # Returns
/// 鉴权算法或 HTTP 客户端配置非法时返回 `BootstrapError`。
pub fn assemble(config: &AppConfig, shutdown: CancellationToken) -> Result<Gateway, BootstrapError> {
    let clock: Arc<dyn TimeProvider> = Arc::new(RealTimeProvider);

    let cache = Arc::new(MemCache::new());
    let ohlcv = Arc::new(MemCache::new());
    let cache_backend = CacheBackend::new(cache.clone());
    cache_backend.mount(OHLCV_ADDRESS, ohlcv.clone());

    let http = HttpBackend::new(config.proxy.upstream_token.clone())?;
    let backend: Arc<dyn Backend> = Arc::new(
        BackendMux::new()
            .route("mem", Arc::new(cache_backend))
            .route("http", Arc::new(http)),
    );

    let registry = Arc::new(ServiceRegistry::new(config.breaker.clone(), clock.clone()));
    registry.apply(&config.effective_services());
    for service in registry.services() {
        tracing::info!(
            service = %service,
            instances = registry.instances(&service).len(),
            "Service registered"
        );
    }

    let balancer = Arc::new(LoadBalancer::with_strategy(registry.clone(), config.balancer.strategy));
    let invoker = Arc::new(Invoker::new(backend.clone(), config.proxy.deadline()));
    let client = Arc::new(ServiceClient::new(balancer, invoker, config.balancer.max_attempts));

    let state = AppState {
        router: Arc::new(catalog_router(client.clone())),
        client,
        authenticator: Arc::new(JwtAuthenticator::new(&config.auth, clock.clone())?),
        rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit, clock)),
        connection: ConnectionSettings::from(&config.server),
        shutdown,
    };
    let health = Arc::new(HealthChecker::new(registry, backend, config.health.clone()));

    Ok(Gateway {
        state,
        health,
        cache,
        ohlcv,
    })
}
