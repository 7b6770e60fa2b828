//! # API 服务启动器
//!
//! 组装 axum 路由、挂载 Swagger UI、配置 CORS 并绑定 TCP 端口对外提供服务。
//! 本模块不直接启动 `main()`, 而是由 `crates/app` 组装依赖后调用。

use std::sync::Arc;

use axum::Router;
use axum::routing::any;
use fullon_balancer::client::ServiceClient;
use fullon_balancer::registry::ServiceRegistry;
use fullon_core::auth::port::Authenticator;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;
use utoipa_swagger_ui::SwaggerUi;

use crate::connection::ConnectionSettings;
use crate::middleware::rate_limit::RateLimiter;
use crate::router::RequestRouter;
use crate::routes::{health, ops, proxy, ws};

// ============================================================
//  共享应用状态
// ============================================================

/// 全局应用状态，通过 axum 的 `State` 提取器注入到每个 Handler 中。
///
/// # Invariants
/// - 全部字段在服务启动前组装完毕，路由表此后只读。
/// - `shutdown` 被取消后，所有 WebSocket 会话随之拆除。
#[derive(Clone)]
pub struct AppState {
    /// 操作分发表
    pub router: Arc<RequestRouter>,
    /// 带负载均衡、熔断与重试的服务客户端
    pub client: Arc<ServiceClient>,
    /// 凭证校验
    pub authenticator: Arc<dyn Authenticator>,
    /// 按主体限流
    pub rate_limiter: Arc<RateLimiter>,
    /// 单连接运行参数
    pub connection: ConnectionSettings,
    /// 服务级关闭信号
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        self.client.balancer().registry()
    }
}

// ============================================================
//  OpenAPI 文档定义
// ============================================================

/// 全局 OpenAPI 文档结构
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Fullon 编排网关 API",
        version = "0.1.0",
        description = "Fullon 编排网关：WebSocket 请求/订阅协议、HTTP 操作调用与服务代理。",
        contact(name = "Fullon Team"),
        license(name = "MIT")
    ),
    tags(
        (name = "健康 (Health)", description = "服务与实例的健康视图"),
        (name = "会话 (Session)", description = "WebSocket 请求与订阅"),
        (name = "操作 (Operations)", description = "通过 HTTP 调用一元操作")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

/// 为 OpenAPI 文档注入全局 Bearer JWT 鉴权方案。
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);

        components.add_security_scheme(
            "bearer_jwt",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .description(Some("在此处填入 JWT Token（无需 'Bearer ' 前缀）"))
                    .build(),
            ),
        );
    }
}

// ============================================================
//  服务构建与启动
// ============================================================

/// # Summary
/// 构建完整的 axum 应用路由树。
///
/// # Logic
/// 1. `/health` 公开。
/// 2. `/ws` 只需鉴权，会话内逐请求限流。
/// 3. `/ops` 与 `/proxy` 先鉴权再按请求限流。
pub fn build_router(state: AppState) -> Router {
    let public_router = OpenApiRouter::new().routes(routes!(health::get_health));

    let session_router = OpenApiRouter::new()
        .routes(routes!(ws::connect))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    let limited_router = OpenApiRouter::new()
        .routes(routes!(ops::invoke_operation))
        .route("/proxy/{service}/{*path}", any(proxy::forward))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::auth_middleware,
        ));

    let (router, api) = OpenApiRouter::with_openapi(ApiDoc::openapi())
        .merge(public_router)
        .merge(session_router)
        .merge(limited_router)
        .with_state(state)
        .split_for_parts();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", api))
        .layer(cors)
}

/// 周期清理过期的限流窗口，直到服务关闭
fn spawn_maintenance(state: &AppState) {
    let limiter = state.rate_limiter.clone();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => limiter.purge_expired(),
            }
        }
    });
}

/// # Summary
/// 在已绑定的监听器上提供服务，`state.shutdown` 取消后优雅退出。
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    spawn_maintenance(&state);
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// 绑定地址并启动 HTTP 监听。
///
/// # Arguments
/// * `state` - 由外部组装的共享状态
/// * `bind_addr` - 监听的地址与端口，如 `"0.0.0.0:8080"`
pub async fn start_server(state: AppState, bind_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!("Fullon gateway listening on {}", listener.local_addr()?);
    tracing::info!("Swagger UI: http://{}/swagger-ui/", bind_addr);
    serve(listener, state).await?;
    tracing::info!("Fullon gateway stopped");
    Ok(())
}
