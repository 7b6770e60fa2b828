use chrono::Utc;
use fullon_api::connection::ConnectionSettings;
use fullon_api::middleware::rate_limit::RateLimiter;
use fullon_api::operations::catalog_router;
use fullon_api::server::{AppState, serve};
use fullon_balancer::balancer::LoadBalancer;
use fullon_balancer::client::ServiceClient;
use fullon_balancer::invoker::Invoker;
use fullon_balancer::registry::ServiceRegistry;
use fullon_core::backend::entity::HttpRelay;
use fullon_core::common::time::RealTimeProvider;
use fullon_core::config::{BalanceStrategy, BreakerConfig, RateLimitConfig, ServerConfig};
use fullon_core::testing::{Script, ScriptedBackend, StaticAuthenticator};
use futures::{SinkExt, StreamExt};
use reqwest::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;

const TOKEN: &str = "good-token";
const CACHE: &str = "mem://cache-0";

struct Gateway {
    base: String,
    backend: Arc<ScriptedBackend>,
    shutdown: CancellationToken,
    handle: JoinHandle<std::io::Result<()>>,
}

// 帮助函数：在随机端口启动测试网关
async fn spawn_gateway() -> Gateway {
    let _ = tracing_subscriber::fmt().with_env_filter("debug").try_init();

    let clock = Arc::new(RealTimeProvider);
    let registry = Arc::new(ServiceRegistry::new(BreakerConfig::default(), clock.clone()));
    registry.register("cache", CACHE, 1);
    let backend = Arc::new(ScriptedBackend::new());
    let invoker = Arc::new(Invoker::new(backend.clone(), Duration::from_secs(2)));
    let balancer = Arc::new(LoadBalancer::with_strategy(registry, BalanceStrategy::RoundRobin));
    let client = Arc::new(ServiceClient::new(balancer, invoker, 2));

    let shutdown = CancellationToken::new();
    let state = AppState {
        router: Arc::new(catalog_router(client.clone())),
        client,
        authenticator: Arc::new(StaticAuthenticator::new().with_token(TOKEN, "alice")),
        rate_limiter: Arc::new(RateLimiter::new(&RateLimitConfig::default(), clock)),
        connection: ConnectionSettings::from(&ServerConfig::default()),
        shutdown: shutdown.clone(),
    };

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
    let handle = tokio::spawn(serve(listener, state));
    Gateway {
        base,
        backend,
        shutdown,
        handle,
    }
}

#[tokio::test]
async fn test_health_is_public() {
    let gw = spawn_gateway().await;
    let response = reqwest::get(format!("http://{}/health", gw.base)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["cache"]["status"], "healthy");
    assert_eq!(body["cache"]["instances"][0]["address"], CACHE);
    assert_eq!(body["cache"]["instances"][0]["breaker"], "closed");
}

#[tokio::test]
async fn test_ops_requires_token() {
    let gw = spawn_gateway().await;
    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/ops/get_bots", gw.base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "AUTH_FAILED");

    let response = client
        .post(format!("http://{}/ops/get_bots", gw.base))
        .bearer_auth("forged")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ops_invokes_catalog_operation() {
    let gw = spawn_gateway().await;
    gw.backend.script(CACHE, Script::Reply(json!({"bid": 100.5})));
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/ops/get_ticker", gw.base))
        .bearer_auth(TOKEN)
        .header("x-request-id", "h1")
        .json(&json!({"exchange": "binance", "symbol": "BTC/USDT"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["request_id"], "h1");
    assert_eq!(body["result"]["bid"], 100.5);

    let response = client
        .post(format!("http://{}/ops/get_ticker", gw.base))
        .bearer_auth(TOKEN)
        .json(&json!({"exchange": "binance"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(format!("http://{}/ops/stream_tickers", gw.base))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "INVALID_ROUTE");
}

#[tokio::test]
async fn test_proxy_relays_status_and_body() {
    let gw = spawn_gateway().await;
    gw.backend.script(
        CACHE,
        Script::Http(HttpRelay {
            status: 201,
            content_type: Some("text/plain".into()),
            body: b"made".to_vec(),
        }),
    );
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/proxy/cache/orders/1?dry=1", gw.base))
        .bearer_auth(TOKEN)
        .body("payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.text().await.unwrap(), "made");
    assert_eq!(gw.backend.recorded()[0].1.operation, "POST /orders/1");

    let response = client
        .get(format!("http://{}/proxy/nowhere/x", gw.base))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error_code"], "INVALID_ROUTE");
}

#[tokio::test]
async fn test_websocket_rejects_before_upgrade() {
    let gw = spawn_gateway().await;
    let err = connect_async(format!("ws://{}/ws", gw.base)).await.unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status().as_u16(), 401),
        other => panic!("expected HTTP rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_websocket_session_round_trip() {
    let gw = spawn_gateway().await;
    let (mut ws, _) = connect_async(format!("ws://{}/ws?token={}", gw.base, TOKEN)).await.unwrap();
    let request = json!({"request_id": "w1", "operation": "ping", "params": {}});
    ws.send(Message::Text(request.to_string().into())).await.unwrap();

    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => {
                let response: Value = serde_json::from_str(text.as_str()).unwrap();
                assert_eq!(response["request_id"], "w1");
                assert_eq!(response["success"], true);
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message {:?}", other),
        }
    }

    gw.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), gw.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let gw = spawn_gateway().await;
    let doc: Value = reqwest::get(format!("http://{}/api-docs/openapi.json", gw.base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(doc["paths"]["/ops/{operation}"].is_object());
    assert!(doc["paths"]["/health"].is_object());
    assert!(doc["components"]["securitySchemes"]["bearer_jwt"].is_object());
}
