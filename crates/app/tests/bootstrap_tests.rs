use fullon_app::bootstrap::{CACHE_ADDRESS, OHLCV_ADDRESS, assemble};
use fullon_core::auth::entity::Identity;
use fullon_core::config::{AppConfig, InstanceConfig};
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn anonymous() -> Identity {
    Identity::new("tester")
}

#[tokio::test]
async fn test_default_topology_serves_from_memory() {
    let gateway = assemble(&AppConfig::default(), CancellationToken::new()).unwrap();

    let registry = gateway.state.registry();
    assert_eq!(registry.services(), vec!["cache".to_string(), "ohlcv".to_string()]);
    assert!(registry.instance("cache", CACHE_ADDRESS).is_some());
    assert!(registry.instance("ohlcv", OHLCV_ADDRESS).is_some());

    gateway
        .cache
        .put("get_ticker?exchange=binance&symbol=BTC/USDT", json!({"bid": 42000.5}));

    let handler = gateway.state.router.handler("get_ticker").unwrap();
    let params = json!({"exchange": "binance", "symbol": "BTC/USDT"})
        .as_object()
        .unwrap()
        .clone();
    let value = match handler {
        fullon_api::router::Handler::Unary(h) => h.call(&params, &anonymous()).await.unwrap(),
        fullon_api::router::Handler::Streaming(_) => panic!("get_ticker must be unary"),
    };
    assert_eq!(value["bid"], 42000.5);
}

#[tokio::test]
async fn test_health_checker_probes_builtin_instances() {
    let gateway = assemble(&AppConfig::default(), CancellationToken::new()).unwrap();
    gateway.health.check_all().await;
    let registry = gateway.state.registry();
    for service in registry.services() {
        assert!(registry.instances(&service).iter().all(|i| i.is_healthy()));
    }
}

#[tokio::test]
async fn test_configured_services_replace_builtin_topology() {
    let mut config = AppConfig::default();
    config.services.insert(
        "ohlcv".into(),
        vec![
            InstanceConfig {
                address: "http://10.0.0.1:9000".into(),
                weight: 2,
            },
            InstanceConfig {
                address: OHLCV_ADDRESS.into(),
                weight: 1,
            },
        ],
    );
    let gateway = assemble(&config, CancellationToken::new()).unwrap();
    let registry = gateway.state.registry();
    assert_eq!(registry.services(), vec!["ohlcv".to_string()]);
    assert_eq!(registry.instances("ohlcv").len(), 2);
    assert!(gateway.state.router.handler("get_bots").is_some());
}

#[tokio::test]
async fn test_ohlcv_store_streams_updates() {
    let gateway = assemble(&AppConfig::default(), CancellationToken::new()).unwrap();
    let handler = gateway.state.router.handler("stream_ohlcv_updates").unwrap();
    let params = json!({"symbol": "BTC/USDT", "timeframe": "1m"})
        .as_object()
        .unwrap()
        .clone();
    let mut stream = match handler {
        fullon_api::router::Handler::Streaming(h) => h.open(&params, &anonymous()).await.unwrap(),
        fullon_api::router::Handler::Unary(_) => panic!("stream_ohlcv_updates must stream"),
    };
    let key = "stream_ohlcv_updates?symbol=BTC/USDT&timeframe=1m";
    assert_eq!(gateway.ohlcv.publish(key, json!({"close": 1})), 1);
    assert_eq!(stream.next().await.unwrap().unwrap()["close"], 1);
}

#[test]
fn test_unsupported_jwt_algorithm_fails_assembly() {
    let mut config = AppConfig::default();
    config.auth.algorithm = "ES256".into();
    assert!(assemble(&config, CancellationToken::new()).is_err());
}
