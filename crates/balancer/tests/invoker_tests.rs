use chrono::Utc;
use fullon_balancer::balancer::LoadBalancer;
use fullon_balancer::breaker::BreakerState;
use fullon_balancer::client::ServiceClient;
use fullon_balancer::error::{BalancerError, InvokeError};
use fullon_balancer::invoker::Invoker;
use fullon_balancer::registry::ServiceRegistry;
use fullon_core::backend::entity::{BackendCall, HttpForward, HttpRelay};
use fullon_core::backend::error::BackendError;
use fullon_core::common::Params;
use fullon_core::common::time::FakeClockProvider;
use fullon_core::config::{BalanceStrategy, BreakerConfig};
use fullon_core::testing::{Script, ScriptedBackend, Tail};
use futures::StreamExt;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    registry: Arc<ServiceRegistry>,
    backend: Arc<ScriptedBackend>,
    invoker: Arc<Invoker>,
    client: ServiceClient,
}

fn harness(addresses: &[&str], deadline: Duration) -> Harness {
    let clock = Arc::new(FakeClockProvider::new(Utc::now()));
    let breaker = BreakerConfig {
        failure_threshold: 5,
        timeout_secs: 30,
    };
    let registry = Arc::new(ServiceRegistry::new(breaker, clock));
    for address in addresses {
        registry.register("cache", address, 1);
    }
    let backend = Arc::new(ScriptedBackend::new());
    let invoker = Arc::new(Invoker::new(backend.clone(), deadline));
    let balancer = Arc::new(LoadBalancer::with_strategy(registry.clone(), BalanceStrategy::RoundRobin));
    let client = ServiceClient::new(balancer, invoker.clone(), 2);
    Harness {
        registry,
        backend,
        invoker,
        client,
    }
}

fn ticker_call() -> BackendCall {
    let mut params = Params::new();
    params.insert("exchange".into(), json!("binance"));
    params.insert("symbol".into(), json!("BTC/USDT"));
    BackendCall::new("get_ticker", params)
}

#[tokio::test]
async fn test_sixth_call_rejected_without_invocation() {
    let h = harness(&["X"], Duration::from_secs(1));
    h.backend.script("X", Script::Fail(BackendError::Status(503)));
    let x = h.registry.instance("cache", "X").unwrap();

    for _ in 0..5 {
        let err = h.invoker.call(&x, &ticker_call()).await.unwrap_err();
        assert!(matches!(err, InvokeError::Backend { .. }));
    }
    assert_eq!(h.backend.invocations("X"), 5);
    assert_eq!(x.breaker().state(), BreakerState::Open);

    let err = h.invoker.call(&x, &ticker_call()).await.unwrap_err();
    assert_eq!(err, InvokeError::CircuitOpen("X".to_string()));
    assert_eq!(h.backend.invocations("X"), 5);
    assert_eq!(x.invocations(), 5);

    // 经客户端调用时，唯一健康实例已熔断，在选择阶段即被拒绝
    let err = h.client.call("cache", &ticker_call()).await.unwrap_err();
    assert_eq!(err, InvokeError::Unavailable(BalancerError::CircuitOpen("cache".to_string())));
    assert_eq!(h.backend.invocations("X"), 5);
}

#[tokio::test]
async fn test_not_found_is_cache_miss_and_not_a_failure() {
    let h = harness(&["X"], Duration::from_secs(1));
    h.backend.script("X", Script::Fail(BackendError::NotFound("get_ticker".into())));
    let x = h.registry.instance("cache", "X").unwrap();

    for _ in 0..10 {
        let err = h.invoker.call(&x, &ticker_call()).await.unwrap_err();
        assert_eq!(err, InvokeError::CacheMiss("get_ticker".to_string()));
    }
    assert_eq!(x.breaker().state(), BreakerState::Closed);
    assert_eq!(x.breaker().consecutive_failures(), 0);
}

#[tokio::test]
async fn test_deadline_abandons_call_and_counts_failure() {
    let h = harness(&["X"], Duration::from_millis(50));
    h.backend.script("X", Script::Hang);
    let x = h.registry.instance("cache", "X").unwrap();

    let err = h.invoker.call(&x, &ticker_call()).await.unwrap_err();
    assert_eq!(err, InvokeError::Timeout("X".to_string()));
    assert_eq!(x.breaker().consecutive_failures(), 1);
    assert_eq!(x.in_flight(), 0);
}

#[tokio::test]
async fn test_client_retries_transient_failure_on_other_instance() {
    let h = harness(&["A", "B"], Duration::from_secs(1));
    h.backend.script("A", Script::Fail(BackendError::Connect("refused".into())));
    h.backend.script("B", Script::Reply(json!({"price": 42})));

    let value = h.client.call("cache", &ticker_call()).await.unwrap();
    assert_eq!(value["price"], 42);
    assert_eq!(h.backend.invocations("A"), 1);
    assert_eq!(h.backend.invocations("B"), 1);
}

#[tokio::test]
async fn test_client_retries_at_most_once() {
    let h = harness(&["A", "B", "C"], Duration::from_secs(1));
    for address in ["A", "B", "C"] {
        h.backend.script(address, Script::Fail(BackendError::Connect("refused".into())));
    }

    let err = h.client.call("cache", &ticker_call()).await.unwrap_err();
    assert!(err.is_transient());
    let total: usize = ["A", "B", "C"].iter().map(|a| h.backend.invocations(a)).sum();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn test_client_does_not_retry_non_transient_errors() {
    let h = harness(&["A", "B"], Duration::from_secs(1));
    h.backend.script("A", Script::Fail(BackendError::Status(500)));
    h.backend.script("B", Script::Reply(json!(1)));

    let err = h.client.call("cache", &ticker_call()).await.unwrap_err();
    assert!(matches!(
        err,
        InvokeError::Backend {
            source: BackendError::Status(500),
            ..
        }
    ));
    assert_eq!(h.backend.invocations("B"), 0);
}

#[tokio::test]
async fn test_single_instance_retry_surfaces_original_error() {
    let h = harness(&["A"], Duration::from_secs(1));
    h.backend.script("A", Script::Fail(BackendError::Connect("refused".into())));

    let err = h.client.call("cache", &ticker_call()).await.unwrap_err();
    assert!(matches!(
        err,
        InvokeError::Backend {
            source: BackendError::Connect(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_subscription_holds_in_flight_until_dropped() {
    let h = harness(&["A"], Duration::from_secs(1));
    h.backend.script(
        "A",
        Script::Updates {
            items: vec![json!(1), json!(2)],
            interval: Duration::ZERO,
            tail: Tail::Hold,
        },
    );
    let a = h.registry.instance("cache", "A").unwrap();

    let mut stream = h.client.subscribe("cache", &ticker_call()).await.unwrap();
    assert_eq!(a.in_flight(), 1);
    assert_eq!(stream.next().await.unwrap().unwrap(), json!(1));
    assert_eq!(stream.next().await.unwrap().unwrap(), json!(2));

    drop(stream);
    assert_eq!(a.in_flight(), 0);
}

#[tokio::test]
async fn test_forward_relays_server_errors_and_counts_them() {
    let h = harness(&["A"], Duration::from_secs(1));
    let a = h.registry.instance("cache", "A").unwrap();
    h.backend.script(
        "A",
        Script::Http(HttpRelay {
            status: 502,
            content_type: Some("text/plain".into()),
            body: b"bad gateway".to_vec(),
        }),
    );

    let request = HttpForward {
        method: "GET".into(),
        path: "/tickers".into(),
        ..Default::default()
    };
    let relay = h.client.forward("cache", request.clone()).await.unwrap();
    assert_eq!(relay.status, 502);
    assert_eq!(relay.body, b"bad gateway".to_vec());
    assert_eq!(a.breaker().consecutive_failures(), 1);

    // 4xx 原样转发且不计失败
    h.backend.script(
        "A",
        Script::Http(HttpRelay {
            status: 404,
            content_type: None,
            body: Vec::new(),
        }),
    );
    let relay = h.invoker.forward(&a, request).await.unwrap();
    assert_eq!(relay.status, 404);
    assert_eq!(a.breaker().consecutive_failures(), 0);
}
