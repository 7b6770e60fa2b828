//! 测试替身：可编排的后端与静态鉴权器。
//!
//! 仅在 `test-utils` feature 下编译，供下游 crate 的集成测试使用。

use crate::auth::entity::Identity;
use crate::auth::error::AuthError;
use crate::auth::port::Authenticator;
use crate::backend::entity::{BackendCall, HttpForward, HttpRelay, PayloadStream};
use crate::backend::error::BackendError;
use crate::backend::port::Backend;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// 推送流在产出全部条目后的收尾方式
#[derive(Debug, Clone)]
pub enum Tail {
    /// 自然结束
    End,
    /// 以错误结束
    Fail(BackendError),
    /// 保持挂起，直到订阅方丢弃流
    Hold,
}

/// 某个实例地址上的预设行为
#[derive(Debug, Clone)]
pub enum Script {
    Reply(Value),
    Fail(BackendError),
    /// 永不返回，用于验证截止时间
    Hang,
    Updates {
        items: Vec<Value>,
        interval: Duration,
        tail: Tail,
    },
    /// 仅用于 HTTP 转发的原始应答
    Http(HttpRelay),
}

/// # Summary
/// 按实例地址编排应答的模拟后端。
///
/// # Invariants
/// - 未编排的地址一律返回 `Connect` 错误。
/// - `call`/`subscribe` 每次进入都计数，无论结果如何。
#[derive(Default)]
pub struct ScriptedBackend {
    scripts: DashMap<String, Script>,
    probes: DashMap<String, Result<(), BackendError>>,
    invocations: DashMap<String, usize>,
    probe_count: DashMap<String, usize>,
    calls: Mutex<Vec<(String, BackendCall)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, address: &str, script: Script) {
        self.scripts.insert(address.to_string(), script);
    }

    pub fn set_probe(&self, address: &str, result: Result<(), BackendError>) {
        self.probes.insert(address.to_string(), result);
    }

    /// 某地址收到的调用次数 (含订阅)
    pub fn invocations(&self, address: &str) -> usize {
        self.invocations.get(address).map(|c| *c).unwrap_or(0)
    }

    pub fn probes(&self, address: &str) -> usize {
        self.probe_count.get(address).map(|c| *c).unwrap_or(0)
    }

    /// 按到达顺序记录的 (地址, 调用) 列表
    pub fn recorded(&self) -> Vec<(String, BackendCall)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn enter(&self, address: &str, call: &BackendCall) -> Option<Script> {
        *self.invocations.entry(address.to_string()).or_insert(0) += 1;
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((address.to_string(), call.clone()));
        self.scripts.get(address).map(|s| s.clone())
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn call(&self, address: &str, call: &BackendCall) -> Result<Value, BackendError> {
        match self.enter(address, call) {
            Some(Script::Reply(value)) => Ok(value),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Hang) => {
                futures::future::pending::<()>().await;
                Err(BackendError::Timeout)
            }
            Some(Script::Updates { .. }) | Some(Script::Http(_)) => Err(BackendError::Unsupported(
                format!("{} does not answer calls", address),
            )),
            None => Err(BackendError::Connect(format!("no script for {}", address))),
        }
    }

    async fn subscribe(&self, address: &str, call: &BackendCall) -> Result<PayloadStream, BackendError> {
        match self.enter(address, call) {
            Some(Script::Reply(value)) => {
                let s = async_stream::stream! {
                    yield Ok(value);
                };
                Ok(Box::pin(s))
            }
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Hang) => {
                futures::future::pending::<()>().await;
                Err(BackendError::Timeout)
            }
            Some(Script::Updates { items, interval, tail }) => {
                let s = async_stream::stream! {
                    for item in items {
                        if !interval.is_zero() {
                            tokio::time::sleep(interval).await;
                        }
                        yield Ok(item);
                    }
                    match tail {
                        Tail::End => {}
                        Tail::Fail(err) => yield Err(err),
                        Tail::Hold => futures::future::pending::<()>().await,
                    }
                };
                Ok(Box::pin(s))
            }
            Some(Script::Http(_)) => Err(BackendError::Unsupported(format!("{} does not stream", address))),
            None => Err(BackendError::Connect(format!("no script for {}", address))),
        }
    }

    async fn forward(&self, address: &str, request: HttpForward) -> Result<HttpRelay, BackendError> {
        let call = BackendCall::new(format!("{} {}", request.method, request.path), Default::default());
        match self.enter(address, &call) {
            Some(Script::Http(relay)) => Ok(relay),
            Some(Script::Reply(value)) => Ok(HttpRelay {
                status: 200,
                content_type: Some("application/json".to_string()),
                body: value.to_string().into_bytes(),
            }),
            Some(Script::Fail(err)) => Err(err),
            Some(Script::Hang) => {
                futures::future::pending::<()>().await;
                Err(BackendError::Timeout)
            }
            Some(Script::Updates { .. }) => Err(BackendError::Unsupported(format!("{} only streams", address))),
            None => Err(BackendError::Connect(format!("no script for {}", address))),
        }
    }

    async fn probe(&self, address: &str) -> Result<(), BackendError> {
        *self.probe_count.entry(address.to_string()).or_insert(0) += 1;
        self.probes.get(address).map(|r| r.clone()).unwrap_or(Ok(()))
    }
}

/// # Summary
/// 基于静态令牌表的鉴权器。
#[derive(Default)]
pub struct StaticAuthenticator {
    tokens: HashMap<String, Identity>,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: &str, subject: &str) -> Self {
        self.tokens.insert(token.to_string(), Identity::new(subject));
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AuthError::InvalidToken("unknown token".to_string()))
    }
}
