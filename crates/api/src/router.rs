//! # 请求路由
//!
//! 启动期登记操作名到处理器的映射，网关开始服务后路由表只读。

use async_trait::async_trait;
use fullon_core::auth::entity::Identity;
use fullon_core::backend::entity::PayloadStream;
use fullon_core::common::Params;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::GatewayError;
use crate::protocol::Request;

/// 一元处理器：一个请求对应一个应答
#[async_trait]
pub trait UnaryHandler: Send + Sync {
    async fn call(&self, params: &Params, identity: &Identity) -> Result<Value, GatewayError>;
}

/// # Summary
/// 流式处理器：建立一条推送流。
///
/// # Invariants
/// - 返回的流被丢弃即视为订阅方离开，实现方必须据此回收后端资源。
#[async_trait]
pub trait StreamHandler: Send + Sync {
    async fn open(&self, params: &Params, identity: &Identity) -> Result<PayloadStream, GatewayError>;
}

/// 登记时确定的处理器种类
#[derive(Clone)]
pub enum Handler {
    Unary(Arc<dyn UnaryHandler>),
    Streaming(Arc<dyn StreamHandler>),
}

impl Handler {
    pub fn is_streaming(&self) -> bool {
        matches!(self, Handler::Streaming(_))
    }
}

/// 路由表构建器，仅在启动期使用
#[derive(Default)]
pub struct RouterBuilder {
    handlers: HashMap<String, Handler>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Summary
    /// 登记一个操作。
    ///
    /// # Logic
    /// 同名重复登记以后者为准，并记录告警。
    pub fn register(mut self, operation: &str, handler: Handler) -> Self {
        if self.handlers.insert(operation.to_string(), handler).is_some() {
            warn!(operation, "Operation registered twice, keeping the latest handler");
        }
        self
    }

    pub fn unary(self, operation: &str, handler: Arc<dyn UnaryHandler>) -> Self {
        self.register(operation, Handler::Unary(handler))
    }

    pub fn streaming(self, operation: &str, handler: Arc<dyn StreamHandler>) -> Self {
        self.register(operation, Handler::Streaming(handler))
    }

    pub fn build(self) -> RequestRouter {
        RequestRouter {
            handlers: self.handlers,
        }
    }
}

/// # Summary
/// 分发结果：要么立即得到应答，要么需要由调用方启动的执行单元。
pub enum Dispatch {
    Unary(Arc<dyn UnaryHandler>, Request),
    Streaming(Arc<dyn StreamHandler>, Request),
}

/// # Summary
/// 不可变的操作分发表。
///
/// # Invariants
/// - 构造后不再增删操作，可被所有连接无锁共享。
/// - 一元还是流式只取决于登记方式，不检查处理结果。
pub struct RequestRouter {
    handlers: HashMap<String, Handler>,
}

impl RequestRouter {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    pub fn handler(&self, operation: &str) -> Option<&Handler> {
        self.handlers.get(operation)
    }

    /// 按字典序列出全部操作名
    pub fn operations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// # Summary
    /// 为请求选定处理器。
    ///
    /// # Returns
    /// 未登记的操作返回 `INVALID_ROUTE`。
    pub fn dispatch(&self, request: Request) -> Result<Dispatch, GatewayError> {
        match self.handlers.get(&request.operation) {
            Some(Handler::Unary(handler)) => Ok(Dispatch::Unary(handler.clone(), request)),
            Some(Handler::Streaming(handler)) => Ok(Dispatch::Streaming(handler.clone(), request)),
            None => Err(GatewayError::invalid_route(&request.operation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ErrorCode;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl UnaryHandler for Echo {
        async fn call(&self, params: &Params, _identity: &Identity) -> Result<Value, GatewayError> {
            Ok(Value::Object(params.clone()))
        }
    }

    struct Empty;

    #[async_trait]
    impl StreamHandler for Empty {
        async fn open(&self, _params: &Params, _identity: &Identity) -> Result<PayloadStream, GatewayError> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn request(operation: &str) -> Request {
        Request {
            request_id: "r1".into(),
            operation: operation.into(),
            params: Params::new(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_registration_kind() {
        let router = RequestRouter::builder()
            .unary("echo", Arc::new(Echo))
            .streaming("stream_nothing", Arc::new(Empty))
            .build();

        match router.dispatch(request("echo")).unwrap() {
            Dispatch::Unary(handler, req) => {
                let mut params = Params::new();
                params.insert("a".into(), json!(1));
                let result = handler.call(&params, &Identity::new("u")).await.unwrap();
                assert_eq!(result, json!({"a": 1}));
                assert_eq!(req.request_id, "r1");
            }
            Dispatch::Streaming(..) => unreachable!("echo is unary"),
        }
        assert!(matches!(router.dispatch(request("stream_nothing")).unwrap(), Dispatch::Streaming(..)));
        assert_eq!(router.operations(), vec!["echo".to_string(), "stream_nothing".to_string()]);
    }

    #[test]
    fn test_unknown_operation_is_invalid_route() {
        let router = RequestRouter::builder().unary("echo", Arc::new(Echo)).build();
        let err = router.dispatch(request("nope")).err().unwrap();
        assert_eq!(err.code, ErrorCode::InvalidRoute);
    }
}
