use crate::stream;
use async_trait::async_trait;
use fullon_core::backend::entity::{BackendCall, HttpForward, HttpRelay, PayloadStream};
use fullon_core::backend::error::BackendError;
use fullon_core::backend::port::Backend;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// # Summary
/// 通过 HTTP 访问后端实例 (后端本身也说 `/ops` 协议，例如下一级网关)。
///
/// # Logic
/// - 一元调用：`POST {address}/ops/{operation}`，请求体为参数对象，应答为标准 Response 信封。
/// - 探测：`GET {address}/health`，2xx 即存活。
/// - 转发：方法、路径、查询串、请求体原样发送，状态码与响应体原样带回。
/// - 订阅：连接 `{address}/ws`，发送请求信封，按订阅 id 接收推送帧。
pub struct HttpBackend {
    client: Client,
    token: Option<String>,
    next_id: AtomicU64,
}

impl HttpBackend {
    pub fn new(token: Option<String>) -> Result<Self, BackendError> {
        let client = Client::builder()
            .build()
            .map_err(|e| BackendError::Protocol(format!("HTTP client init failed: {}", e)))?;
        Ok(Self {
            client,
            token,
            next_id: AtomicU64::new(1),
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn base(address: &str) -> &str {
    address.trim_end_matches('/')
}

/// 将 reqwest 传输错误映射为后端错误
fn map_transport(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else if err.is_connect() || err.is_request() {
        BackendError::Connect(err.to_string())
    } else {
        BackendError::Protocol(err.to_string())
    }
}

/// # Summary
/// 把上游信封里的错误码还原为后端错误。
///
/// # Logic
/// - `CACHE_MISS` 还原为 NotFound。
/// - 上游自身的故障类错误码视为非成功状态，计入熔断。
/// - 其余 (参数错误、限流等) 是上游正常作出的业务应答。
pub(crate) fn remote_error(code: &str, message: &str, status: u16) -> BackendError {
    match code {
        "CACHE_MISS" => BackendError::NotFound(message.to_string()),
        "SERVICE_UNAVAILABLE" | "CIRCUIT_BREAKER_OPEN" | "PROXY_TIMEOUT" | "INTERNAL" => {
            BackendError::Status(if status >= 500 { status } else { 502 })
        }
        _ => BackendError::Remote {
            code: code.to_string(),
            message: message.to_string(),
        },
    }
}

/// 解析 `/ops` 应答
pub(crate) fn decode_reply(status: u16, body: &[u8]) -> Result<Value, BackendError> {
    let parsed = serde_json::from_slice::<Value>(body).ok();
    let success = parsed
        .as_ref()
        .and_then(|v| v.get("success"))
        .and_then(Value::as_bool);

    match (parsed, success) {
        (Some(envelope), Some(true)) => Ok(envelope.get("result").cloned().unwrap_or(Value::Null)),
        (Some(envelope), Some(false)) => {
            let code = envelope.get("error_code").and_then(Value::as_str).unwrap_or("INTERNAL");
            let message = envelope.get("error").and_then(Value::as_str).unwrap_or_default();
            Err(remote_error(code, message, status))
        }
        _ if status == 404 => Err(BackendError::NotFound(format!("upstream answered {}", status))),
        _ if !(200..300).contains(&status) => Err(BackendError::Status(status)),
        _ => Err(BackendError::Protocol("reply is not a response envelope".to_string())),
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn call(&self, address: &str, call: &BackendCall) -> Result<Value, BackendError> {
        let url = format!("{}/ops/{}", base(address), call.operation);
        let response = self
            .authorized(self.client.post(url).json(&call.params))
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_transport)?;
        debug!(instance = address, operation = %call.operation, status, "Upstream call answered");
        decode_reply(status, &body)
    }

    async fn subscribe(&self, address: &str, call: &BackendCall) -> Result<PayloadStream, BackendError> {
        let request_id = format!("fullon-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        stream::open(base(address), self.token.as_deref(), call, request_id).await
    }

    async fn probe(&self, address: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .get(format!("{}/health", base(address)))
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(BackendError::Status(status.as_u16()))
        }
    }

    async fn forward(&self, address: &str, request: HttpForward) -> Result<HttpRelay, BackendError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| BackendError::Protocol(format!("invalid method {}", request.method)))?;
        let mut url = format!("{}{}", base(address), request.path);
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }

        let mut builder = self.authorized(self.client.request(method, url));
        if let Some(content_type) = &request.content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        let response = builder.body(request.body).send().await.map_err(map_transport)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(map_transport)?.to_vec();
        Ok(HttpRelay {
            status,
            content_type,
            body,
        })
    }
}
