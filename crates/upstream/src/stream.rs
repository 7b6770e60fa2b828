use crate::http::remote_error;
use fullon_core::backend::entity::{BackendCall, PayloadStream};
use fullon_core::backend::error::BackendError;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::debug;

/// 单个上游帧对本订阅的含义
#[derive(Debug, PartialEq)]
enum Event {
    Payload(Value),
    // 一元应答：产出后结束
    Last(Value),
    End,
    Fail(BackendError),
    Ignore,
}

fn ws_url(address: &str) -> Result<String, BackendError> {
    if let Some(rest) = address.strip_prefix("http://") {
        Ok(format!("ws://{}/ws", rest))
    } else if let Some(rest) = address.strip_prefix("https://") {
        Ok(format!("wss://{}/ws", rest))
    } else {
        Err(BackendError::Unsupported(format!("no stream transport for {}", address)))
    }
}

fn text_field<'a>(frame: &'a Value, key: &str) -> &'a str {
    frame.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn interpret(text: &str, request_id: &str) -> Event {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return Event::Fail(BackendError::Protocol("undecodable upstream frame".to_string()));
    };
    let ours = |key: &str| text_field(&frame, key) == request_id;

    match frame.get("type").and_then(Value::as_str) {
        Some("stream_update") if ours("subscription_id") => {
            Event::Payload(frame.get("payload").cloned().unwrap_or(Value::Null))
        }
        Some("stream_end") if ours("subscription_id") => match text_field(&frame, "reason") {
            "error" => Event::Fail(remote_error(text_field(&frame, "error_code"), text_field(&frame, "error"), 502)),
            _ => Event::End,
        },
        Some("error") => Event::Fail(remote_error(text_field(&frame, "error_code"), text_field(&frame, "error"), 502)),
        None if ours("request_id") => match frame.get("success").and_then(Value::as_bool) {
            Some(true) => Event::Last(frame.get("result").cloned().unwrap_or(Value::Null)),
            _ => Event::Fail(remote_error(text_field(&frame, "error_code"), text_field(&frame, "error"), 502)),
        },
        _ => Event::Ignore,
    }
}

/// # Summary
/// 向上游网关建立一条流式订阅。
///
/// # Logic
/// 1. 握手 `/ws` (带 Bearer 凭证)，发送请求信封。
/// 2. 只转发订阅 id 匹配的推送帧；`stream_end` 结束流，`reason=error` 转为错误项。
/// 3. 上游在 `stream_end` 之前断开视为连接错误。
///
/// # Returns
/// 流被丢弃时 WebSocket 随之关闭，上游据此回收订阅。
pub(crate) async fn open(
    address: &str,
    token: Option<&str>,
    call: &BackendCall,
    request_id: String,
) -> Result<PayloadStream, BackendError> {
    let url = ws_url(address)?;
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| BackendError::Protocol(e.to_string()))?;
    if let Some(token) = token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (mut ws, _) = connect_async(request)
        .await
        .map_err(|e| BackendError::Connect(e.to_string()))?;
    let envelope = json!({
        "request_id": request_id,
        "operation": call.operation,
        "params": call.params,
    });
    ws.send(Message::Text(envelope.to_string().into()))
        .await
        .map_err(|e| BackendError::Connect(e.to_string()))?;
    debug!(instance = address, subscription_id = %request_id, "Upstream stream attached");

    let s = async_stream::stream! {
        loop {
            let Some(message) = ws.next().await else {
                yield Err(BackendError::Connect("upstream closed before stream end".to_string()));
                break;
            };
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => {
                    yield Err(BackendError::Connect("upstream closed before stream end".to_string()));
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    yield Err(BackendError::Connect(e.to_string()));
                    break;
                }
            };
            match interpret(text.as_str(), &request_id) {
                Event::Payload(payload) => yield Ok(payload),
                Event::Last(payload) => {
                    yield Ok(payload);
                    break;
                }
                Event::End => break,
                Event::Fail(err) => {
                    yield Err(err);
                    break;
                }
                Event::Ignore => {}
            }
        }
    };
    Ok(Box::pin(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url() {
        assert_eq!(ws_url("http://10.0.0.1:9000").unwrap(), "ws://10.0.0.1:9000/ws");
        assert_eq!(ws_url("https://gw.example").unwrap(), "wss://gw.example/ws");
        assert!(ws_url("mem://cache-0").is_err());
    }

    #[test]
    fn test_interpret_filters_by_subscription() {
        let update = r#"{"type":"stream_update","subscription_id":"s1","sequence":1,"payload":{"p":1}}"#;
        assert_eq!(interpret(update, "s1"), Event::Payload(json!({"p": 1})));
        assert_eq!(interpret(update, "other"), Event::Ignore);

        let end = r#"{"type":"stream_end","subscription_id":"s1","reason":"completed"}"#;
        assert_eq!(interpret(end, "s1"), Event::End);

        let failed = r#"{"type":"stream_end","subscription_id":"s1","reason":"error","error_code":"CACHE_MISS","error":"gone"}"#;
        assert_eq!(interpret(failed, "s1"), Event::Fail(BackendError::NotFound("gone".into())));
    }

    #[test]
    fn test_interpret_unary_response() {
        let ok = r#"{"request_id":"s1","success":true,"result":[1]}"#;
        assert_eq!(interpret(ok, "s1"), Event::Last(json!([1])));
        let route = r#"{"request_id":"s1","success":false,"error_code":"INVALID_ROUTE","error":"nope"}"#;
        assert!(matches!(interpret(route, "s1"), Event::Fail(BackendError::Remote { .. })));
    }
}
