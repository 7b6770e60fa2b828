use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use fullon_core::auth::entity::Identity;
use futures::{SinkExt, StreamExt};
use tracing::debug;

use crate::connection::{ConnectionManager, Frame};
use crate::middleware::auth::CurrentIdentity;
use crate::protocol;
use crate::server::AppState;

/// 建立 WebSocket 会话
///
/// 凭证可放在 `Authorization` 头或 `token` 查询参数中，校验失败在升级前返回 401。
#[utoipa::path(
    get,
    path = "/ws",
    tag = "会话 (Session)",
    params(
        ("token" = Option<String>, Query, description = "无法设置请求头时使用的 JWT")
    ),
    responses(
        (status = 101, description = "升级为 WebSocket"),
        (status = 401, description = "鉴权失败", body = protocol::Response)
    ),
    security(("bearer_jwt" = []))
)]
pub async fn connect(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| serve_socket(state, identity, socket))
}

fn inbound(message: Result<Message, axum::Error>) -> Option<Frame> {
    match message {
        Ok(Message::Text(text)) => Some(Frame::Text(text.as_str().to_string())),
        Ok(Message::Binary(bytes)) => Some(Frame::Binary(bytes.to_vec())),
        Ok(Message::Ping(data)) => Some(Frame::Ping(data.to_vec())),
        Ok(Message::Pong(data)) => Some(Frame::Pong(data.to_vec())),
        Ok(Message::Close(_)) => Some(Frame::Close),
        Err(e) => {
            debug!(error = %e, "WebSocket read error");
            Some(Frame::Close)
        }
    }
}

fn outbound(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close => Message::Close(None),
    }
}

/// 把 axum WebSocket 适配为连接帧流，交给 `ConnectionManager`
async fn serve_socket(state: AppState, identity: Identity, socket: WebSocket) {
    let (sink, stream) = socket.split();
    let incoming = stream.filter_map(|message| async move { inbound(message) });
    let outgoing = sink.with(|frame: Frame| async move { Ok::<Message, axum::Error>(outbound(frame)) });

    let manager = ConnectionManager::new(
        identity,
        state.router.clone(),
        state.rate_limiter.clone(),
        state.connection.clone(),
        &state.shutdown,
    );
    manager.run(Box::pin(incoming), Box::pin(outgoing)).await;
}
