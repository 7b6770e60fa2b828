//! # 连接管理
//!
//! 每条客户端连接一个读循环、一个写循环。
//! 读循环解码并分发请求；所有应答与推送都经由同一个有界出站队列交给写循环，
//! 因此帧之间不会交错，同一订阅的更新也不会乱序。

use fullon_core::auth::entity::Identity;
use fullon_core::config::ServerConfig;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::json;
use std::collections::HashSet;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::middleware::rate_limit::RateLimiter;
use crate::protocol::{self, ErrorCode, Inbound, Outbound, PushFrame, Request, Response};
use crate::router::{Dispatch, RequestRouter, UnaryHandler};
use crate::stream::StreamManager;

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

/// 与传输无关的连接帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    // 二进制帧按 UTF-8 文本解释
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// 写循环的输入
#[derive(Debug)]
pub enum Outgoing {
    Message(Outbound),
    Ping,
    Pong(Vec<u8>),
}

/// 单条连接的运行参数
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// 出站队列容量
    pub outbound_queue: usize,
    /// 心跳间隔，None 表示不发送心跳
    pub keepalive: Option<Duration>,
    /// 拆除时等待写循环写完剩余帧的上限，超时即放弃
    pub drain_timeout: Duration,
}

impl From<&ServerConfig> for ConnectionSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            outbound_queue: config.outbound_queue.max(1),
            keepalive: config.keepalive(),
            drain_timeout: config.drain_timeout(),
        }
    }
}

/// 读循环处理一帧后的去向
enum Flow {
    Continue,
    Close,
}

/// # Summary
/// 单条已鉴权连接的会话。
///
/// # Invariants
/// - `request_id` 在连接生命周期内不可复用，重复 id 以 `MALFORMED` 拒绝。
/// - 单个操作失败只产生一条失败应答，不会断开连接；解码失败会断开连接。
/// - 断开时先取消全部订阅与在途调用，等待任务清空后才释放出站队列。
pub struct ConnectionManager {
    id: u64,
    identity: Identity,
    router: Arc<RequestRouter>,
    limiter: Arc<RateLimiter>,
    settings: ConnectionSettings,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ConnectionManager {
    /// # Arguments
    /// * `identity`: 握手阶段校验得到的身份。
    /// * `shutdown`: 服务级关闭信号，连接持有其子信号。
    pub fn new(
        identity: Identity,
        router: Arc<RequestRouter>,
        limiter: Arc<RateLimiter>,
        settings: ConnectionSettings,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            id: NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed),
            identity,
            router,
            limiter,
            settings,
            token: shutdown.child_token(),
            tracker: TaskTracker::new(),
        }
    }

    /// 连接内派生任务 (一元调用与订阅生产者) 的追踪器
    pub fn tasks(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// # Summary
    /// 驱动连接直到客户端断开、协议错误或服务关闭。
    ///
    /// # Logic
    /// 1. 启动写循环，独占 `sink`。
    /// 2. 读循环逐帧处理；心跳按间隔入队 Ping。
    /// 3. 退出后取消连接信号、关闭全部订阅、等待所有派生任务结束。
    /// 4. 释放出站队列，写循环写完剩余帧后发送 Close；客户端停止读取时
    ///    最多等待 `drain_timeout`，之后中止写循环。
    pub async fn run<S, K>(self, mut incoming: S, sink: K)
    where
        S: Stream<Item = Frame> + Unpin + Send,
        K: Sink<Frame> + Unpin + Send + 'static,
        K::Error: Display,
    {
        let (out_tx, out_rx) = mpsc::channel(self.settings.outbound_queue.max(1));
        let mut writer = tokio::spawn(write_loop(sink, out_rx, self.id));
        let streams = StreamManager::new(out_tx.clone(), &self.token, self.tracker.clone());
        info!(connection = self.id, subject = %self.identity.subject, "Connection opened");

        let mut keepalive = self.settings.keepalive.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut seen: HashSet<String> = HashSet::new();

        loop {
            let frame = tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    info!(connection = self.id, "Server shutting down, closing connection");
                    break;
                }
                frame = incoming.next() => frame,
                _ = next_tick(&mut keepalive) => {
                    if out_tx.send(Outgoing::Ping).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let flow = match frame {
                Some(Frame::Text(text)) => self.on_text(&text, &out_tx, &streams, &mut seen).await,
                Some(Frame::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => self.on_text(&text, &out_tx, &streams, &mut seen).await,
                    Err(_) => self.reject_malformed(&out_tx, None, "binary frame is not valid UTF-8".to_string()).await,
                },
                Some(Frame::Ping(data)) => tokio::select! {
                    biased;
                    _ = self.token.cancelled() => Flow::Close,
                    sent = out_tx.send(Outgoing::Pong(data)) => match sent {
                        Ok(()) => Flow::Continue,
                        Err(_) => Flow::Close,
                    },
                },
                Some(Frame::Pong(_)) => Flow::Continue,
                Some(Frame::Close) | None => Flow::Close,
            };
            if matches!(flow, Flow::Close) {
                break;
            }
        }

        // 拆除：先取消，再等待，最后释放队列
        self.token.cancel();
        streams.close_all();
        self.tracker.close();
        self.tracker.wait().await;
        drop(streams);
        drop(out_tx);
        match tokio::time::timeout(self.settings.drain_timeout, &mut writer).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(connection = self.id, error = %e, "Writer task failed"),
            Err(_) => {
                warn!(connection = self.id, "Client stopped reading, abandoning pending frames");
                writer.abort();
            }
        }
        info!(connection = self.id, "Connection closed");
    }

    async fn on_text(
        &self,
        text: &str,
        out_tx: &mpsc::Sender<Outgoing>,
        streams: &StreamManager,
        seen: &mut HashSet<String>,
    ) -> Flow {
        let inbound = match protocol::decode(text.as_bytes()) {
            Ok(inbound) => inbound,
            Err(err) => return self.reject_malformed(out_tx, err.request_id, err.reason).await,
        };

        let request_id = match &inbound {
            Inbound::Request(request) => request.request_id.clone(),
            Inbound::Cancel(cancel) => cancel.request_id.clone(),
        };
        if !seen.insert(request_id.clone()) {
            warn!(connection = self.id, request_id = %request_id, "Duplicate request_id");
            let frame = PushFrame::error(Some(request_id), ErrorCode::Malformed, "request_id already used on this connection");
            return self.emit(out_tx, frame.into()).await;
        }

        match inbound {
            Inbound::Cancel(cancel) => {
                let cancelled = streams.cancel(&cancel.target_request_id).await;
                debug!(connection = self.id, target = %cancel.target_request_id, cancelled, "Cancel processed");
                let response = Response::ok(cancel.request_id, json!({"cancelled": cancelled}));
                self.emit(out_tx, response.into()).await
            }
            Inbound::Request(request) => {
                if let Err(err) = self.limiter.check(&self.identity.subject) {
                    return self.emit(out_tx, err.into_response_envelope(request_id).into()).await;
                }
                match self.router.dispatch(request) {
                    Ok(Dispatch::Unary(handler, request)) => {
                        self.spawn_unary(handler, request, out_tx.clone());
                        Flow::Continue
                    }
                    Ok(Dispatch::Streaming(handler, request)) => {
                        streams.start(request, handler, self.identity.clone());
                        Flow::Continue
                    }
                    Err(err) => {
                        debug!(connection = self.id, request_id = %request_id, error = %err, "Request rejected by router");
                        self.emit(out_tx, err.into_response_envelope(request_id).into()).await
                    }
                }
            }
        }
    }

    /// 协议级错误：写出 `MALFORMED` 错误帧后断开
    async fn reject_malformed(&self, out_tx: &mpsc::Sender<Outgoing>, request_id: Option<String>, reason: String) -> Flow {
        warn!(connection = self.id, error = %reason, "Closing connection on malformed message");
        let frame = PushFrame::error(request_id, ErrorCode::Malformed, reason);
        // 连接无论如何都要断开，送达与否只影响日志
        if matches!(self.emit(out_tx, frame.into()).await, Flow::Close) {
            debug!(connection = self.id, "Outbound queue closed");
        }
        Flow::Close
    }

    /// 入队一条消息；服务关闭或队列关闭时返回 `Flow::Close`
    async fn emit(&self, out_tx: &mpsc::Sender<Outgoing>, message: Outbound) -> Flow {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Flow::Close,
            sent = out_tx.send(Outgoing::Message(message)) => match sent {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Close,
            },
        }
    }

    /// 一元调用在独立任务中执行，慢后端不会阻塞读循环
    fn spawn_unary(&self, handler: Arc<dyn UnaryHandler>, request: Request, out_tx: mpsc::Sender<Outgoing>) {
        let identity = self.identity.clone();
        let token = self.token.clone();
        let connection = self.id;
        self.tracker.spawn(async move {
            let started = Instant::now();
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                outcome = handler.call(&request.params, &identity) => outcome,
            };
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let response = match outcome {
                Ok(result) => Response::ok(request.request_id.as_str(), result),
                Err(err) => {
                    debug!(connection, request_id = %request.request_id, operation = %request.operation, error = %err, "Operation failed");
                    err.into_response_envelope(request.request_id.as_str())
                }
            };
            debug!(connection, request_id = %request.request_id, operation = %request.operation, latency_ms, "Operation answered");
            let sent = tokio::select! {
                biased;
                _ = token.cancelled() => false,
                sent = out_tx.send(Outgoing::Message(response.with_latency(latency_ms).into())) => sent.is_ok(),
            };
            if !sent {
                debug!(connection, request_id = %request.request_id, "Connection gone before response");
            }
        });
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending::<()>().await,
    }
}

/// # Summary
/// 写循环：唯一持有 sink 的任务。
///
/// # Logic
/// 1. 按入队顺序逐帧写出。
/// 2. 记录已写出 `stream_end` 的订阅，之后到达的同订阅更新直接丢弃。
/// 3. 队列关闭后发送 Close 并关闭 sink；写失败立即退出，丢弃接收端使生产者感知断开。
async fn write_loop<K>(mut sink: K, mut rx: mpsc::Receiver<Outgoing>, connection: u64)
where
    K: Sink<Frame> + Unpin,
    K::Error: Display,
{
    let mut ended: HashSet<String> = HashSet::new();
    while let Some(item) = rx.recv().await {
        let frame = match item {
            Outgoing::Message(message) => {
                match &message {
                    Outbound::Push(PushFrame::StreamUpdate { subscription_id, sequence, .. })
                        if ended.contains(subscription_id) =>
                    {
                        debug!(connection, subscription_id = %subscription_id, sequence, "Dropping update after stream end");
                        continue;
                    }
                    Outbound::Push(PushFrame::StreamEnd { subscription_id, .. }) => {
                        ended.insert(subscription_id.clone());
                    }
                    _ => {}
                }
                Frame::Text(protocol::encode(&message))
            }
            Outgoing::Ping => Frame::Ping(Vec::new()),
            Outgoing::Pong(data) => Frame::Pong(data),
        };
        if let Err(e) = sink.send(frame).await {
            warn!(connection, error = %e, "Write failed, stopping writer");
            return;
        }
    }

    if let Err(e) = sink.send(Frame::Close).await {
        debug!(connection, error = %e, "Close frame not delivered");
    }
    if let Err(e) = sink.close().await {
        debug!(connection, error = %e, "Sink close failed");
    }
}
