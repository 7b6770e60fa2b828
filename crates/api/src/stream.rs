//! # 订阅管理
//!
//! 每条连接一个 `StreamManager`，负责订阅的生命周期：
//! 启动生产者任务、分配序号、响应取消、保证恰好一个结束帧。

use dashmap::DashMap;
use fullon_core::auth::entity::Identity;
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::connection::Outgoing;
use crate::error::GatewayError;
use crate::protocol::{EndReason, PushFrame, Request};
use crate::router::StreamHandler;

/// 订阅状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// 已登记，后端流尚未建立
    Starting,
    Active,
    Cancelled,
    Completed,
    Errored,
}

struct Subscription {
    token: CancellationToken,
    state: Arc<Mutex<StreamState>>,
}

fn set_state(state: &Mutex<StreamState>, next: StreamState) {
    *state.lock().unwrap_or_else(|e| e.into_inner()) = next;
}

type Table = Arc<DashMap<String, Subscription>>;

/// # Summary
/// 连接内的订阅表与生产者调度。
///
/// # Invariants
/// - 订阅 id 即发起请求的 `request_id`，由连接保证在连接生命周期内不重复。
/// - 谁把订阅从表中移除，谁负责写出唯一的 `stream_end`。
/// - 每条订阅的 `sequence` 从 1 开始严格递增。
/// - 生产者在每次产出前检查取消信号。
pub struct StreamManager {
    subscriptions: Table,
    outbound: mpsc::Sender<Outgoing>,
    token: CancellationToken,
    tracker: TaskTracker,
}

impl StreamManager {
    /// # Arguments
    /// * `outbound`: 连接的出站队列。
    /// * `connection`: 连接级取消信号，每条订阅持有其子信号。
    /// * `tracker`: 连接级任务追踪器，拆除连接时等待其清空。
    pub fn new(outbound: mpsc::Sender<Outgoing>, connection: &CancellationToken, tracker: TaskTracker) -> Self {
        Self {
            subscriptions: Arc::new(DashMap::new()),
            outbound,
            token: connection.clone(),
            tracker,
        }
    }

    /// 当前登记中的订阅数
    pub fn active(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn state(&self, subscription_id: &str) -> Option<StreamState> {
        self.subscriptions
            .get(subscription_id)
            .map(|s| *s.state.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// # Summary
    /// 登记订阅并启动生产者任务。
    ///
    /// # Logic
    /// 1. 以 `Starting` 状态登记，派生子取消信号。
    /// 2. 生产者建立后端流，成功后进入 `Active`，失败则以 `error` 结束。
    /// 3. 每个载荷分配下一个序号后入队；后端结束记为 `completed`，后端故障记为 `error`。
    /// 4. 任意时刻收到取消信号即退出，不再产出。
    pub fn start(&self, request: Request, handler: Arc<dyn StreamHandler>, identity: Identity) {
        let id = request.request_id.clone();
        let token = self.token.child_token();
        let state = Arc::new(Mutex::new(StreamState::Starting));
        self.subscriptions.insert(
            id.clone(),
            Subscription {
                token: token.clone(),
                state: state.clone(),
            },
        );
        debug!(subscription_id = %id, operation = %request.operation, "Subscription registered");

        let table = self.subscriptions.clone();
        let outbound = self.outbound.clone();
        self.tracker.spawn(async move {
            let opened = tokio::select! {
                biased;
                _ = token.cancelled() => return,
                opened = handler.open(&request.params, &identity) => opened,
            };
            let mut updates = match opened {
                Ok(updates) => updates,
                Err(err) => {
                    finish(&table, &outbound, &id, StreamState::Errored, Some(err)).await;
                    return;
                }
            };
            set_state(&state, StreamState::Active);
            info!(subscription_id = %id, operation = %request.operation, "Subscription active");

            let mut sequence: u64 = 0;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    next = updates.next() => next,
                };
                match next {
                    Some(Ok(payload)) => {
                        sequence += 1;
                        let frame = Outgoing::Message(PushFrame::update(id.as_str(), sequence, payload).into());
                        let sent = tokio::select! {
                            biased;
                            _ = token.cancelled() => break,
                            sent = outbound.send(frame) => sent,
                        };
                        if sent.is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        finish(&table, &outbound, &id, StreamState::Errored, Some(err.into())).await;
                        break;
                    }
                    None => {
                        finish(&table, &outbound, &id, StreamState::Completed, None).await;
                        break;
                    }
                }
            }
            debug!(subscription_id = %id, updates = sequence, "Subscription producer exited");
        });
    }

    /// # Summary
    /// 客户端取消订阅。
    ///
    /// # Logic
    /// 先移除订阅并触发取消，再写出 `cancelled` 结束帧；
    /// 已在出站队列中的更新仍会先于结束帧送达。
    ///
    /// # Returns
    /// 订阅存在并被取消时返回 true。
    pub async fn cancel(&self, subscription_id: &str) -> bool {
        let Some((id, subscription)) = self.subscriptions.remove(subscription_id) else {
            return false;
        };
        subscription.token.cancel();
        set_state(&subscription.state, StreamState::Cancelled);
        info!(subscription_id = %id, "Subscription cancelled by client");
        let frame = Outgoing::Message(PushFrame::end(id.as_str(), EndReason::Cancelled).into());
        let sent = tokio::select! {
            biased;
            _ = self.token.cancelled() => false,
            sent = self.outbound.send(frame) => sent.is_ok(),
        };
        if !sent {
            debug!(subscription_id = %id, "Connection gone before cancellation ack");
        }
        true
    }

    /// # Summary
    /// 连接拆除时取消全部订阅。
    ///
    /// # Logic
    /// 结束帧只做尽力投递：出站队列已满或已关闭时直接丢弃，拆除过程不会因此阻塞。
    pub fn close_all(&self) {
        let ids: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let Some((id, subscription)) = self.subscriptions.remove(&id) else {
                continue;
            };
            subscription.token.cancel();
            set_state(&subscription.state, StreamState::Cancelled);
            let frame = Outgoing::Message(PushFrame::end(id.as_str(), EndReason::Cancelled).into());
            match self.outbound.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!(subscription_id = %id, "Outbound queue full, dropping stream end"),
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }
}

/// 生产者自行结束订阅：仅当订阅仍在表中时写出结束帧
async fn finish(
    table: &Table,
    outbound: &mpsc::Sender<Outgoing>,
    id: &str,
    outcome: StreamState,
    error: Option<GatewayError>,
) {
    let Some((_, subscription)) = table.remove(id) else {
        return;
    };
    set_state(&subscription.state, outcome);
    let frame = match error {
        Some(err) => {
            warn!(subscription_id = %id, code = %err.code, error = %err.message, "Subscription failed");
            let message = err.public_message();
            PushFrame::end_with_error(id, err.code, message)
        }
        None => {
            info!(subscription_id = %id, "Subscription completed");
            PushFrame::end(id, EndReason::Completed)
        }
    };
    let sent = tokio::select! {
        biased;
        _ = subscription.token.cancelled() => false,
        sent = outbound.send(Outgoing::Message(frame.into())) => sent.is_ok(),
    };
    if !sent {
        debug!(subscription_id = %id, "Connection gone before stream end");
    }
}
