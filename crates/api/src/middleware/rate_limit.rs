//! # 限流
//!
//! 以身份主体为键的固定窗口计数器，WebSocket 请求与 HTTP 请求共用同一份额度。

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use fullon_core::auth::entity::Identity;
use fullon_core::common::time::TimeProvider;
use fullon_core::config::RateLimitConfig;
use std::sync::Arc;
use std::time::Duration;

use crate::error::GatewayError;
use crate::protocol::ErrorCode;
use crate::server::AppState;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: DateTime<Utc>,
    count: u32,
}

/// # Summary
/// 固定窗口限流器。
///
/// # Invariants
/// - 每个主体在一个窗口内最多放行 `limit` 次，窗口到期后计数归零。
/// - `limit == 0` 表示不限流。
/// - 时间只来自注入的 `TimeProvider`。
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    clock: Arc<dyn TimeProvider>,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            limit: config.requests,
            window: config.window(),
            clock,
            windows: DashMap::new(),
        }
    }

    /// # Summary
    /// 为主体记一次请求。
    ///
    /// # Returns
    /// 超出额度返回 `RATE_LIMIT_EXCEEDED`，被拒绝的请求不计入额度。
    pub fn check(&self, subject: &str) -> Result<(), GatewayError> {
        if self.limit == 0 {
            return Ok(());
        }
        let now = self.clock.now();
        let mut entry = self.windows.entry(subject.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });
        if self.clock.elapsed_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }
        if entry.count >= self.limit {
            tracing::warn!(subject, limit = self.limit, "Rate limit exceeded");
            return Err(GatewayError::new(
                ErrorCode::RateLimitExceeded,
                format!("Rate limit of {} requests per {}s exceeded", self.limit, self.window.as_secs()),
            ));
        }
        entry.count += 1;
        Ok(())
    }

    /// 清理已过期的窗口
    pub fn purge_expired(&self) {
        self.windows
            .retain(|_, w| self.clock.elapsed_since(w.started) < self.window);
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

/// HTTP 限流中间件，必须在 `auth_middleware` 之后应用
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let subject = req
        .extensions()
        .get::<Identity>()
        .map(|identity| identity.subject.clone())
        .ok_or_else(|| GatewayError::new(ErrorCode::AuthFailed, "Missing identity context"))?;
    state.rate_limiter.check(&subject)?;
    Ok(next.run(req).await)
}
