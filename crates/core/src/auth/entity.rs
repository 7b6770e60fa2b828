use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 经过鉴权的调用方身份，挂载在每个入站请求或连接上。
///
/// # Invariants
/// - `subject` 必须非空，是限流与日志关联的唯一键。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    // 主体标识 (JWT `sub`)
    pub subject: String,
    // 角色 (可选)
    pub role: Option<String>,
    // 凭证过期时间
    pub expires_at: Option<DateTime<Utc>>,
}

impl Identity {
    /// 仅以主体标识构造身份
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role: None,
            expires_at: None,
        }
    }
}
