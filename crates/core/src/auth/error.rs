use thiserror::Error;

/// # Summary
/// 鉴权域错误枚举。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
/// - 所有变体对外统一映射为 `AUTH_FAILED`。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    // 请求未携带凭证
    #[error("Missing bearer token")]
    MissingToken,
    // 凭证格式或签名非法
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    // 凭证已过期
    #[error("Token expired")]
    Expired,
}
