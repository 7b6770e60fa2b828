use crate::auth::entity::Identity;
use crate::auth::error::AuthError;
use async_trait::async_trait;

/// # Summary
/// 凭证校验能力接口 (Port)。
/// 网关只消费校验结果，不负责凭证签发。
///
/// # Invariants
/// - 实现类必须保证线程安全 (`Send` + `Sync`)。
/// - 校验无副作用，可被任意并发调用。
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// # Summary
    /// 校验 Bearer 凭证并解析出调用方身份。
    ///
    /// # Arguments
    /// * `token`: 不含 `Bearer ` 前缀的原始凭证。
    ///
    /// # Returns
    /// 合法返回 `Identity`，否则返回 `AuthError`。
    async fn validate(&self, token: &str) -> Result<Identity, AuthError>;
}
