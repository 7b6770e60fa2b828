//! # 鉴权中间件
//!
//! 基于 JWT 的身份校验：网关只校验凭证，不负责签发。

use async_trait::async_trait;
use axum::extract::{FromRequestParts, Query, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, Utc};
use fullon_core::auth::entity::Identity;
use fullon_core::auth::error::AuthError;
use fullon_core::auth::port::Authenticator;
use fullon_core::common::time::TimeProvider;
use fullon_core::config::AuthConfig;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::GatewayError;
use crate::server::AppState;

/// JWT 载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// # Summary
/// HMAC 签名 JWT 的校验器。
///
/// # Invariants
/// - 只接受配置指定的那一种算法。
/// - 必须携带 `exp` 与 `sub`；带 `iat` 时额外限制最长有效期为 `expiry_secs`。
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
    max_age_secs: u64,
    clock: Arc<dyn TimeProvider>,
}

impl JwtAuthenticator {
    /// # Summary
    /// 根据配置构造校验器。
    ///
    /// # Returns
    /// 算法名未知或不属于 HMAC 家族时返回 `InvalidToken`。
    pub fn new(config: &AuthConfig, clock: Arc<dyn TimeProvider>) -> Result<Self, AuthError> {
        let algorithm = Algorithm::from_str(&config.algorithm)
            .map_err(|_| AuthError::InvalidToken(format!("unknown algorithm {}", config.algorithm)))?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::InvalidToken(format!(
                "algorithm {} needs a public key, only HMAC secrets are supported",
                config.algorithm
            )));
        }
        let mut validation = Validation::new(algorithm);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Ok(Self {
            key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            max_age_secs: config.expiry_secs,
            clock,
        })
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn validate(&self, token: &str) -> Result<Identity, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let claims = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })?
            .claims;

        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }
        if let Some(iat) = claims.iat {
            let now = u64::try_from(self.clock.now().timestamp()).unwrap_or(0);
            if now > iat.saturating_add(self.max_age_secs) {
                return Err(AuthError::Expired);
            }
        }

        let expires_at = i64::try_from(claims.exp)
            .ok()
            .and_then(|exp| DateTime::<Utc>::from_timestamp(exp, 0));
        Ok(Identity {
            subject: claims.sub,
            role: claims.role,
            expires_at,
        })
    }
}

/// 查询参数中的凭证 (百分号编码已解码)
#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// # Summary
/// 从请求中取出 Bearer 凭证。
///
/// # Logic
/// 1. 优先读取 `Authorization: Bearer <token>`。
/// 2. 否则读取查询参数 `token` (浏览器 WebSocket 无法自定义请求头)。
pub fn bearer_token(req: &Request) -> Result<String, AuthError> {
    if let Some(header) = req.headers().get(AUTHORIZATION) {
        let value = header
            .to_str()
            .map_err(|_| AuthError::InvalidToken("Invalid auth header".into()))?;
        return value
            .strip_prefix("Bearer ")
            .map(|t| t.trim().to_string())
            .ok_or_else(|| {
                tracing::warn!("Invalid Bearer format");
                AuthError::InvalidToken("Invalid Bearer format".into())
            });
    }

    Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(query)| query.token)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)
}

/// 校验凭证并把 `Identity` 注入 request extensions
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, GatewayError> {
    let token = bearer_token(&req).inspect_err(|e| tracing::warn!("Rejected request without usable token: {}", e))?;

    let identity = match state.authenticator.validate(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!("JWT verification failed: {:?}", e);
            return Err(e.into());
        }
    };

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}

// 在提取器中获取当前身份的快捷方式
pub struct CurrentIdentity(pub Identity);

impl<S> FromRequestParts<S> for CurrentIdentity
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| GatewayError::from(AuthError::MissingToken))?;
        Ok(CurrentIdentity(identity))
    }
}
