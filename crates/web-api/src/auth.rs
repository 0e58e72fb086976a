//! JWT 认证模块
//!
//! 提供 JWT token 生成、验证，以及从请求中提取当前用户的提取器。

use application::{ApplicationError, IdentityResolver};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query},
    http::{request::Parts, HeaderMap},
};
use config::JwtConfig;
use domain::UserId;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState};

/// JWT Claims 结构
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: Uuid,
    pub exp: i64, // 过期时间 (Unix timestamp)
}

/// JWT Token 服务
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_ref());
        let decoding_key = DecodingKey::from_secret(config.secret.as_ref());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// 生成 JWT token
    pub fn generate_token(&self, user_id: UserId) -> Result<String, ApiError> {
        let exp = chrono::Utc::now() + chrono::Duration::hours(self.config.expiration_hours);

        let claims = Claims {
            user_id: user_id.into(),
            exp: exp.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|err| {
            tracing::error!(error = %err, "生成 token 失败");
            ApiError::internal_server_error("token generation failed")
        })
    }

    /// 验证并解析 JWT token
    pub fn verify_token(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|token_data| token_data.claims)
            .map_err(|err| ApiError::unauthorized(format!("invalid token: {}", err)))
    }
}

#[async_trait]
impl IdentityResolver for JwtService {
    async fn resolve(&self, credential: &str) -> Result<UserId, ApplicationError> {
        self.verify_token(credential)
            .map(|claims| UserId::from(claims.user_id))
            .map_err(|_| ApplicationError::Unauthenticated)
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// 从 `Authorization: Bearer` 头或 `?token=` 查询参数中取出凭证
pub fn extract_credential(headers: &HeaderMap, parts_uri: &axum::http::Uri) -> Option<String> {
    let from_header = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned);

    from_header.or_else(|| {
        Query::<TokenQuery>::try_from_uri(parts_uri)
            .ok()
            .and_then(|Query(query)| query.token)
    })
}

/// 已认证的当前用户
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let credential = extract_credential(&parts.headers, &parts.uri)
            .ok_or_else(|| ApiError::unauthorized("missing credential"))?;

        let user_id = state.identity.resolve(&credential).await?;
        Ok(AuthUser(user_id))
    }
}

/// 已认证且角色为管理员的当前用户，非管理员返回 403
#[derive(Debug, Clone, Copy)]
pub struct AdminUser(pub UserId);

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser(user_id) = AuthUser::from_request_parts(parts, state).await?;
        state.user_service.require_admin(user_id).await?;
        Ok(AdminUser(user_id))
    }
}

/// 登录/注册响应
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: application::UserDto,
}
