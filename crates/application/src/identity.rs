use std::sync::Arc;

use async_trait::async_trait;
use domain::UserId;

use crate::{error::ApplicationError, repository::UserRepository};

/// 身份解析器
///
/// 校验持有者凭证（bearer token）并返回经过验证的用户身份。
/// 凭证缺失或无效时返回 `ApplicationError::Unauthenticated`。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<UserId, ApplicationError>;
}

/// 在凭证校验之上确认用户仍然存在
///
/// 签名有效但用户已不在存储中的凭证（例如内存存储重启之前签发的）视为无效。
pub struct RegisteredUserResolver {
    credentials: Arc<dyn IdentityResolver>,
    users: Arc<dyn UserRepository>,
}

impl RegisteredUserResolver {
    pub fn new(credentials: Arc<dyn IdentityResolver>, users: Arc<dyn UserRepository>) -> Self {
        Self { credentials, users }
    }
}

#[async_trait]
impl IdentityResolver for RegisteredUserResolver {
    async fn resolve(&self, credential: &str) -> Result<UserId, ApplicationError> {
        let user_id = self.credentials.resolve(credential).await?;
        if self.users.find_by_id(user_id).await?.is_none() {
            tracing::warn!(user_id = %user_id, "凭证对应的用户不存在");
            return Err(ApplicationError::Unauthenticated);
        }
        Ok(user_id)
    }
}
