use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::password::PasswordHasherError;

/// 应用层错误
///
/// 存储故障统一归为 `TransientStoreFailure`，由调用方决定如何呈现，
/// 本层不做自动重试。
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("recipient not found")]
    RecipientNotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("message not found")]
    MessageNotFound,
    #[error("requested resource not found")]
    NotFound,
    #[error("resource already exists")]
    Conflict,
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    #[error("store failure: {0}")]
    TransientStoreFailure(String),
}

impl ApplicationError {
    pub fn malformed(message: impl Into<String>) -> Self {
        ApplicationError::MalformedEvent(message.into())
    }

    /// 可以回传给客户端的描述，不包含存储层细节
    pub fn public_message(&self) -> String {
        match self {
            ApplicationError::TransientStoreFailure(_) => "temporary failure, please retry".into(),
            ApplicationError::Password(_) => "internal error".into(),
            other => other.to_string(),
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound => ApplicationError::NotFound,
            RepositoryError::Conflict => ApplicationError::Conflict,
            RepositoryError::Storage { message } => ApplicationError::TransientStoreFailure(message),
        }
    }
}
