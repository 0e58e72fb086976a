//! 领域模型错误定义
//!
//! 定义了领域层与存储边界上可能出现的错误类型。

use thiserror::Error;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 用户已存在（邮箱冲突）
    #[error("user already exists")]
    UserAlreadyExists,

    /// 用户不存在
    #[error("user not found")]
    UserNotFound,

    /// 消息不存在
    #[error("message not found")]
    MessageNotFound,

    /// 当前用户不是消息的参与者
    #[error("operation not allowed")]
    OperationNotAllowed,
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;

/// 存储层错误
///
/// 由仓储实现返回，应用层统一转换为对外错误。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record already exists")]
    Conflict,
    #[error("storage error: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}
