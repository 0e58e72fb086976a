use async_trait::async_trait;
use domain::{Message, MessageId, RepositoryError, Timestamp, User, UserEmail, UserId, UserStatus};

/// 按角色与持久化状态统计的用户数量
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserCounts {
    pub total: u64,
    pub admins: u64,
    pub online: u64,
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// 创建用户，邮箱已存在时返回 `RepositoryError::Conflict`
    async fn create(&self, user: User) -> Result<User, RepositoryError>;
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError>;
    async fn find_by_email(&self, email: UserEmail) -> Result<Option<User>, RepositoryError>;
    /// 列出除指定用户外的所有用户
    async fn list_except(&self, id: UserId) -> Result<Vec<User>, RepositoryError>;
    /// 所有用户，按注册时间升序
    async fn list_all(&self) -> Result<Vec<User>, RepositoryError>;
    async fn counts(&self) -> Result<UserCounts, RepositoryError>;
    /// 最近注册的用户，按注册时间降序
    async fn recent(&self, limit: u32) -> Result<Vec<User>, RepositoryError>;
    async fn set_status(
        &self,
        id: UserId,
        status: UserStatus,
        last_seen: Timestamp,
    ) -> Result<(), RepositoryError>;
}

#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    // 保存消息，返回持久化后的规范记录
    async fn create(&self, message: Message) -> Result<Message, RepositoryError>;

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    // 原子地将消息置为已读，返回本次调用是否发生了状态变化
    async fn mark_read(&self, id: MessageId) -> Result<bool, RepositoryError>;

    // 将 sender 发给 receiver 的所有未读消息置为已读，返回被更新的消息ID
    async fn mark_conversation_read(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<Vec<MessageId>, RepositoryError>;

    // 将用户加入隐藏集合，返回更新后的消息；消息不存在时返回 None
    async fn hide_for(
        &self,
        id: MessageId,
        user_id: UserId,
    ) -> Result<Option<Message>, RepositoryError>;

    async fn delete(&self, id: MessageId) -> Result<(), RepositoryError>;

    // 两个用户之间的会话，按创建时间升序，排除 viewer 已隐藏的消息
    async fn conversation(
        &self,
        viewer_id: UserId,
        other_id: UserId,
    ) -> Result<Vec<Message>, RepositoryError>;

    // 接收方未读且未隐藏的消息数量
    async fn count_unread(&self, receiver_id: UserId) -> Result<u64, RepositoryError>;
}
