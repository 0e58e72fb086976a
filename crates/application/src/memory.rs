//! 内存存储实现
//!
//! 未配置数据库时使用，同时作为测试替身。所有状态随进程结束而丢失。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{Message, MessageId, RepositoryError, Timestamp, User, UserEmail, UserId, UserStatus};
use tokio::sync::RwLock;

use crate::repository::{MessageRepository, UserCounts, UserRepository};

#[derive(Default)]
pub struct MemoryUserRepository {
    users: RwLock<HashMap<UserId, User>>,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let mut users = self.users.write().await;
        if users.values().any(|existing| existing.email == user.email) {
            return Err(RepositoryError::Conflict);
        }
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: UserEmail) -> Result<Option<User>, RepositoryError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn list_except(&self, id: UserId) -> Result<Vec<User>, RepositoryError> {
        let mut users: Vec<User> = self
            .users
            .read()
            .await
            .values()
            .filter(|user| user.id != id)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        Ok(users)
    }

    async fn list_all(&self) -> Result<Vec<User>, RepositoryError> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by_key(|user| user.created_at);
        Ok(users)
    }

    async fn counts(&self) -> Result<UserCounts, RepositoryError> {
        let users = self.users.read().await;
        Ok(UserCounts {
            total: users.len() as u64,
            admins: users.values().filter(|user| user.is_admin()).count() as u64,
            online: users
                .values()
                .filter(|user| user.status == UserStatus::Online)
                .count() as u64,
        })
    }

    async fn recent(&self, limit: u32) -> Result<Vec<User>, RepositoryError> {
        let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        users.truncate(limit as usize);
        Ok(users)
    }

    async fn set_status(
        &self,
        id: UserId,
        status: UserStatus,
        last_seen: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        user.status = status;
        user.last_seen = last_seen;
        Ok(())
    }
}

/// 消息按插入顺序保存，读取时再按创建时间排序
#[derive(Default)]
pub struct MemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn between(message: &Message, a: UserId, b: UserId) -> bool {
    (message.sender_id == a && message.receiver_id == b)
        || (message.sender_id == b && message.receiver_id == a)
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError> {
        let mut messages = self.messages.write().await;
        if messages.iter().any(|existing| existing.id == message.id) {
            return Err(RepositoryError::Conflict);
        }
        messages.push(message.clone());
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .find(|message| message.id == id)
            .cloned())
    }

    async fn mark_read(&self, id: MessageId) -> Result<bool, RepositoryError> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|message| message.id == id)
            .ok_or(RepositoryError::NotFound)?;
        Ok(message.mark_read())
    }

    async fn mark_conversation_read(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        let mut messages = self.messages.write().await;
        Ok(messages
            .iter_mut()
            .filter(|message| message.sender_id == sender_id && message.receiver_id == receiver_id)
            .filter_map(|message| message.mark_read().then_some(message.id))
            .collect())
    }

    async fn hide_for(
        &self,
        id: MessageId,
        user_id: UserId,
    ) -> Result<Option<Message>, RepositoryError> {
        let mut messages = self.messages.write().await;
        let Some(message) = messages.iter_mut().find(|message| message.id == id) else {
            return Ok(None);
        };
        message.deleted_for.insert(user_id);
        Ok(Some(message.clone()))
    }

    async fn delete(&self, id: MessageId) -> Result<(), RepositoryError> {
        self.messages.write().await.retain(|message| message.id != id);
        Ok(())
    }

    async fn conversation(
        &self,
        viewer_id: UserId,
        other_id: UserId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut conversation: Vec<Message> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|message| between(message, viewer_id, other_id))
            .filter(|message| !message.is_hidden_for(viewer_id))
            .cloned()
            .collect();
        // 稳定排序，同一时间戳保持插入顺序
        conversation.sort_by_key(|message| message.created_at);
        Ok(conversation)
    }

    async fn count_unread(&self, receiver_id: UserId) -> Result<u64, RepositoryError> {
        let count = self
            .messages
            .read()
            .await
            .iter()
            .filter(|message| {
                message.receiver_id == receiver_id
                    && !message.is_read
                    && !message.is_hidden_for(receiver_id)
            })
            .count();
        Ok(count as u64)
    }
}
