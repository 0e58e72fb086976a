//! 消息投递协调
//!
//! 持久化在前、推送在后：消息一旦写入存储即视为已送达（`isDelivered = true`），
//! 对在线接收方的推送只是尽力而为，失败不会回滚也不会重试。

use std::sync::Arc;

use domain::{Message, MessageContent, MessageId, MessageType, RepositoryError, User, UserId};
use uuid::Uuid;

use crate::{
    clock::Clock,
    dto::MessageDto,
    error::ApplicationError,
    events::ServerEvent,
    presence::PresenceRegistry,
    repository::{MessageRepository, UserRepository},
};

#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub message_type: MessageType,
}

/// 按用户删除的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// 仅对操作者隐藏
    Hidden,
    /// 双方都已删除，记录已从存储中清除
    Purged,
}

impl DeleteOutcome {
    pub fn is_purged(&self) -> bool {
        matches!(self, DeleteOutcome::Purged)
    }
}

pub struct DeliveryDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub presence: Arc<PresenceRegistry>,
    pub clock: Arc<dyn Clock>,
}

pub struct DeliveryCoordinator {
    deps: DeliveryDependencies,
}

impl DeliveryCoordinator {
    pub fn new(deps: DeliveryDependencies) -> Self {
        Self { deps }
    }

    pub fn presence(&self) -> &Arc<PresenceRegistry> {
        &self.deps.presence
    }

    /// 发送一条私聊消息
    ///
    /// 接收方不存在时不写入任何记录。存储失败时不推送任何事件。
    pub async fn send(&self, request: SendMessageRequest) -> Result<MessageDto, ApplicationError> {
        let content = MessageContent::new(request.content)?;

        let sender = self
            .deps
            .user_repository
            .find_by_id(request.sender_id)
            .await?
            .ok_or(ApplicationError::Unauthenticated)?;
        let receiver = self
            .deps
            .user_repository
            .find_by_id(request.receiver_id)
            .await?
            .ok_or(ApplicationError::RecipientNotFound)?;

        let message = Message::new(
            MessageId::from(Uuid::new_v4()),
            sender.id,
            receiver.id,
            content,
            request.message_type,
            self.deps.clock.now(),
        );

        let stored = self
            .deps
            .message_repository
            .create(message)
            .await
            .inspect_err(|err| {
                tracing::error!(
                    sender_id = %sender.id,
                    receiver_id = %receiver.id,
                    error = %err,
                    "消息持久化失败"
                )
            })?;

        let dto = MessageDto::new(&stored, sender.name.as_str(), receiver.name.as_str());

        let pushed = self
            .deps
            .presence
            .push_if_online(receiver.id, ServerEvent::ReceiveMessage(dto.clone()))
            .await;
        self.deps
            .presence
            .push_if_online(sender.id, ServerEvent::MessageSent(dto.clone()))
            .await;

        tracing::info!(
            message_id = %stored.id,
            sender_id = %sender.id,
            receiver_id = %receiver.id,
            pushed,
            "消息已投递"
        );

        Ok(dto)
    }

    /// 标记消息已读
    ///
    /// `reader` 为 `Some` 时必须是消息的接收方。只有真正从未读变为已读的那一次调用
    /// 才会向在线的发送方推送回执，返回值表示是否发生了变化。
    pub async fn mark_read(
        &self,
        message_id: MessageId,
        reader: Option<UserId>,
    ) -> Result<bool, ApplicationError> {
        let message = self.find_message(message_id).await?;

        if let Some(reader) = reader {
            if reader != message.receiver_id {
                tracing::warn!(
                    message_id = %message_id,
                    reader_id = %reader,
                    "非接收方尝试标记已读"
                );
                return Err(ApplicationError::Forbidden);
            }
        }

        let changed = self
            .deps
            .message_repository
            .mark_read(message_id)
            .await
            .map_err(not_found_as_message)?;

        if changed {
            self.deps
                .presence
                .push_if_online(message.sender_id, ServerEvent::MessageRead { message_id })
                .await;
            tracing::debug!(message_id = %message_id, "消息已读");
        }

        Ok(changed)
    }

    /// 将 `other` 发给 `reader` 的所有未读消息置为已读，并为每条变化的消息推送回执
    pub async fn acknowledge_conversation_read(
        &self,
        reader: UserId,
        other: UserId,
    ) -> Result<Vec<MessageId>, ApplicationError> {
        let flipped = self
            .deps
            .message_repository
            .mark_conversation_read(other, reader)
            .await?;

        for message_id in &flipped {
            self.deps
                .presence
                .push_if_online(other, ServerEvent::MessageRead { message_id: *message_id })
                .await;
        }

        if !flipped.is_empty() {
            tracing::debug!(
                reader_id = %reader,
                other_id = %other,
                count = flipped.len(),
                "会话消息已读"
            );
        }

        Ok(flipped)
    }

    /// 为指定参与者删除消息，双方都删除后彻底清除
    pub async fn delete_for_user(
        &self,
        message_id: MessageId,
        user_id: UserId,
    ) -> Result<DeleteOutcome, ApplicationError> {
        let message = self.find_message(message_id).await?;
        if !message.is_participant(user_id) {
            return Err(ApplicationError::Forbidden);
        }

        let updated = self
            .deps
            .message_repository
            .hide_for(message_id, user_id)
            .await?
            .ok_or(ApplicationError::MessageNotFound)?;

        if updated.hidden_for_everyone() {
            match self.deps.message_repository.delete(message_id).await {
                Ok(()) | Err(RepositoryError::NotFound) => {}
                Err(err) => return Err(err.into()),
            }
            tracing::info!(message_id = %message_id, "消息已被双方删除并清除");
            Ok(DeleteOutcome::Purged)
        } else {
            tracing::info!(message_id = %message_id, user_id = %user_id, "消息已对用户隐藏");
            Ok(DeleteOutcome::Hidden)
        }
    }

    async fn find_message(&self, message_id: MessageId) -> Result<Message, ApplicationError> {
        self.deps
            .message_repository
            .find_by_id(message_id)
            .await?
            .ok_or(ApplicationError::MessageNotFound)
    }

    /// 查询用户，用于组装消息的展示名
    pub(crate) async fn find_user(&self, user_id: UserId) -> Result<Option<User>, ApplicationError> {
        Ok(self.deps.user_repository.find_by_id(user_id).await?)
    }
}

fn not_found_as_message(err: RepositoryError) -> ApplicationError {
    match err {
        RepositoryError::NotFound => ApplicationError::MessageNotFound,
        other => other.into(),
    }
}
