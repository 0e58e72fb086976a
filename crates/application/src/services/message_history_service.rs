//! 会话历史查询
//!
//! 拉取两人之间的消息并附带“是否本人发送”标记；
//! 拉取的副作用是把对方发给自己的未读消息置为已读。

use std::sync::Arc;

use domain::{DomainError, UserId};

use crate::{
    delivery::DeliveryCoordinator, dto::MessageDto, error::ApplicationError,
    repository::MessageRepository,
};

pub struct MessageHistoryDependencies {
    pub message_repository: Arc<dyn MessageRepository>,
    pub delivery: Arc<DeliveryCoordinator>,
}

pub struct MessageHistoryService {
    deps: MessageHistoryDependencies,
}

impl MessageHistoryService {
    pub fn new(deps: MessageHistoryDependencies) -> Self {
        Self { deps }
    }

    /// 按创建时间升序返回 viewer 与 other 之间的会话，排除 viewer 已删除的消息
    ///
    /// 返回的记录反映拉取前的已读状态。
    pub async fn conversation(
        &self,
        viewer: UserId,
        other: UserId,
    ) -> Result<Vec<MessageDto>, ApplicationError> {
        let viewer_user = self
            .deps
            .delivery
            .find_user(viewer)
            .await?
            .ok_or(ApplicationError::Unauthenticated)?;
        let other_user = self
            .deps
            .delivery
            .find_user(other)
            .await?
            .ok_or(DomainError::UserNotFound)?;

        let messages = self
            .deps
            .message_repository
            .conversation(viewer, other)
            .await?;

        let result = messages
            .iter()
            .map(|message| {
                let (sender_name, receiver_name) = if message.sender_id == viewer {
                    (viewer_user.name.as_str(), other_user.name.as_str())
                } else {
                    (other_user.name.as_str(), viewer_user.name.as_str())
                };
                MessageDto::new(message, sender_name, receiver_name).for_viewer(viewer)
            })
            .collect();

        self.deps
            .delivery
            .acknowledge_conversation_read(viewer, other)
            .await?;

        Ok(result)
    }

    /// 未读且未被自己删除的消息数量
    pub async fn unread_count(&self, viewer: UserId) -> Result<u64, ApplicationError> {
        Ok(self.deps.message_repository.count_unread(viewer).await?)
    }
}
