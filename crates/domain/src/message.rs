use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::DomainError;
use crate::value_objects::{MessageContent, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Audio,
    Video,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::Audio => "audio",
            MessageType::Video => "video",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            "audio" => Ok(MessageType::Audio),
            "video" => Ok(MessageType::Video),
            other => Err(DomainError::invalid_argument(
                "message_type",
                format!("unknown message type {other}"),
            )),
        }
    }
}

/// 删除操作的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HideOutcome {
    /// 仅对当前用户隐藏
    Hidden,
    /// 双方都已删除，记录应被彻底清除
    PurgeRequired,
}

/// 一对一私聊消息
///
/// 持久化后仅有两处可变：`is_read`（只能由 false 变为 true）
/// 以及 `deleted_for` 隐藏集合（只增不减）。
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: MessageContent,
    pub message_type: MessageType,
    pub is_read: bool,
    /// 表示“服务器已接收并持久化”，不代表已推送到接收方设备
    pub is_delivered: bool,
    pub created_at: Timestamp,
    #[serde(skip_serializing, default)] // 隐藏集合不暴露给客户端
    pub deleted_for: BTreeSet<UserId>,
}

impl Message {
    pub fn new(
        id: MessageId,
        sender_id: UserId,
        receiver_id: UserId,
        content: MessageContent,
        message_type: MessageType,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            sender_id,
            receiver_id,
            content,
            message_type,
            is_read: false,
            is_delivered: true,
            created_at,
            deleted_for: BTreeSet::new(),
        }
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.sender_id == user_id || self.receiver_id == user_id
    }

    /// 标记为已读，返回本次调用是否改变了状态
    pub fn mark_read(&mut self) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        true
    }

    pub fn is_hidden_for(&self, user_id: UserId) -> bool {
        self.deleted_for.contains(&user_id)
    }

    /// 对指定参与者隐藏消息
    pub fn hide_for(&mut self, user_id: UserId) -> Result<HideOutcome, DomainError> {
        if !self.is_participant(user_id) {
            return Err(DomainError::OperationNotAllowed);
        }
        self.deleted_for.insert(user_id);

        if self.hidden_for_everyone() {
            Ok(HideOutcome::PurgeRequired)
        } else {
            Ok(HideOutcome::Hidden)
        }
    }

    /// 发送方和接收方都已隐藏
    pub fn hidden_for_everyone(&self) -> bool {
        self.deleted_for.contains(&self.sender_id) && self.deleted_for.contains(&self.receiver_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn message_between(sender: UserId, receiver: UserId) -> Message {
        Message::new(
            MessageId::from(Uuid::new_v4()),
            sender,
            receiver,
            MessageContent::new("hi").unwrap(),
            MessageType::Text,
            Utc::now(),
        )
    }

    fn user() -> UserId {
        UserId::from(Uuid::new_v4())
    }

    #[test]
    fn new_message_is_delivered_but_unread() {
        let message = message_between(user(), user());
        assert!(message.is_delivered);
        assert!(!message.is_read);
    }

    #[test]
    fn mark_read_reports_first_transition_only() {
        let mut message = message_between(user(), user());
        assert!(message.mark_read());
        assert!(!message.mark_read());
        assert!(message.is_read);
    }

    #[test]
    fn hiding_for_both_participants_requires_purge() {
        let (alice, bob) = (user(), user());
        let mut message = message_between(alice, bob);

        assert_eq!(message.hide_for(alice).unwrap(), HideOutcome::Hidden);
        // 重复删除是幂等的
        assert_eq!(message.hide_for(alice).unwrap(), HideOutcome::Hidden);
        assert!(message.is_hidden_for(alice));
        assert!(!message.is_hidden_for(bob));

        assert_eq!(message.hide_for(bob).unwrap(), HideOutcome::PurgeRequired);
    }

    #[test]
    fn outsider_cannot_hide_message() {
        let mut message = message_between(user(), user());
        assert_eq!(
            message.hide_for(user()),
            Err(DomainError::OperationNotAllowed)
        );
        assert!(message.deleted_for.is_empty());
    }

    #[test]
    fn message_type_round_trips_through_str() {
        for kind in [MessageType::Text, MessageType::Image, MessageType::Video] {
            assert_eq!(kind.as_str().parse::<MessageType>().unwrap(), kind);
        }
        assert!("sticker".parse::<MessageType>().is_err());
    }
}
