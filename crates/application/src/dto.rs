use domain::{Message, MessageId, MessageType, Timestamp, User, UserId, UserRole, UserStatus};
use serde::{Deserialize, Serialize};

/// 对外暴露的消息记录（实时事件与 HTTP 响应共用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDto {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub receiver_id: UserId,
    pub receiver_name: String,
    pub content: String,
    pub message_type: MessageType,
    pub is_read: bool,
    pub is_delivered: bool,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_me: Option<bool>,
}

impl MessageDto {
    pub fn new(message: &Message, sender_name: &str, receiver_name: &str) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id,
            sender_name: sender_name.to_owned(),
            receiver_id: message.receiver_id,
            receiver_name: receiver_name.to_owned(),
            content: message.content.as_str().to_owned(),
            message_type: message.message_type,
            is_read: message.is_read,
            is_delivered: message.is_delivered,
            created_at: message.created_at,
            is_me: None,
        }
    }

    /// 以 viewer 的视角标注是否为自己发送
    pub fn for_viewer(mut self, viewer: UserId) -> Self {
        self.is_me = Some(self.sender_id == viewer);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDto {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub status: UserStatus,
    pub bio: String,
    pub profile_picture: String,
    pub last_seen: Timestamp,
    /// 实时在线标记，来自在线注册表而非持久化状态
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online: Option<bool>,
}

impl From<&User> for UserDto {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.as_str().to_owned(),
            email: user.email.as_str().to_owned(),
            role: user.role,
            status: user.status,
            bio: user.bio.clone(),
            profile_picture: user.profile_picture.clone(),
            last_seen: user.last_seen,
            online: None,
        }
    }
}

/// 管理后台的用户统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatsDto {
    pub total_users: u64,
    pub total_admins: u64,
    pub online_users: u64,
    pub offline_users: u64,
    pub recent_users: Vec<UserDto>,
}
