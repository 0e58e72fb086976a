//! 实时事件协议
//!
//! 每个事件是一个 JSON 文本帧：`{"event": "<名称>", "data": {...}}`。
//! 客户端事件在边界处按固定结构反序列化，缺少必填字段的负载直接拒绝，
//! 不会进入后续处理流程。

use domain::{MessageId, MessageType, UserId};
use serde::{Deserialize, Serialize};

use crate::{dto::MessageDto, error::ApplicationError};

/// 客户端 → 服务器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Signin(SigninPayload),
    SendMessage(SendMessagePayload),
    Typing(TypingPayload),
    MarkRead(MarkReadPayload),
}

/// 登录负载，兼容 `{"userId": "..."}` 与裸字符串两种写法
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SigninPayload {
    Object {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    Bare(UserId),
}

impl SigninPayload {
    pub fn user_id(&self) -> UserId {
        match self {
            SigninPayload::Object { user_id } | SigninPayload::Bare(user_id) => *user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub receiver_id: UserId,
    pub is_typing: bool,
    #[serde(default)]
    pub sender_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadPayload {
    pub message_id: MessageId,
}

impl ClientEvent {
    /// 解析一个文本帧
    pub fn parse(text: &str) -> Result<Self, ApplicationError> {
        serde_json::from_str(text).map_err(|err| ApplicationError::malformed(err.to_string()))
    }

    /// 读取信封中的事件名，负载不完整时也能取到
    pub fn envelope_name(text: &str) -> Option<String> {
        let envelope: serde_json::Value = serde_json::from_str(text).ok()?;
        envelope.get("event")?.as_str().map(str::to_owned)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Signin(_) => "signin",
            ClientEvent::SendMessage(_) => "send_message",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::MarkRead(_) => "mark_read",
        }
    }
}

/// 服务器 → 客户端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// 发送方确认，携带服务器分配的ID与时间戳
    MessageSent(MessageDto),
    /// 推送给在线接收方
    ReceiveMessage(MessageDto),
    MessageError {
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    UserTyping {
        sender_id: UserId,
        sender_name: Option<String>,
        is_typing: bool,
    },
    #[serde(rename_all = "camelCase")]
    MessageRead {
        message_id: MessageId,
    },
    #[serde(rename_all = "camelCase")]
    UserOnline {
        user_id: UserId,
    },
    #[serde(rename_all = "camelCase")]
    UserOffline {
        user_id: UserId,
    },
    /// 协议层错误（格式错误、未登录等），连接保持打开
    Error {
        error: String,
    },
}

impl ServerEvent {
    pub fn error(error: impl Into<String>) -> Self {
        ServerEvent::Error {
            error: error.into(),
        }
    }

    pub fn message_error(error: impl Into<String>) -> Self {
        ServerEvent::MessageError {
            error: error.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
