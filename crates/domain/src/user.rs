use std::fmt;
use std::str::FromStr;

use crate::errors::DomainError;
use crate::value_objects::{PasswordHash, Timestamp, UserEmail, UserId, Username};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

/// 持久化的在线状态。
///
/// 实时在线与否以内存注册表为准，这里只记录最后一次已知状态，
/// 供离线查询（例如用户列表）使用。
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Offline,
    Away,
    Busy,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Offline => "offline",
            UserStatus::Away => "away",
            UserStatus::Busy => "busy",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(UserStatus::Online),
            "offline" => Ok(UserStatus::Offline),
            "away" => Ok(UserStatus::Away),
            "busy" => Ok(UserStatus::Busy),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown status {other}"),
            )),
        }
    }
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }
}

impl FromStr for UserRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            other => Err(DomainError::invalid_argument(
                "role",
                format!("unknown role {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: Username,
    pub email: UserEmail,
    #[serde(skip_serializing)] // 密码字段不暴露给客户端
    pub password: PasswordHash,
    pub role: UserRole,
    pub status: UserStatus,
    pub last_seen: Timestamp,
    pub bio: String,
    pub profile_picture: String,
    pub created_at: Timestamp,
}

impl User {
    pub fn register(
        id: UserId,
        name: Username,
        email: UserEmail,
        password: PasswordHash,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            name,
            email,
            password,
            role: UserRole::User,
            status: UserStatus::Offline,
            last_seen: now,
            bio: String::new(),
            profile_picture: String::new(),
            created_at: now,
        }
    }

    pub fn mark_online(&mut self, now: Timestamp) {
        self.status = UserStatus::Online;
        self.last_seen = now;
    }

    pub fn mark_offline(&mut self, now: Timestamp) {
        self.status = UserStatus::Offline;
        self.last_seen = now;
    }

    pub fn promote_to_admin(&mut self) {
        self.role = UserRole::Admin;
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}
