use std::collections::BTreeSet;
use std::sync::Arc;

use application::{MessageRepository, UserCounts, UserRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Message, MessageContent, MessageId, MessageType, RepositoryError, Timestamp, User, UserEmail,
    UserId, UserRole, UserStatus,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            return RepositoryError::Conflict;
        }
    }
    tracing::error!(error = %err, "数据库操作失败");
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

const USER_COLUMNS: &str =
    "id, name, email, password_hash, role, status, last_seen, bio, profile_picture, created_at";

const MESSAGE_COLUMNS: &str = "id, sender_id, receiver_id, content, message_type, is_read, \
     is_delivered, created_at, deleted_for";

#[derive(Debug, FromRow)]
struct UserRecord {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    status: String,
    last_seen: DateTime<Utc>,
    bio: String,
    profile_picture: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRecord> for User {
    type Error = RepositoryError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        let name = domain::Username::parse(value.name).map_err(|err| invalid_data(err.to_string()))?;
        let email = UserEmail::parse(value.email).map_err(|err| invalid_data(err.to_string()))?;
        let password = domain::PasswordHash::new(value.password_hash)
            .map_err(|err| invalid_data(err.to_string()))?;
        let role = value
            .role
            .parse::<UserRole>()
            .map_err(|err| invalid_data(err.to_string()))?;
        let status = value
            .status
            .parse::<UserStatus>()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(User {
            id: UserId::from(value.id),
            name,
            email,
            password,
            role,
            status,
            last_seen: value.last_seen,
            bio: value.bio,
            profile_picture: value.profile_picture,
            created_at: value.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: String,
    message_type: String,
    is_read: bool,
    is_delivered: bool,
    created_at: DateTime<Utc>,
    deleted_for: Vec<Uuid>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let content =
            MessageContent::new(value.content).map_err(|err| invalid_data(err.to_string()))?;
        let message_type = value
            .message_type
            .parse::<MessageType>()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(Message {
            id: MessageId::from(value.id),
            sender_id: UserId::from(value.sender_id),
            receiver_id: UserId::from(value.receiver_id),
            content,
            message_type,
            is_read: value.is_read,
            is_delivered: value.is_delivered,
            created_at: value.created_at,
            deleted_for: value
                .deleted_for
                .into_iter()
                .map(UserId::from)
                .collect::<BTreeSet<_>>(),
        })
    }
}

#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: User) -> Result<User, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, role, status, last_seen, bio, profile_picture, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(Uuid::from(user.id))
        .bind(user.name.as_str())
        .bind(user.email.as_str())
        .bind(user.password.as_str())
        .bind(user.role.as_str())
        .bind(user.status.as_str())
        .bind(user.last_seen)
        .bind(user.bio.as_str())
        .bind(user.profile_picture.as_str())
        .bind(user.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        User::try_from(record)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn find_by_email(&self, email: UserEmail) -> Result<Option<User>, RepositoryError> {
        let record = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(User::try_from).transpose()
    }

    async fn list_except(&self, id: UserId) -> Result<Vec<User>, RepositoryError> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id <> $1 ORDER BY name"
        ))
        .bind(Uuid::from(id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }

    async fn list_all(&self) -> Result<Vec<User>, RepositoryError> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }

    async fn counts(&self) -> Result<UserCounts, RepositoryError> {
        let (total, admins, online) = sqlx::query_as::<_, (i64, i64, i64)>(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE role = 'admin'),
                   COUNT(*) FILTER (WHERE status = 'online')
            FROM users
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(UserCounts {
            total: total.max(0) as u64,
            admins: admins.max(0) as u64,
            online: online.max(0) as u64,
        })
    }

    async fn recent(&self, limit: u32) -> Result<Vec<User>, RepositoryError> {
        let records = sqlx::query_as::<_, UserRecord>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(User::try_from).collect()
    }

    async fn set_status(
        &self,
        id: UserId,
        status: UserStatus,
        last_seen: Timestamp,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE users SET status = $2, last_seen = $3 WHERE id = $1")
            .bind(Uuid::from(id))
            .bind(status.as_str())
            .bind(last_seen)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn create(&self, message: Message) -> Result<Message, RepositoryError> {
        let deleted_for: Vec<Uuid> = message.deleted_for.iter().copied().map(Uuid::from).collect();
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            INSERT INTO messages (id, sender_id, receiver_id, content, message_type, is_read, is_delivered, created_at, deleted_for)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.sender_id))
        .bind(Uuid::from(message.receiver_id))
        .bind(message.content.as_str())
        .bind(message.message_type.as_str())
        .bind(message.is_read)
        .bind(message.is_delivered)
        .bind(message.created_at)
        .bind(deleted_for)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Message::try_from(record)
    }

    async fn find_by_id(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn mark_read(&self, id: MessageId) -> Result<bool, RepositoryError> {
        // 条件更新保证并发标记时只有一次调用观察到变化
        let updated: Option<Uuid> = sqlx::query_scalar(
            "UPDATE messages SET is_read = TRUE WHERE id = $1 AND is_read = FALSE RETURNING id",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        if updated.is_some() {
            return Ok(true);
        }

        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM messages WHERE id = $1)")
            .bind(Uuid::from(id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        if exists {
            Ok(false)
        } else {
            Err(RepositoryError::NotFound)
        }
    }

    async fn mark_conversation_read(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
    ) -> Result<Vec<MessageId>, RepositoryError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE messages SET is_read = TRUE
            WHERE sender_id = $1 AND receiver_id = $2 AND is_read = FALSE
            RETURNING id
            "#,
        )
        .bind(Uuid::from(sender_id))
        .bind(Uuid::from(receiver_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(ids.into_iter().map(MessageId::from).collect())
    }

    async fn hide_for(
        &self,
        id: MessageId,
        user_id: UserId,
    ) -> Result<Option<Message>, RepositoryError> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            UPDATE messages
            SET deleted_for = CASE
                WHEN $2 = ANY(deleted_for) THEN deleted_for
                ELSE array_append(deleted_for, $2)
            END
            WHERE id = $1
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(Uuid::from(user_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        record.map(Message::try_from).transpose()
    }

    async fn delete(&self, id: MessageId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM messages WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        Ok(())
    }

    async fn conversation(
        &self,
        viewer_id: UserId,
        other_id: UserId,
    ) -> Result<Vec<Message>, RepositoryError> {
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS} FROM messages
            WHERE ((sender_id = $1 AND receiver_id = $2) OR (sender_id = $2 AND receiver_id = $1))
              AND NOT ($1 = ANY(deleted_for))
            ORDER BY created_at ASC
            "#
        ))
        .bind(Uuid::from(viewer_id))
        .bind(Uuid::from(other_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(Message::try_from).collect()
    }

    async fn count_unread(&self, receiver_id: UserId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM messages
            WHERE receiver_id = $1 AND is_read = FALSE AND NOT ($1 = ANY(deleted_for))
            "#,
        )
        .bind(Uuid::from(receiver_id))
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(count.max(0) as u64)
    }
}

/// 共享同一连接池的仓储集合
#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub user_repository: Arc<PgUserRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            user_repository: Arc::new(PgUserRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
