use std::sync::Arc;

use domain::{DomainError, RepositoryError, User, UserEmail, UserId, UserStatus, Username};
use uuid::Uuid;

use crate::{
    clock::Clock,
    dto::{UserDto, UserStatsDto},
    error::ApplicationError,
    password::PasswordHasher,
    presence::PresenceRegistry,
    repository::UserRepository,
};

const MIN_PASSWORD_LEN: usize = 6;
const RECENT_USERS_LIMIT: u32 = 5;

#[derive(Debug, Clone)]
pub struct RegisterUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AuthenticateUserRequest {
    pub email: String,
    pub password: String,
}

pub struct UserServiceDependencies {
    pub user_repository: Arc<dyn UserRepository>,
    pub password_hasher: Arc<dyn PasswordHasher>,
    pub clock: Arc<dyn Clock>,
    pub presence: Arc<PresenceRegistry>,
}

pub struct UserService {
    deps: UserServiceDependencies,
    admin_emails: Vec<UserEmail>,
}

impl UserService {
    pub fn new(deps: UserServiceDependencies) -> Self {
        Self {
            deps,
            admin_emails: Vec::new(),
        }
    }

    /// 使用这些邮箱注册的账号获得管理员角色
    pub fn with_admin_emails(mut self, emails: Vec<UserEmail>) -> Self {
        self.admin_emails = emails;
        self
    }

    pub async fn register(&self, request: RegisterUserRequest) -> Result<User, ApplicationError> {
        let name = Username::parse(request.name)?;
        let email = UserEmail::parse(request.email)?;
        if request.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(DomainError::invalid_argument(
                "password",
                format!("must be at least {MIN_PASSWORD_LEN} characters"),
            )
            .into());
        }

        if self
            .deps
            .user_repository
            .find_by_email(email.clone())
            .await?
            .is_some()
        {
            return Err(DomainError::UserAlreadyExists.into());
        }

        let password_hash = self.deps.password_hasher.hash(&request.password).await?;

        let is_admin = self.admin_emails.contains(&email);
        let mut user = User::register(
            UserId::from(Uuid::new_v4()),
            name,
            email,
            password_hash,
            self.deps.clock.now(),
        );
        if is_admin {
            user.promote_to_admin();
        }

        // 并发注册同一邮箱时由存储的唯一约束兜底
        let stored = self
            .deps
            .user_repository
            .create(user)
            .await
            .map_err(|err| match err {
                RepositoryError::Conflict => ApplicationError::from(DomainError::UserAlreadyExists),
                other => other.into(),
            })?;

        tracing::info!(user_id = %stored.id, role = stored.role.as_str(), "新用户注册");
        Ok(stored)
    }

    /// 校验邮箱与密码，成功后将用户状态置为在线
    pub async fn authenticate(
        &self,
        request: AuthenticateUserRequest,
    ) -> Result<User, ApplicationError> {
        let email = UserEmail::parse(request.email).map_err(|_| ApplicationError::Unauthenticated)?;
        let mut user = self
            .deps
            .user_repository
            .find_by_email(email)
            .await?
            .ok_or(ApplicationError::Unauthenticated)?;

        let password_ok = self
            .deps
            .password_hasher
            .verify(&request.password, &user.password)
            .await?;
        if !password_ok {
            tracing::warn!(user_id = %user.id, "密码校验失败");
            return Err(ApplicationError::Unauthenticated);
        }

        let now = self.deps.clock.now();
        self.deps
            .user_repository
            .set_status(user.id, UserStatus::Online, now)
            .await?;
        user.mark_online(now);

        Ok(user)
    }

    pub async fn logout(&self, user_id: UserId) -> Result<(), ApplicationError> {
        self.set_status(user_id, UserStatus::Offline).await
    }

    pub async fn find_user(&self, user_id: UserId) -> Result<User, ApplicationError> {
        self.deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| DomainError::UserNotFound.into())
    }

    /// 列出除当前用户外的所有用户，并附带在线注册表中的实时在线标记
    pub async fn list_users_except(&self, user_id: UserId) -> Result<Vec<UserDto>, ApplicationError> {
        let users = self.deps.user_repository.list_except(user_id).await?;
        self.with_online_flags(&users).await
    }

    /// 确认调用方是管理员
    pub async fn require_admin(&self, user_id: UserId) -> Result<User, ApplicationError> {
        let user = self
            .deps
            .user_repository
            .find_by_id(user_id)
            .await?
            .ok_or(ApplicationError::Unauthenticated)?;

        if !user.is_admin() {
            tracing::warn!(user_id = %user_id, "非管理员访问管理接口");
            return Err(ApplicationError::Forbidden);
        }
        Ok(user)
    }

    /// 全部用户，带实时在线标记
    pub async fn list_all_users(&self) -> Result<Vec<UserDto>, ApplicationError> {
        let users = self.deps.user_repository.list_all().await?;
        self.with_online_flags(&users).await
    }

    /// 用户总数、管理员数、按持久化状态统计的在线/离线数，以及最近注册的用户
    pub async fn user_stats(&self) -> Result<UserStatsDto, ApplicationError> {
        let counts = self.deps.user_repository.counts().await?;
        let recent = self.deps.user_repository.recent(RECENT_USERS_LIMIT).await?;

        Ok(UserStatsDto {
            total_users: counts.total,
            total_admins: counts.admins,
            online_users: counts.online,
            offline_users: counts.total.saturating_sub(counts.online),
            recent_users: recent.iter().map(UserDto::from).collect(),
        })
    }

    async fn with_online_flags(&self, users: &[User]) -> Result<Vec<UserDto>, ApplicationError> {
        let mut result = Vec::with_capacity(users.len());
        for user in users {
            let mut dto = UserDto::from(user);
            dto.online = Some(self.deps.presence.is_online(user.id).await);
            result.push(dto);
        }
        Ok(result)
    }

    /// 更新持久化的用户状态与最后活跃时间
    pub async fn set_status(
        &self,
        user_id: UserId,
        status: UserStatus,
    ) -> Result<(), ApplicationError> {
        self.deps
            .user_repository
            .set_status(user_id, status, self.deps.clock.now())
            .await?;
        Ok(())
    }
}
