use std::sync::Arc;

use application::{MessageRepository, PasswordHasher, UserRepository};
use config::AppConfig;
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    password::BcryptPasswordHasher,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database is not configured")]
    MissingDatabaseUrl,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// 连接数据库、执行迁移并组装适配器
#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Arc<PgStorage>,
    pub password_hasher: Arc<BcryptPasswordHasher>,
}

impl Infrastructure {
    pub async fn connect(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let database_url = config
            .database
            .url
            .as_deref()
            .ok_or(InfrastructureError::MissingDatabaseUrl)?;

        let pool = create_pg_pool(database_url, config.database.max_connections).await?;
        MIGRATOR.run(&pool).await?;
        tracing::info!("数据库迁移完成");

        Ok(Self {
            storage: Arc::new(PgStorage::new(pool)),
            password_hasher: Arc::new(BcryptPasswordHasher::new(config.server.bcrypt_cost)),
        })
    }

    pub fn user_repository(&self) -> Arc<dyn UserRepository> {
        self.storage.user_repository.clone()
    }

    pub fn message_repository(&self) -> Arc<dyn MessageRepository> {
        self.storage.message_repository.clone()
    }

    pub fn password_hasher_trait(&self) -> Arc<dyn PasswordHasher> {
        self.password_hasher.clone()
    }
}
