//! 主应用程序入口
//!
//! 加载配置、组装各层依赖并启动 Axum Web API 服务。

use std::{env, path::PathBuf, sync::Arc};

use application::{
    memory::{MemoryMessageRepository, MemoryUserRepository},
    Clock, DeliveryCoordinator, DeliveryDependencies, IdentityResolver,
    MessageHistoryDependencies, MessageHistoryService, MessageRepository, PasswordHasher,
    PresenceRegistry, RegisteredUserResolver, SystemClock, UserRepository, UserService,
    UserServiceDependencies,
};
use config::AppConfig;
use domain::UserEmail;
use infrastructure::{BcryptPasswordHasher, Infrastructure};
use tracing_subscriber::EnvFilter;
use web_api::{router_with_cors, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let config_path = env::var_os("APP_CONFIG").map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref())?;
    if config.uses_development_secret() {
        tracing::warn!("正在使用开发环境 JWT 密钥，生产环境请设置 APP_JWT__SECRET");
    }

    let user_repository: Arc<dyn UserRepository>;
    let message_repository: Arc<dyn MessageRepository>;
    let password_hasher: Arc<dyn PasswordHasher>;
    if config.database.url.is_some() {
        let infrastructure = Infrastructure::connect(&config).await?;
        tracing::info!("使用 PostgreSQL 存储");
        user_repository = infrastructure.user_repository();
        message_repository = infrastructure.message_repository();
        password_hasher = infrastructure.password_hasher_trait();
    } else {
        tracing::warn!("未配置数据库，使用进程内存储，重启后数据丢失");
        user_repository = Arc::new(MemoryUserRepository::new());
        message_repository = Arc::new(MemoryMessageRepository::new());
        password_hasher = Arc::new(BcryptPasswordHasher::new(config.server.bcrypt_cost));
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    // 在线注册表随进程启动创建，随进程退出销毁
    let presence = Arc::new(PresenceRegistry::new());

    let admin_emails = config
        .admin
        .emails
        .iter()
        .map(|email| UserEmail::parse(email.as_str()))
        .collect::<Result<Vec<_>, _>>()?;
    if !admin_emails.is_empty() {
        tracing::info!(count = admin_emails.len(), "已配置管理员邮箱");
    }

    let user_service = Arc::new(
        UserService::new(UserServiceDependencies {
            user_repository: user_repository.clone(),
            password_hasher,
            clock: clock.clone(),
            presence: presence.clone(),
        })
        .with_admin_emails(admin_emails),
    );

    let delivery = Arc::new(DeliveryCoordinator::new(DeliveryDependencies {
        user_repository: user_repository.clone(),
        message_repository: message_repository.clone(),
        presence: presence.clone(),
        clock,
    }));

    let history = Arc::new(MessageHistoryService::new(MessageHistoryDependencies {
        message_repository,
        delivery: delivery.clone(),
    }));

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let identity: Arc<dyn IdentityResolver> =
        Arc::new(RegisteredUserResolver::new(jwt_service.clone(), user_repository));

    let state = AppState::new(user_service, delivery, history, presence, jwt_service, identity);
    let app = router_with_cors(state, &config.server.cors_origins);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("服务器启动在 http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("服务器已停止");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听退出信号失败");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始优雅关闭");
}
