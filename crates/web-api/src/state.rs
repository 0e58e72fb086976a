use std::sync::Arc;

use application::{
    DeliveryCoordinator, IdentityResolver, MessageHistoryService, PresenceRegistry,
    SessionDependencies, UserService,
};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub user_service: Arc<UserService>,
    pub delivery: Arc<DeliveryCoordinator>,
    pub history: Arc<MessageHistoryService>,
    pub presence: Arc<PresenceRegistry>,
    pub jwt_service: Arc<JwtService>,
    pub identity: Arc<dyn IdentityResolver>,
}

impl AppState {
    /// `identity` 解析请求凭证，`jwt_service` 负责签发
    pub fn new(
        user_service: Arc<UserService>,
        delivery: Arc<DeliveryCoordinator>,
        history: Arc<MessageHistoryService>,
        presence: Arc<PresenceRegistry>,
        jwt_service: Arc<JwtService>,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        Self {
            user_service,
            delivery,
            history,
            presence,
            jwt_service,
            identity,
        }
    }

    /// 单条实时连接所需的依赖
    pub fn session_dependencies(&self) -> SessionDependencies {
        SessionDependencies {
            presence: self.presence.clone(),
            delivery: self.delivery.clone(),
            user_service: self.user_service.clone(),
        }
    }
}
