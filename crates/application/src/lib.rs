//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：在线注册表、实时事件协议、
//! 消息投递协调以及单条连接的生命周期状态机，
//! 并定义对外部适配器（存储、身份解析、密码哈希）的抽象。

pub mod clock;
pub mod delivery;
pub mod dto;
pub mod error;
pub mod events;
pub mod identity;
pub mod memory;
pub mod password;
pub mod presence;
pub mod repository;
pub mod services;
pub mod session;

pub use clock::{Clock, SystemClock};
pub use delivery::{DeleteOutcome, DeliveryCoordinator, DeliveryDependencies, SendMessageRequest};
pub use dto::{MessageDto, UserDto, UserStatsDto};
pub use error::ApplicationError;
pub use events::{ClientEvent, ServerEvent};
pub use identity::{IdentityResolver, RegisteredUserResolver};
pub use password::{PasswordHasher, PasswordHasherError};
pub use presence::{ConnectionHandle, ConnectionId, PresenceRegistry};
pub use repository::{MessageRepository, UserCounts, UserRepository};
pub use services::{
    AuthenticateUserRequest, MessageHistoryDependencies, MessageHistoryService,
    RegisterUserRequest, UserService, UserServiceDependencies,
};
pub use session::{ConnectionSession, SessionDependencies, SessionState};
