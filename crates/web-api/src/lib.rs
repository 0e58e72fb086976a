//! Web API 层。
//!
//! 提供 Axum 路由，将 HTTP / WebSocket 请求委托给应用层的用例服务。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{AdminUser, AuthResponse, AuthUser, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::{router, router_with_cors};
pub use state::AppState;
