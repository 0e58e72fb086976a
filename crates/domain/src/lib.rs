//! 聊天后端核心领域模型
//!
//! 包含用户、私聊消息等核心实体，以及相关的值对象与错误定义。
//! 在线状态不属于领域实体，由应用层的在线注册表维护。

pub mod errors;
pub mod message;
pub mod user;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use message::*;
pub use user::*;
pub use value_objects::*;
