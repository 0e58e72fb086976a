//! 进程内在线注册表
//!
//! 维护 用户身份 → 当前活动连接 的唯一映射，是“某用户此刻是否在线”的唯一依据。
//! 注册表不做持久化，进程重启后所有用户都视为离线，直到重新登录。

use std::collections::HashMap;
use std::fmt;

use domain::UserId;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::events::ServerEvent;

/// 连接唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 一条实时连接的可寻址端点
///
/// 推送只写入连接的出站队列，不等待对端确认；
/// 两个句柄相等当且仅当它们指向同一条连接。
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(sender: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
        }
    }

    /// 创建句柄以及对应的出站接收端
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self::new(sender), receiver)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// 尽力推送，连接已关闭时返回 false
    pub fn push(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

/// 在线注册表
///
/// 所有操作都是内存中的 O(1) 读写，不做任何 I/O；
/// 推送在释放锁之后进行。
#[derive(Default)]
pub struct PresenceRegistry {
    connections: RwLock<HashMap<UserId, ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 无条件覆盖该用户的映射（重连时后写者胜出），返回被替换的旧句柄
    ///
    /// 旧连接不会被主动关闭，只是不再接收推送。
    pub async fn register(
        &self,
        user_id: UserId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let connection_id = handle.id();
        let replaced = self.connections.write().await.insert(user_id, handle);

        match &replaced {
            Some(previous) => tracing::info!(
                user_id = %user_id,
                connection_id = %connection_id,
                replaced_connection_id = %previous.id(),
                "用户重新登录，替换旧连接"
            ),
            None => tracing::info!(
                user_id = %user_id,
                connection_id = %connection_id,
                "用户上线"
            ),
        }

        replaced
    }

    /// 仅当存储的句柄就是调用方的句柄时才移除映射
    ///
    /// 迟到的断开事件不会驱逐更新的重连登记。返回是否真正移除。
    pub async fn unregister(&self, user_id: UserId, handle: &ConnectionHandle) -> bool {
        let mut connections = self.connections.write().await;
        remove_if_current(&mut connections, user_id, handle)
    }

    /// 与 `unregister` 相同，移除成功时在同一把写锁内向其余在线连接扇出事件
    ///
    /// 之后的重新登记必然晚于这次扇出，其他用户不会在上线通知之后才收到下线通知。
    pub async fn unregister_and_broadcast(
        &self,
        user_id: UserId,
        handle: &ConnectionHandle,
        event: ServerEvent,
    ) -> bool {
        let mut connections = self.connections.write().await;
        if !remove_if_current(&mut connections, user_id, handle) {
            return false;
        }

        for other in connections.values() {
            other.push(event.clone());
        }
        true
    }

    pub async fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.connections.read().await.get(&user_id).cloned()
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    /// 当前所有在线用户的时间点快照
    pub async fn snapshot(&self) -> Vec<UserId> {
        self.connections.read().await.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// 尽力推送的唯一入口
    ///
    /// 用户离线或连接已关闭都不是错误，返回 false；不重试。
    pub async fn push_if_online(&self, user_id: UserId, event: ServerEvent) -> bool {
        let Some(handle) = self.lookup(user_id).await else {
            tracing::debug!(user_id = %user_id, "用户不在线，跳过推送");
            return false;
        };

        let delivered = handle.push(event);
        if !delivered {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %handle.id(),
                "连接已关闭，推送被丢弃"
            );
        }
        delivered
    }

    /// 向除指定用户外的所有在线连接扇出事件，返回成功写入的连接数
    pub async fn broadcast_except(&self, user_id: UserId, event: ServerEvent) -> usize {
        let targets: Vec<ConnectionHandle> = self
            .connections
            .read()
            .await
            .iter()
            .filter(|(id, _)| **id != user_id)
            .map(|(_, handle)| handle.clone())
            .collect();

        targets
            .iter()
            .filter(|handle| handle.push(event.clone()))
            .count()
    }
}

fn remove_if_current(
    connections: &mut HashMap<UserId, ConnectionHandle>,
    user_id: UserId,
    handle: &ConnectionHandle,
) -> bool {
    match connections.get(&user_id) {
        Some(current) if current == handle => {
            connections.remove(&user_id);
            tracing::info!(
                user_id = %user_id,
                connection_id = %handle.id(),
                "用户下线"
            );
            true
        }
        Some(current) => {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %handle.id(),
                current_connection_id = %current.id(),
                "忽略过期的断开事件"
            );
            false
        }
        None => false,
    }
}
