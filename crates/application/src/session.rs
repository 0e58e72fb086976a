//! 单条实时连接的生命周期
//!
//! 状态机：`Unauthenticated → SignedIn → Disconnected`（终态）。
//! 会话由连接自己的读任务独占驱动，因此同一连接上的事件严格按到达顺序处理。

use std::sync::Arc;

use domain::{UserId, UserStatus};

use crate::{
    delivery::{DeliveryCoordinator, SendMessageRequest},
    error::ApplicationError,
    events::{ClientEvent, MarkReadPayload, SendMessagePayload, ServerEvent, TypingPayload},
    presence::{ConnectionHandle, PresenceRegistry},
    services::UserService,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    SignedIn(UserId),
    Disconnected,
}

#[derive(Clone)]
pub struct SessionDependencies {
    pub presence: Arc<PresenceRegistry>,
    pub delivery: Arc<DeliveryCoordinator>,
    pub user_service: Arc<UserService>,
}

pub struct ConnectionSession {
    /// 握手时由凭证解析出的身份
    principal: UserId,
    handle: ConnectionHandle,
    state: SessionState,
    deps: SessionDependencies,
}

impl ConnectionSession {
    pub fn new(principal: UserId, handle: ConnectionHandle, deps: SessionDependencies) -> Self {
        Self {
            principal,
            handle,
            state: SessionState::Unauthenticated,
            deps,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// 处理一个文本帧，连接始终保持打开
    ///
    /// 格式错误的 `send_message` 回送 `message_error`，其余格式错误回送 `error`。
    pub async fn handle_frame(&mut self, text: &str) {
        match ClientEvent::parse(text) {
            Ok(event) => self.handle_event(event).await,
            Err(err) => {
                let event_name = ClientEvent::envelope_name(text);
                tracing::warn!(
                    connection_id = %self.handle.id(),
                    event = event_name.as_deref().unwrap_or("-"),
                    error = %err,
                    "收到格式错误的事件"
                );
                let reply = if event_name.as_deref() == Some("send_message") {
                    ServerEvent::message_error(err.public_message())
                } else {
                    ServerEvent::error(err.public_message())
                };
                self.reply(reply);
            }
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent) {
        if self.state == SessionState::Disconnected {
            tracing::debug!(event = event.name(), "连接已断开，忽略事件");
            return;
        }

        match event {
            ClientEvent::Signin(payload) => self.signin(payload.user_id()).await,
            ClientEvent::SendMessage(payload) => self.send_message(payload).await,
            ClientEvent::Typing(payload) => self.typing(payload).await,
            ClientEvent::MarkRead(payload) => self.mark_read(payload).await,
        }
    }

    /// 连接关闭时调用，多次调用只生效一次
    pub async fn disconnect(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Disconnected);
        let SessionState::SignedIn(user_id) = previous else {
            return;
        };

        let removed = self
            .deps
            .presence
            .unregister_and_broadcast(user_id, &self.handle, ServerEvent::UserOffline { user_id })
            .await;
        if !removed {
            // 用户已通过新连接重新登录，保持在线
            return;
        }

        self.persist_offline(user_id).await;
    }

    /// 写入离线状态，写入前后都确认用户没有通过新连接重新登录
    async fn persist_offline(&self, user_id: UserId) {
        if self.deps.presence.is_online(user_id).await {
            return;
        }

        if let Err(err) = self
            .deps
            .user_service
            .set_status(user_id, UserStatus::Offline)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %err, "更新离线状态失败");
            return;
        }

        if self.deps.presence.is_online(user_id).await {
            tracing::debug!(user_id = %user_id, "写入离线状态期间用户已重新登录");
            if let Err(err) = self
                .deps
                .user_service
                .set_status(user_id, UserStatus::Online)
                .await
            {
                tracing::warn!(user_id = %user_id, error = %err, "恢复在线状态失败");
            }
        }
    }

    async fn signin(&mut self, user_id: UserId) {
        if user_id != self.principal {
            tracing::warn!(
                principal = %self.principal,
                requested = %user_id,
                "登录身份与凭证不一致"
            );
            self.reply(ServerEvent::error(ApplicationError::Forbidden.public_message()));
            return;
        }

        let already_signed_in = self.state == SessionState::SignedIn(user_id);
        self.deps.presence.register(user_id, self.handle.clone()).await;
        self.state = SessionState::SignedIn(user_id);
        if already_signed_in {
            return;
        }

        if let Err(err) = self
            .deps
            .user_service
            .set_status(user_id, UserStatus::Online)
            .await
        {
            tracing::warn!(user_id = %user_id, error = %err, "更新在线状态失败");
        }

        self.deps
            .presence
            .broadcast_except(user_id, ServerEvent::UserOnline { user_id })
            .await;
    }

    async fn send_message(&mut self, payload: SendMessagePayload) {
        let Some(user_id) = self.signed_in() else {
            self.reply(ServerEvent::message_error(
                ApplicationError::Unauthenticated.public_message(),
            ));
            return;
        };
        if payload.sender_id != user_id {
            self.reply(ServerEvent::message_error(
                ApplicationError::Forbidden.public_message(),
            ));
            return;
        }

        let request = SendMessageRequest {
            sender_id: user_id,
            receiver_id: payload.receiver_id,
            content: payload.content,
            message_type: payload.message_type,
        };

        match self.deps.delivery.send(request).await {
            Ok(dto) => {
                // 确认已推送到注册表中的连接；若本连接已被替换，仍需在本连接上确认
                let registered = self.deps.presence.lookup(user_id).await;
                if registered.as_ref() != Some(&self.handle) {
                    self.reply(ServerEvent::MessageSent(dto));
                }
            }
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "发送消息失败");
                self.reply(ServerEvent::message_error(err.public_message()));
            }
        }
    }

    async fn typing(&mut self, payload: TypingPayload) {
        let Some(user_id) = self.signed_in() else {
            self.reply(ServerEvent::error(ApplicationError::Unauthenticated.public_message()));
            return;
        };

        self.deps
            .presence
            .push_if_online(
                payload.receiver_id,
                ServerEvent::UserTyping {
                    sender_id: user_id,
                    sender_name: payload.sender_name,
                    is_typing: payload.is_typing,
                },
            )
            .await;
    }

    async fn mark_read(&mut self, payload: MarkReadPayload) {
        let Some(user_id) = self.signed_in() else {
            self.reply(ServerEvent::error(ApplicationError::Unauthenticated.public_message()));
            return;
        };

        if let Err(err) = self
            .deps
            .delivery
            .mark_read(payload.message_id, Some(user_id))
            .await
        {
            tracing::debug!(
                user_id = %user_id,
                message_id = %payload.message_id,
                error = %err,
                "标记已读失败"
            );
            self.reply(ServerEvent::error(err.public_message()));
        }
    }

    fn signed_in(&self) -> Option<UserId> {
        match self.state {
            SessionState::SignedIn(user_id) => Some(user_id),
            _ => None,
        }
    }

    /// 回送到本连接，对端已关闭时丢弃并返回 false
    fn reply(&self, event: ServerEvent) -> bool {
        let delivered = self.handle.push(event);
        if !delivered {
            tracing::debug!(connection_id = %self.handle.id(), "连接已关闭，回复被丢弃");
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::SystemClock,
        delivery::DeliveryDependencies,
        events::SigninPayload,
        memory::{MemoryMessageRepository, MemoryUserRepository},
        password::{PasswordHasher, PasswordHasherError},
        repository::{MessageRepository, UserRepository},
        services::UserServiceDependencies,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use domain::{MessageType, PasswordHash, User, UserEmail, Username};
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;
    use uuid::Uuid;

    struct NoopHasher;

    #[async_trait]
    impl PasswordHasher for NoopHasher {
        async fn hash(&self, plaintext: &str) -> Result<PasswordHash, PasswordHasherError> {
            PasswordHash::new(plaintext).map_err(|err| PasswordHasherError::hash_error(err.to_string()))
        }

        async fn verify(
            &self,
            plaintext: &str,
            hashed: &PasswordHash,
        ) -> Result<bool, PasswordHasherError> {
            Ok(plaintext == hashed.as_str())
        }
    }

    struct Harness {
        deps: SessionDependencies,
        users: Arc<MemoryUserRepository>,
        messages: Arc<MemoryMessageRepository>,
    }

    fn harness() -> Harness {
        let users = Arc::new(MemoryUserRepository::new());
        let messages = Arc::new(MemoryMessageRepository::new());
        let presence = Arc::new(PresenceRegistry::new());
        let clock = Arc::new(SystemClock);
        let delivery = Arc::new(DeliveryCoordinator::new(DeliveryDependencies {
            user_repository: users.clone(),
            message_repository: messages.clone(),
            presence: presence.clone(),
            clock: clock.clone(),
        }));
        let user_service = Arc::new(UserService::new(UserServiceDependencies {
            user_repository: users.clone(),
            password_hasher: Arc::new(NoopHasher),
            clock,
            presence: presence.clone(),
        }));
        Harness {
            deps: SessionDependencies {
                presence,
                delivery,
                user_service,
            },
            users,
            messages,
        }
    }

    impl Harness {
        async fn add_user(&self, name: &str) -> UserId {
            let user = User::register(
                UserId::from(Uuid::new_v4()),
                Username::parse(name).unwrap(),
                UserEmail::parse(format!("{}@example.com", name.to_lowercase())).unwrap(),
                PasswordHash::new("hash").unwrap(),
                Utc::now(),
            );
            self.users.create(user).await.unwrap().id
        }

        fn open(&self, user_id: UserId) -> (ConnectionSession, UnboundedReceiver<ServerEvent>) {
            let (handle, rx) = ConnectionHandle::channel();
            (ConnectionSession::new(user_id, handle, self.deps.clone()), rx)
        }

        async fn signed_in(&self, user_id: UserId) -> (ConnectionSession, UnboundedReceiver<ServerEvent>) {
            let (mut session, rx) = self.open(user_id);
            session
                .handle_event(ClientEvent::Signin(SigninPayload::Object { user_id }))
                .await;
            (session, rx)
        }
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn send_frame(sender: UserId, receiver: UserId, content: &str) -> String {
        json!({
            "event": "send_message",
            "data": {"senderId": sender, "receiverId": receiver, "content": content}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_signin_registers_and_broadcasts_online() {
        let h = harness();
        let alice = h.add_user("Alice").await;
        let bob = h.add_user("Bob").await;
        let (_bob_session, mut bob_rx) = h.signed_in(bob).await;

        let (session, _alice_rx) = h.signed_in(alice).await;

        assert_eq!(session.state(), SessionState::SignedIn(alice));
        assert_eq!(h.deps.presence.lookup(alice).await.as_ref(), Some(session.handle()));
        assert_eq!(drain(&mut bob_rx), vec![ServerEvent::UserOnline { user_id: alice }]);

        let stored = h.users.find_by_id(alice).await.unwrap().unwrap();
        assert_eq!(stored.status, UserStatus::Online);
    }

    #[tokio::test]
    async fn test_signin_as_someone_else_is_rejected() {
        let h = harness();
        let alice = h.add_user("Alice").await;
        let bob = h.add_user("Bob").await;
        let (mut session, mut rx) = h.open(alice);

        session
            .handle_event(ClientEvent::Signin(SigninPayload::Bare(bob)))
            .await;

        assert_eq!(session.state(), SessionState::Unauthenticated);
        assert!(!h.deps.presence.is_online(bob).await);
        assert!(matches!(drain(&mut rx).as_slice(), [ServerEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn test_send_before_signin_gets_message_error() {
        let h = harness();
        let alice = h.add_user("Alice").await;
        let bob = h.add_user("Bob").await;
        let (mut session, mut rx) = h.open(alice);

        session.handle_frame(&send_frame(alice, bob, "hi")).await;

        assert!(matches!(drain(&mut rx).as_slice(), [ServerEvent::MessageError { .. }]));
        assert!(h.messages.conversation(alice, bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_session_usable() {
        let h = harness();
        let alice = h.add_user("Alice").await;
        let bob = h.add_user("Bob").await;
        let (mut session, mut rx) = h.signed_in(alice).await;

        session
            .handle_frame(r#"{"event":"send_message","data":{"content":"no ids"}}"#)
            .await;
        assert!(matches!(drain(&mut rx).as_slice(), [ServerEvent::MessageError { .. }]));

        let missing_receiver = json!({
            "event": "send_message",
            "data": {"senderId": alice, "content": "hi"}
        });
        session.handle_frame(&missing_receiver.to_string()).await;
        match drain(&mut rx).as_slice() {
            [ServerEvent::MessageError { error }] => assert!(error.contains("receiverId")),
            other => panic!("unexpected events {other:?}"),
        }

        // 其他事件的格式错误仍然是协议错误
        session.handle_frame(r#"{"event":"mark_read","data":{}}"#).await;
        assert!(matches!(drain(&mut rx).as_slice(), [ServerEvent::Error { .. }]));

        session.handle_frame(&send_frame(alice, bob, "still here")).await;
        assert!(matches!(drain(&mut rx).as_slice(), [ServerEvent::MessageSent(_)]));
        assert_eq!(session.state(), SessionState::SignedIn(alice));
    }

    #[tokio::test]
    async fn test_send_to_unknown_recipient_reports_error() {
        let h = harness();
        let alice = h.add_user("Alice").await;
        let (mut session, mut rx) = h.signed_in(alice).await;

        session
            .handle_frame(&send_frame(alice, UserId::from(Uuid::new_v4()), "anyone?"))
            .await;

        match drain(&mut rx).as_slice() {
            [ServerEvent::MessageError { error }] => assert_eq!(error, "recipient not found"),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_typing_is_forwarded_only_to_online_recipient() {
        let h = harness();
        let alice = h.add_user("Alice").await;
        let bob = h.add_user("Bob").await;
        let (mut alice_session, mut alice_rx) = h.signed_in(alice).await;

        // 接收方离线时静默丢弃
        alice_session
            .handle_event(ClientEvent::Typing(TypingPayload {
                receiver_id: bob,
                is_typing: true,
                sender_name: Some("Alice".into()),
            }))
            .await;
        assert!(drain(&mut alice_rx).is_empty());

        let (_bob_session, mut bob_rx) = h.signed_in(bob).await;
        drain(&mut alice_rx);
        alice_session
            .handle_event(ClientEvent::Typing(TypingPayload {
                receiver_id: bob,
                is_typing: true,
                sender_name: Some("Alice".into()),
            }))
            .await;

        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerEvent::UserTyping {
                sender_id: alice,
                sender_name: Some("Alice".into()),
                is_typing: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_stale_disconnect_does_not_evict_reconnect() {
        let h = harness();
        let alice = h.add_user("Alice").await;
        let bob = h.add_user("Bob").await;
        let (_bob_session, mut bob_rx) = h.signed_in(bob).await;

        let (mut first, _rx1) = h.signed_in(alice).await;
        let (second, _rx2) = h.signed_in(alice).await;
        drain(&mut bob_rx);

        first.disconnect().await;

        assert_eq!(first.state(), SessionState::Disconnected);
        assert_eq!(h.deps.presence.lookup(alice).await.as_ref(), Some(second.handle()));
        assert!(drain(&mut bob_rx).is_empty());
        let stored = h.users.find_by_id(alice).await.unwrap().unwrap();
        assert_eq!(stored.status, UserStatus::Online);
    }

    #[tokio::test]
    async fn test_disconnect_broadcasts_offline_once() {
        let h = harness();
        let alice = h.add_user("Alice").await;
        let bob = h.add_user("Bob").await;
        let (_bob_session, mut bob_rx) = h.signed_in(bob).await;
        let (mut session, _rx) = h.signed_in(alice).await;
        drain(&mut bob_rx);

        session.disconnect().await;
        session.disconnect().await;

        assert_eq!(drain(&mut bob_rx), vec![ServerEvent::UserOffline { user_id: alice }]);
        assert!(!h.deps.presence.is_online(alice).await);
        let stored = h.users.find_by_id(alice).await.unwrap().unwrap();
        assert_eq!(stored.status, UserStatus::Offline);

        // 断开后的事件被忽略
        session.handle_frame(&send_frame(alice, bob, "ghost")).await;
        assert!(h.messages.conversation(alice, bob).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_message_then_signin_fetch_and_read() {
        let h = harness();
        let alice = h.add_user("Alice").await;
        let bob = h.add_user("Bob").await;
        let (mut alice_session, mut alice_rx) = h.signed_in(alice).await;

        // Bob 离线时收到消息
        alice_session
            .handle_event(ClientEvent::SendMessage(SendMessagePayload {
                sender_id: alice,
                receiver_id: bob,
                content: "ping".into(),
                message_type: MessageType::Text,
            }))
            .await;
        let sent = match drain(&mut alice_rx).as_slice() {
            [ServerEvent::MessageSent(dto)] => dto.clone(),
            other => panic!("unexpected events {other:?}"),
        };

        let (mut bob_session, mut bob_rx) = h.signed_in(bob).await;
        assert!(drain(&mut bob_rx).is_empty());
        assert_eq!(drain(&mut alice_rx), vec![ServerEvent::UserOnline { user_id: bob }]);

        let stored = h.messages.find_by_id(sent.id).await.unwrap().unwrap();
        assert!(stored.is_delivered);
        assert!(!stored.is_read);

        bob_session
            .handle_event(ClientEvent::MarkRead(MarkReadPayload { message_id: sent.id }))
            .await;
        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerEvent::MessageRead { message_id: sent.id }]
        );

        // 重复标记不再产生回执
        bob_session
            .handle_event(ClientEvent::MarkRead(MarkReadPayload { message_id: sent.id }))
            .await;
        assert!(drain(&mut alice_rx).is_empty());
        assert!(drain(&mut bob_rx).is_empty());
    }
}
