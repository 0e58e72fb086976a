#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    memory::{MemoryMessageRepository, MemoryUserRepository},
    Clock, DeliveryCoordinator, DeliveryDependencies, IdentityResolver,
    MessageHistoryDependencies, MessageHistoryService, MessageRepository, PasswordHasher,
    PresenceRegistry, RegisteredUserResolver, SystemClock, UserRepository, UserService,
    UserServiceDependencies,
};
use futures_util::{SinkExt, StreamExt};
use domain::UserEmail;
use infrastructure::BcryptPasswordHasher;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};
use web_api::{router, AppState, JwtConfig, JwtService};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// 以此邮箱注册的账号是管理员
pub const ADMIN_EMAIL: &str = "admin@example.com";

/// 使用内存存储组装完整的应用状态
pub fn build_state() -> AppState {
    let user_repository: Arc<dyn UserRepository> = Arc::new(MemoryUserRepository::new());
    let message_repository: Arc<dyn MessageRepository> = Arc::new(MemoryMessageRepository::new());
    // 测试中使用最低代价的 bcrypt
    let password_hasher: Arc<dyn PasswordHasher> = Arc::new(BcryptPasswordHasher::new(Some(4)));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let presence = Arc::new(PresenceRegistry::new());

    let admin_email = UserEmail::parse(ADMIN_EMAIL).expect("admin email");
    let user_service = Arc::new(
        UserService::new(UserServiceDependencies {
            user_repository: user_repository.clone(),
            password_hasher,
            clock: clock.clone(),
            presence: presence.clone(),
        })
        .with_admin_emails(vec![admin_email]),
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
    let jwt_service = Arc::new(JwtService::new(JwtConfig {
        secret: "integration-test-secret-key-0123456789".to_string(),
        expiration_hours: 1,
    }));

    let identity: Arc<dyn IdentityResolver> =
        Arc::new(RegisteredUserResolver::new(jwt_service.clone(), user_repository));

    AppState::new(user_service, delivery, history, presence, jwt_service, identity)
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        let app = router(build_state());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            client: Client::new(),
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// 注册用户，返回 (token, userId)
    pub async fn register(&self, name: &str) -> (String, String) {
        let body = self
            .client
            .post(self.url("/api/auth/register"))
            .json(&json!({
                "name": name,
                "email": format!("{}@example.com", name.to_lowercase()),
                "password": "secret123"
            }))
            .send()
            .await
            .expect("register")
            .json::<Value>()
            .await
            .expect("register json");

        let token = body["token"].as_str().expect("token").to_string();
        let id = body["user"]["id"].as_str().expect("user id").to_string();
        (token, id)
    }

    pub async fn get(&self, path: &str, token: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .expect("get")
    }

    pub async fn connect(&self, token: &str) -> WsClient {
        let (ws, _) = connect_async(format!("ws://{}/ws?token={}", self.addr, token))
            .await
            .expect("websocket connect");
        ws
    }

    /// 连接并登录，等待在线注册完成
    pub async fn connect_signed_in(&self, token: &str, user_id: &str) -> WsClient {
        let mut ws = self.connect(token).await;
        send_event(&mut ws, "signin", json!({ "userId": user_id })).await;
        self.wait_online(token, user_id).await;
        ws
    }

    pub async fn wait_online(&self, token: &str, user_id: &str) {
        for _ in 0..50 {
            let body = self
                .get("/api/presence", token)
                .await
                .json::<Value>()
                .await
                .expect("presence json");
            let online = body["online"]
                .as_array()
                .map(|ids| ids.iter().any(|id| id == user_id))
                .unwrap_or(false);
            if online {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("user {user_id} never came online");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub async fn send_event(ws: &mut WsClient, event: &str, data: Value) {
    send_raw(ws, &json!({ "event": event, "data": data }).to_string()).await;
}

pub async fn send_raw(ws: &mut WsClient, text: &str) {
    ws.send(WsMessage::Text(text.to_string().into()))
        .await
        .expect("ws send");
}

/// 读取下一个事件，跳过控制帧
pub async fn next_event(ws: &mut WsClient) -> Value {
    loop {
        let message = timeout(Duration::from_secs(3), ws.next())
            .await
            .expect("timed out waiting for event")
            .expect("stream ended")
            .expect("ws error");
        if let WsMessage::Text(text) = message {
            return serde_json::from_str(text.as_str()).expect("event json");
        }
    }
}

/// 读取下一个指定名称的事件，跳过其他事件
pub async fn next_named(ws: &mut WsClient, name: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["event"] == name {
            return event;
        }
    }
}

/// 断言短时间内没有收到指定事件
pub async fn assert_no_event(ws: &mut WsClient, name: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match timeout(remaining, ws.next()).await {
            Err(_) => return,
            Ok(Some(Ok(WsMessage::Text(text)))) => {
                let event: Value = serde_json::from_str(text.as_str()).expect("event json");
                assert_ne!(event["event"], name, "unexpected event {event}");
            }
            Ok(Some(Ok(_))) => {}
            Ok(_) => return,
        }
    }
}
