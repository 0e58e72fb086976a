use application::{ConnectionHandle, ConnectionSession, ServerEvent};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::UserId;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;

/// WebSocket 连接
///
/// 读循环在当前任务中按到达顺序驱动会话状态机；
/// 写任务独占 socket 的发送端，合并会话出站事件与心跳回应。
/// 无论哪一端先结束，会话的断开处理都恰好执行一次。
pub struct WebSocketConnection {
    socket: WebSocket,
    session: ConnectionSession,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    user_id: UserId,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, state: AppState, user_id: UserId) -> Self {
        let (handle, events) = ConnectionHandle::channel();
        tracing::info!(user_id = %user_id, connection_id = %handle.id(), "WebSocket 连接已建立");

        let session = ConnectionSession::new(user_id, handle, state.session_dependencies());
        Self {
            socket,
            session,
            events,
            user_id,
        }
    }

    pub async fn run(self) {
        let Self {
            socket,
            mut session,
            mut events,
            user_id,
        } = self;
        let (mut sender, mut incoming) = socket.split();

        // 创建 mpsc channel 来解耦对 sender 的访问
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let mut send_task = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    Some(event) = events.recv() => match event.to_json() {
                        Ok(json) => WsMessage::Text(json.into()),
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize websocket payload");
                            continue;
                        }
                    },
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => WsMessage::Pong(data.into()),
                    },
                    else => break,
                };

                if sender.send(frame).await.is_err() {
                    tracing::debug!("WebSocket 写入失败");
                    break;
                }
            }
            tracing::debug!("WebSocket发送任务结束");
        });

        loop {
            tokio::select! {
                frame = incoming.next() => {
                    let Some(Ok(message)) = frame else { break };
                    if !Self::handle_incoming(message, &mut session, &cmd_tx).await {
                        break;
                    }
                }
                _ = &mut send_task => {
                    tracing::debug!("WebSocket发送任务提前结束");
                    break;
                }
            }
        }

        session.disconnect().await;
        send_task.abort();

        tracing::info!(user_id = %user_id, "WebSocket连接已断开，在线状态已清理");
    }

    /// 处理一帧客户端消息，返回 false 表示连接应当结束
    async fn handle_incoming(
        message: WsMessage,
        session: &mut ConnectionSession,
        cmd_tx: &mpsc::Sender<WsCommand>,
    ) -> bool {
        match message {
            WsMessage::Close(_) => {
                tracing::debug!("WebSocket收到关闭消息");
                false
            }
            WsMessage::Ping(data) => {
                tracing::debug!("收到ping消息，发送pong回应");
                cmd_tx.send(WsCommand::SendPong(data.to_vec())).await.is_ok()
            }
            WsMessage::Pong(_) => true,
            WsMessage::Text(text) => {
                session.handle_frame(text.as_str()).await;
                true
            }
            WsMessage::Binary(_) => {
                session
                    .handle()
                    .push(ServerEvent::error("binary frames are not supported"));
                true
            }
        }
    }
}

/// WebSocket 控制帧命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Vec<u8>),
}
