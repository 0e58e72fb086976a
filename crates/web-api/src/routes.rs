use axum::{
    extract::{Path, State, WebSocketUpgrade},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;
use validator::Validate;

use application::{
    AuthenticateUserRequest, MessageDto, RegisterUserRequest, SendMessageRequest, UserDto,
    UserStatsDto,
};
use domain::{MessageId, MessageType, UserId};

use crate::{
    auth::{extract_credential, AdminUser, AuthResponse, AuthUser},
    error::ApiError,
    state::AppState,
    ws_connection::WebSocketConnection,
};

#[derive(Debug, Deserialize, Validate)]
struct RegisterPayload {
    #[validate(length(min = 1, max = 50))]
    name: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 6))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct LoginPayload {
    #[validate(length(min = 1))]
    email: String,
    #[validate(length(min = 1))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct SendMessagePayload {
    receiver_id: Uuid,
    #[validate(length(min = 1))]
    content: String,
    #[serde(default)]
    message_type: MessageType,
}

#[derive(Debug, Serialize)]
struct PresenceResponse {
    online: Vec<UserId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnreadCountResponse {
    unread_count: u64,
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    purged: bool,
}

#[derive(Debug, Serialize)]
struct AdminUsersResponse {
    users: Vec<UserDto>,
}

#[derive(Debug, Serialize)]
struct AdminStatsResponse {
    stats: UserStatsDto,
}

pub fn router(state: AppState) -> Router {
    router_with_cors(state, &[])
}

/// 构建路由，`cors_origins` 为空时允许任意来源
pub fn router_with_cors(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(websocket_upgrade))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if parsed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(parsed)
    }
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register_user))
        .route("/auth/login", post(login_user))
        .route("/auth/logout", post(logout_user))
        .route("/auth/users", get(list_users))
        .route("/presence", get(online_users))
        .route("/messages/send", post(send_message))
        .route("/messages/unread/count", get(unread_count))
        .route("/messages/{id}", get(get_conversation).delete(delete_message))
        .route("/admin/users", get(admin_list_users))
        .route("/admin/stats", get(admin_stats))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    payload.validate()?;

    let user = state
        .user_service
        .register(RegisterUserRequest {
            name: payload.name,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    let token = state.jwt_service.generate_token(user.id)?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            token,
            user: UserDto::from(&user),
        }),
    ))
}

async fn login_user(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Json<AuthResponse>, ApiError> {
    payload.validate()?;

    let user = state
        .user_service
        .authenticate(AuthenticateUserRequest {
            email: payload.email,
            password: payload.password,
        })
        .await?;

    let token = state.jwt_service.generate_token(user.id)?;
    Ok(Json(AuthResponse {
        token,
        user: UserDto::from(&user),
    }))
}

async fn logout_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.user_service.logout(user_id).await?;
    Ok(Json(json!({"message": "logged out"})))
}

async fn list_users(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<UserDto>>, ApiError> {
    let users = state.user_service.list_users_except(user_id).await?;
    Ok(Json(users))
}

async fn online_users(
    State(state): State<AppState>,
    AuthUser(_): AuthUser,
) -> Json<PresenceResponse> {
    Json(PresenceResponse {
        online: state.presence.snapshot().await,
    })
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<SendMessagePayload>,
) -> Result<(StatusCode, Json<MessageDto>), ApiError> {
    payload.validate()?;

    let dto = state
        .delivery
        .send(SendMessageRequest {
            sender_id: user_id,
            receiver_id: UserId::from(payload.receiver_id),
            content: payload.content,
            message_type: payload.message_type,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(dto)))
}

async fn get_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(other_user_id): Path<Uuid>,
) -> Result<Json<Vec<MessageDto>>, ApiError> {
    let messages = state
        .history
        .conversation(user_id, UserId::from(other_user_id))
        .await?;
    Ok(Json(messages))
}

async fn unread_count(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let unread_count = state.history.unread_count(user_id).await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

async fn delete_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(message_id): Path<Uuid>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let outcome = state
        .delivery
        .delete_for_user(MessageId::from(message_id), user_id)
        .await?;
    Ok(Json(DeleteResponse {
        purged: outcome.is_purged(),
    }))
}

async fn admin_list_users(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<AdminUsersResponse>, ApiError> {
    let users = state.user_service.list_all_users().await?;
    Ok(Json(AdminUsersResponse { users }))
}

async fn admin_stats(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
) -> Result<Json<AdminStatsResponse>, ApiError> {
    let stats = state.user_service.user_stats().await?;
    Ok(Json(AdminStatsResponse { stats }))
}

/// 握手前校验凭证，失败直接返回 401，不升级连接
async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    let credential = extract_credential(&headers, &uri)
        .ok_or_else(|| ApiError::unauthorized("missing credential"))?;
    let user_id = state.identity.resolve(&credential).await?;

    Ok(ws.on_upgrade(move |socket| async move {
        WebSocketConnection::new(socket, state, user_id).run().await;
    }))
}
