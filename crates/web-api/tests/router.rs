mod support;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use tower::ServiceExt;

use support::build_state;
use web_api::router;

#[tokio::test]
async fn health_responds_without_auth() {
    let app = router(build_state());

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn invalid_register_payload_is_rejected() {
    let app = router(build_state());

    let request = Request::post("/api/auth/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            r#"{"name":"Alice","email":"not-an-email","password":"secret123"}"#,
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn websocket_route_rejects_plain_request() {
    let app = router(build_state());

    let response = app
        .oneshot(Request::get("/ws").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn message_routes_reject_missing_token() {
    let app = router(build_state());

    let request = Request::delete("/api/messages/6f1c7a43-0000-4000-8000-000000000000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_for_unknown_user_is_rejected() {
    let state = build_state();
    let ghost = domain::UserId::from(uuid::Uuid::new_v4());
    let token = state.jwt_service.generate_token(ghost).unwrap();
    let app = router(state);

    let request = Request::get("/api/presence")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
