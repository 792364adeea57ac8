//! 认证 API 集成测试

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::net::SocketAddr;
use tower::ServiceExt;

mod common;
use common::{TestHarness, PROXY_PEER, TEST_IP};

const PASSWORD: &str = "Correct-Horse-42";

fn app(harness: &TestHarness) -> Router {
    gatekeeper::routes::create_router(harness.app_state())
}

/// 经受信任代理转发的请求
fn post_json(uri: &str, body: Value, client_ip: &str) -> Request<Body> {
    post_json_from(uri, body, PROXY_PEER, client_ip)
}

/// 指定 TCP 对端和 X-Forwarded-For 的请求
fn post_json_from(uri: &str, body: Value, peer: &str, forwarded_for: &str) -> Request<Body> {
    let peer: SocketAddr = peer.parse().unwrap();
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", forwarded_for)
        .extension(ConnectInfo(peer))
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn limited_harness(max_requests: u32) -> TestHarness {
    let mut config = common::create_test_config();
    config.rate_limit.max_requests = max_requests;
    TestHarness::with_config(config)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn login(harness: &TestHarness, identifier: &str, password: &str) -> (StatusCode, Value) {
    let response = app(harness)
        .oneshot(post_json(
            "/api/v1/auth/login",
            json!({ "identifier": identifier, "password": password }),
            TEST_IP,
        ))
        .await
        .unwrap();

    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
async fn test_login_success() {
    let harness = TestHarness::new();
    harness.add_user("alice", PASSWORD);

    let (status, json) = login(&harness, "alice", PASSWORD).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["access_token"].is_string());
    assert!(json["refresh_token"].is_string());
    assert_eq!(json["token_type"], "bearer");
    assert_eq!(json["expires_in"], 900);
}

#[tokio::test]
async fn test_login_wrong_password_and_unknown_user_indistinguishable() {
    let harness = TestHarness::new();
    harness.add_user("alice", PASSWORD);

    let (wrong_status, wrong) = login(&harness, "alice", "WrongPassword1!").await;
    let (unknown_status, unknown) = login(&harness, "nobody", PASSWORD).await;

    assert_eq!(wrong_status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown_status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong["error"]["message"], "Invalid credentials");
    assert_eq!(wrong["error"]["message"], unknown["error"]["message"]);
}

#[tokio::test]
async fn test_login_locked_account() {
    let harness = TestHarness::new();
    harness.add_user("alice", PASSWORD);

    for _ in 0..5 {
        let (status, _) = login(&harness, "alice", "WrongPassword1!").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    let (status, json) = login(&harness, "alice", PASSWORD).await;
    assert_eq!(status, StatusCode::LOCKED);
    assert_eq!(json["error"]["code"], 423);
}

#[tokio::test]
async fn test_login_rate_limited_per_forwarded_ip() {
    let harness = limited_harness(3);
    harness.add_user("alice", PASSWORD);

    for _ in 0..3 {
        let (status, _) = login(&harness, "alice", PASSWORD).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = login(&harness, "alice", PASSWORD).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    // 受信任代理转发的其他客户端独立计数
    let response = app(&harness)
        .oneshot(post_json(
            "/api/v1/auth/login",
            json!({ "identifier": "alice", "password": PASSWORD }),
            "198.51.100.20",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// 用不同的标识发起登录，返回被限流的次数
async fn count_rate_limited(
    harness: &TestHarness,
    attempts: usize,
    peer: &str,
    forwarded: impl Fn(usize) -> String,
) -> usize {
    let mut limited = 0;
    for i in 0..attempts {
        let response = app(harness)
            .oneshot(post_json_from(
                "/api/v1/auth/login",
                json!({ "identifier": format!("user-{}", i), "password": "Guess-123!" }),
                peer,
                &forwarded(i),
            ))
            .await
            .unwrap();
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            limited += 1;
        }
    }
    limited
}

#[tokio::test]
async fn test_rotating_forwarded_for_from_direct_client_is_rate_limited() {
    let harness = limited_harness(5);

    // 非代理对端写的 X-Forwarded-For 不参与限流键
    let limited = count_rate_limited(&harness, 20, "203.0.113.50:40000", |i| {
        format!("198.51.100.{}", i)
    })
    .await;

    assert_eq!(limited, 15);
    assert_eq!(harness.service.rate_limiter_stats().tracked_identifiers, 1);
}

#[tokio::test]
async fn test_spoofed_leftmost_hop_behind_proxy_is_rate_limited() {
    let harness = limited_harness(5);

    // 客户端伪造最左侧条目，代理追加真实地址
    let limited = count_rate_limited(&harness, 20, PROXY_PEER, |i| {
        format!("192.0.2.{}, 203.0.113.9", i)
    })
    .await;

    assert_eq!(limited, 15);
    assert_eq!(harness.service.rate_limiter_stats().tracked_identifiers, 1);
}

#[tokio::test]
async fn test_login_validation_error() {
    let harness = TestHarness::new();

    let (status, json) = login(&harness, "", PASSWORD).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], 400);
}

#[tokio::test]
async fn test_me_requires_token() {
    let harness = TestHarness::new();

    let response = app(&harness)
        .oneshot(
            Request::builder()
                .uri("/api/v1/auth/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_me_with_valid_token() {
    let harness = TestHarness::new();
    harness.add_user("alice", PASSWORD);
    let (_, tokens) = login(&harness, "alice", PASSWORD).await;
    let access_token = tokens["access_token"].as_str().unwrap();

    let response = app(&harness)
        .oneshot(
            Request::builder()
                .uri("/api/v1/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["subject"], "alice");
    assert!(json["token_id"].is_string());
}

#[tokio::test]
async fn test_logout_revokes_tokens() {
    let harness = TestHarness::new();
    harness.add_user("alice", PASSWORD);
    let (_, tokens) = login(&harness, "alice", PASSWORD).await;
    let access_token = tokens["access_token"].as_str().unwrap();
    let refresh_token = tokens["refresh_token"].as_str().unwrap();

    let response = app(&harness)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/logout")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                .body(Body::from(
                    json!({ "refresh_token": refresh_token }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // 访问令牌已撤销
    let response = app(&harness)
        .oneshot(
            Request::builder()
                .uri("/api/v1/auth/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", access_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // 刷新令牌已撤销
    let response = app(&harness)
        .oneshot(post_json(
            "/api/v1/auth/refresh",
            json!({ "refresh_token": refresh_token }),
            TEST_IP,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_rotates_tokens() {
    let harness = TestHarness::new();
    harness.add_user("alice", PASSWORD);
    let (_, tokens) = login(&harness, "alice", PASSWORD).await;
    let refresh_token = tokens["refresh_token"].as_str().unwrap().to_string();

    let response = app(&harness)
        .oneshot(post_json(
            "/api/v1/auth/refresh",
            json!({ "refresh_token": refresh_token }),
            TEST_IP,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let rotated = body_json(response).await;
    assert_ne!(rotated["refresh_token"], tokens["refresh_token"]);

    // 旧刷新令牌不能再次使用
    let response = app(&harness)
        .oneshot(post_json(
            "/api/v1/auth/refresh",
            json!({ "refresh_token": refresh_token }),
            TEST_IP,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_refresh_with_garbage_token() {
    let harness = TestHarness::new();

    let response = app(&harness)
        .oneshot(post_json(
            "/api/v1/auth/refresh",
            json!({ "refresh_token": "not-a-jwt" }),
            TEST_IP,
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["error"]["message"], "Invalid or expired token");
}

#[tokio::test]
async fn test_password_policy_endpoint() {
    let harness = TestHarness::new();

    let response = app(&harness)
        .oneshot(post_json(
            "/api/v1/auth/password-policy",
            json!({ "password": "weak" }),
            TEST_IP,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["valid"], false);
    assert!(!json["errors"].as_array().unwrap().is_empty());

    let response = app(&harness)
        .oneshot(post_json(
            "/api/v1/auth/password-policy",
            json!({ "password": PASSWORD }),
            TEST_IP,
        ))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["valid"], true);
    assert_eq!(json["strength"], "strong");
}

#[tokio::test]
async fn test_request_id_header_present() {
    let harness = TestHarness::new();

    let response = app(&harness)
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-trace-id", "trace-abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.headers().contains_key("x-request-id"));
    assert_eq!(response.headers()["x-trace-id"], "trace-abc");
}
