//! 认证相关的 HTTP 处理器

use crate::{
    auth::middleware::AuthContext,
    error::AppError,
    middleware::{AppState, ClientIp},
    models::auth::*,
};
use axum::{extract::State, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

/// 登录
pub async fn login(
    State(state): State<Arc<AppState>>,
    ClientIp(client_ip): ClientIp,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let token_pair = state
        .auth_service
        .login(&req.identifier, &req.password, &client_ip.to_string())
        .await?;

    Ok(Json(token_pair))
}

/// 刷新令牌
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshTokenRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    let token_pair = state.auth_service.refresh_session(&req.refresh_token).await?;

    Ok(Json(token_pair))
}

/// 登出（撤销刷新令牌和当前访问令牌）
pub async fn logout(
    State(state): State<Arc<AppState>>,
    auth_context: AuthContext,
    Json(req): Json<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    state
        .auth_service
        .revoke_session(&req.refresh_token, Some(&auth_context.claims))?;

    Ok(Json(json!({"message": "Logged out"})))
}

/// 获取当前会话信息
pub async fn me(auth_context: AuthContext) -> Json<MeResponse> {
    Json(MeResponse {
        subject: auth_context.subject,
        token_id: auth_context.token_id,
        expires_at: auth_context.expires_at,
    })
}

/// 密码策略检查
pub async fn check_password_policy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PasswordPolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    req.validate()?;

    Ok(Json(state.auth_service.validate_password_policy(&req.password)))
}
