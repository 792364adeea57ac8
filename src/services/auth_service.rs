//! 认证服务：登录、令牌校验、令牌刷新、登出
//! 组合哈希器、令牌服务、限流器和锁定追踪器，是外部调用认证核心的唯一入口

use crate::{
    auth::{
        audit::{AuditSink, SecurityEvent, SecurityEventType},
        jwt::{Claims, JwtService, TokenPair, TokenRejection},
        lockout::{LockoutState, LockoutTracker},
        password::{PasswordHasher, Verification},
        policy::{validate_password_policy, PolicyReport},
        rate_limit::{RateLimiter, RateLimiterStats},
        revocation::RevocationList,
        store::{StoreError, UserStore},
    },
    clock::SharedClock,
    config::{AppConfig, PasswordPolicyConfig},
    error::{AppError, AuthError},
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// 认证成功的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    /// 令牌主体（即账户标识）
    pub subject: String,
    pub is_admin: bool,
    /// 本次登录是否触发了哈希迁移
    pub rehashed: bool,
}

/// 后台清理结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub rate_limit_windows: usize,
    pub lockout_entries: usize,
    pub revoked_tokens: usize,
}

pub struct AuthService {
    hasher: Arc<PasswordHasher>,
    jwt_service: Arc<JwtService>,
    rate_limiter: Arc<RateLimiter>,
    lockout: Arc<LockoutTracker>,
    revocations: Arc<RevocationList>,
    store: Arc<dyn UserStore>,
    audit: Arc<dyn AuditSink>,
    clock: SharedClock,
    password_policy: PasswordPolicyConfig,
    store_timeout: Duration,
}

impl AuthService {
    /// 根据配置构建全部组件
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn UserStore>,
        audit: Arc<dyn AuditSink>,
        clock: SharedClock,
    ) -> Result<Self, AppError> {
        let hasher = PasswordHasher::new(config.hashing)?;
        let jwt_service = JwtService::from_config(&config.security, clock.clone())?;

        Ok(Self {
            hasher: Arc::new(hasher),
            jwt_service: Arc::new(jwt_service),
            rate_limiter: Arc::new(RateLimiter::new(config.rate_limit, clock.clone())),
            lockout: Arc::new(LockoutTracker::new(config.lockout, clock.clone())),
            revocations: Arc::new(RevocationList::new(clock.clone())),
            store,
            audit,
            clock,
            password_policy: config.password_policy.clone(),
            store_timeout: Duration::from_millis(config.security.user_store_timeout_ms),
        })
    }

    pub fn jwt_service(&self) -> &Arc<JwtService> {
        &self.jwt_service
    }

    pub fn hasher(&self) -> &Arc<PasswordHasher> {
        &self.hasher
    }

    /// 校验用户名密码
    ///
    /// 依次检查：锁定 -> 限流 -> 查询凭据 -> 校验密码 -> 账户状态。
    /// 任一步失败立即返回。
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
        caller_ip: &str,
    ) -> Result<Authenticated, AuthError> {
        let outcome = self.authenticate_inner(identifier, password, caller_ip).await;

        let label = match &outcome {
            Ok(_) => "success",
            Err(e) => e.reason(),
        };
        metrics::counter!("auth_attempts_total", "outcome" => label).increment(1);

        outcome
    }

    async fn authenticate_inner(
        &self,
        identifier: &str,
        password: &str,
        caller_ip: &str,
    ) -> Result<Authenticated, AuthError> {
        // 1. 锁定期内直接拒绝，不比较密码
        if self.lockout.is_locked(identifier) {
            self.emit(SecurityEventType::AccountLocked, identifier, caller_ip, "locked");
            return Err(AuthError::AccountLocked);
        }

        // 2. 按来源 IP 限流（允许的尝试在同一把锁内记录）
        if !self.rate_limiter.check_and_record(caller_ip) {
            self.emit(
                SecurityEventType::RateLimitExceeded,
                identifier,
                caller_ip,
                "rate_limited",
            );
            return Err(AuthError::RateLimited);
        }

        // 3. 查询凭据（超时或出错不计入失败次数）
        let record = match self
            .with_store_timeout(self.store.find_credential(identifier))
            .await
        {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.record_failure(identifier, caller_ip, "unknown_identifier");
                // 与错误密码耗时一致
                let hasher = self.hasher.clone();
                let secret = password.to_string();
                let _ = tokio::task::spawn_blocking(move || hasher.verify_dummy(&secret)).await;
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                tracing::error!(identifier = %identifier, "Credential lookup failed: {}", e);
                self.emit(
                    SecurityEventType::UpstreamUnavailable,
                    identifier,
                    caller_ip,
                    "find_credential",
                );
                return Err(AuthError::UpstreamUnavailable);
            }
        };

        // 4. 校验密码（CPU 密集，放到阻塞线程池）
        let hasher = self.hasher.clone();
        let secret = password.to_string();
        let stored = record.password_hash.clone();
        let verification = tokio::task::spawn_blocking(move || hasher.verify(&secret, &stored))
            .await
            .map_err(|e| {
                tracing::error!(identifier = %identifier, "Password verification task failed: {}", e);
                AuthError::UpstreamUnavailable
            })?;

        let needs_rehash = match verification {
            Verification::Valid { needs_rehash } => needs_rehash,
            Verification::Invalid => {
                self.record_failure(identifier, caller_ip, "invalid_password");
                return Err(AuthError::InvalidCredentials);
            }
        };

        // 5. 密码正确后才检查账户状态
        if !record.active {
            self.emit(
                SecurityEventType::LoginFailed,
                identifier,
                caller_ip,
                "account_disabled",
            );
            return Err(AuthError::AccountDisabled);
        }

        // 6. 成功：清除失败记录，必要时迁移哈希
        self.lockout.record_success(identifier);

        let rehashed = if needs_rehash {
            self.migrate_hash(identifier, password, caller_ip).await
        } else {
            false
        };

        self.emit(SecurityEventType::LoginSuccess, identifier, caller_ip, "ok");
        tracing::info!(identifier = %identifier, "Authentication succeeded");

        Ok(Authenticated {
            subject: record.identifier,
            is_admin: record.is_admin,
            rehashed,
        })
    }

    /// 用新参数重新哈希并写回；失败只记录日志，不影响登录
    async fn migrate_hash(&self, identifier: &str, password: &str, caller_ip: &str) -> bool {
        let hasher = self.hasher.clone();
        let secret = password.to_string();
        let new_hash = match tokio::task::spawn_blocking(move || hasher.hash(&secret)).await {
            Ok(Ok(record)) => record.encode(),
            Ok(Err(e)) => {
                tracing::warn!(identifier = %identifier, "Rehash failed: {}", e);
                return false;
            }
            Err(e) => {
                tracing::warn!(identifier = %identifier, "Rehash task failed: {}", e);
                return false;
            }
        };

        match self
            .with_store_timeout(self.store.update_credential_hash(identifier, &new_hash))
            .await
        {
            Ok(()) => {
                self.emit(
                    SecurityEventType::PasswordRehashed,
                    identifier,
                    caller_ip,
                    "migrated_to_argon2id",
                );
                true
            }
            Err(e) => {
                tracing::warn!(identifier = %identifier, "Failed to store migrated hash: {}", e);
                false
            }
        }
    }

    /// 签发令牌对
    pub fn issue_session(&self, subject: &str) -> Result<TokenPair, AppError> {
        self.jwt_service.generate_token_pair(subject)
    }

    /// 登录：认证成功后直接签发令牌对
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        caller_ip: &str,
    ) -> Result<TokenPair, AppError> {
        let authenticated = self.authenticate(identifier, password, caller_ip).await?;
        self.issue_session(&authenticated.subject)
    }

    /// 校验访问令牌（包括撤销检查）
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        let claims = self
            .jwt_service
            .verify_access(token)
            .map_err(|rejection| self.reject_token(rejection, None))?;

        if self.revocations.is_revoked(&claims.jti) {
            return Err(self.reject_token(TokenRejection::Revoked, Some(&claims.sub)));
        }

        Ok(claims)
    }

    /// 刷新令牌：旧刷新令牌作废，签发新的令牌对
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<TokenPair, AppError> {
        let claims = self
            .jwt_service
            .verify_refresh(refresh_token)
            .map_err(|rejection| self.reject_token(rejection, None))?;

        if self.revocations.is_revoked(&claims.jti) {
            // 已轮换的刷新令牌被再次使用
            return Err(self
                .reject_token(TokenRejection::Revoked, Some(&claims.sub))
                .into());
        }

        // 检查账户状态
        match self
            .with_store_timeout(self.store.is_active(&claims.sub))
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                self.emit(
                    SecurityEventType::TokenRejected,
                    &claims.sub,
                    "-",
                    "account_disabled",
                );
                return Err(AuthError::AccountDisabled.into());
            }
            Err(StoreError::NotFound(_)) => {
                return Err(self
                    .reject_token(TokenRejection::UnknownSubject, Some(&claims.sub))
                    .into());
            }
            Err(e) => {
                tracing::error!(subject = %claims.sub, "Account status lookup failed: {}", e);
                self.emit(
                    SecurityEventType::UpstreamUnavailable,
                    &claims.sub,
                    "-",
                    "is_active",
                );
                return Err(AuthError::UpstreamUnavailable.into());
            }
        }

        // 并发刷新时只有一个能成功
        if !self.revocations.revoke_once(&claims.jti, claims.exp) {
            return Err(self
                .reject_token(TokenRejection::Revoked, Some(&claims.sub))
                .into());
        }

        tracing::info!(subject = %claims.sub, "Refresh token rotated");
        self.issue_session(&claims.sub)
    }

    /// 登出：撤销刷新令牌，以及调用方当前使用的访问令牌
    pub fn revoke_session(
        &self,
        refresh_token: &str,
        access_claims: Option<&Claims>,
    ) -> Result<(), AuthError> {
        let claims = self
            .jwt_service
            .verify_refresh(refresh_token)
            .map_err(|rejection| self.reject_token(rejection, None))?;

        if let Some(access) = access_claims {
            if access.sub != claims.sub {
                return Err(self.reject_token(TokenRejection::SubjectMismatch, Some(&access.sub)));
            }
            self.revocations.revoke(&access.jti, access.exp);
        }

        self.revocations.revoke(&claims.jti, claims.exp);
        self.emit(SecurityEventType::TokenRevoked, &claims.sub, "-", "logout");

        Ok(())
    }

    /// 密码策略检查（纯函数）
    pub fn validate_password_policy(&self, password: &str) -> PolicyReport {
        validate_password_policy(password, &self.password_policy)
    }

    /// 为注册或修改密码生成哈希（先做策略检查）
    pub async fn hash_password(&self, password: &str) -> Result<String, AppError> {
        let report = self.validate_password_policy(password);
        if !report.valid {
            return Err(AppError::Validation(report.errors.join("; ")));
        }

        let hasher = self.hasher.clone();
        let secret = password.to_string();
        let record = tokio::task::spawn_blocking(move || hasher.hash(&secret))
            .await
            .map_err(|e| AppError::Internal(format!("Hash task failed: {}", e)))??;

        Ok(record.encode())
    }

    /// 查询账户锁定状态
    pub fn lockout_state(&self, identifier: &str) -> LockoutState {
        self.lockout.state(identifier)
    }

    pub fn rate_limiter_stats(&self) -> RateLimiterStats {
        self.rate_limiter.stats()
    }

    /// 清理限流窗口、锁定记录和过期的撤销记录
    pub fn purge_stale(&self) -> SweepReport {
        let report = SweepReport {
            rate_limit_windows: self.rate_limiter.purge_stale(),
            lockout_entries: self.lockout.purge_stale(),
            revoked_tokens: self.revocations.purge_stale(),
        };

        tracing::debug!(
            rate_limit_windows = report.rate_limit_windows,
            lockout_entries = report.lockout_entries,
            revoked_tokens = report.revoked_tokens,
            "Purged stale security state"
        );

        report
    }

    /// 记录一次失败（在下一个 await 之前同步提交）
    fn record_failure(&self, identifier: &str, caller_ip: &str, reason: &str) {
        let state = self.lockout.record_failure(identifier);
        self.emit(SecurityEventType::LoginFailed, identifier, caller_ip, reason);

        if let LockoutState::Locked { until } = state {
            self.emit(
                SecurityEventType::AccountLocked,
                identifier,
                caller_ip,
                format!("locked_until={}", until.to_rfc3339()),
            );
        }
    }

    fn reject_token(&self, rejection: TokenRejection, subject: Option<&str>) -> AuthError {
        let mut event = SecurityEvent::new(SecurityEventType::TokenRejected, self.clock.now())
            .reason(rejection.reason());
        if let Some(subject) = subject {
            event = event.identifier(subject);
        }
        self.audit.record_event(event);

        AuthError::from(rejection)
    }

    fn emit(
        &self,
        event_type: SecurityEventType,
        identifier: &str,
        caller_ip: &str,
        reason: impl Into<String>,
    ) {
        self.audit.record_event(
            SecurityEvent::new(event_type, self.clock.now())
                .identifier(identifier)
                .source_ip(caller_ip)
                .reason(reason),
        );
    }

    /// 用户存储调用加超时
    async fn with_store_timeout<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.store_timeout, call)
            .await
            .map_err(|_| {
                StoreError::Unavailable(format!(
                    "user store timed out after {}ms",
                    self.store_timeout.as_millis()
                ))
            })?
    }
}
