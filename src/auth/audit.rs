//! 安全事件审计
//! 认证核心的每个结果都会产生一条安全事件

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// 安全事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    LoginSuccess,
    LoginFailed,
    AccountLocked,
    RateLimitExceeded,
    PasswordRehashed,
    TokenRejected,
    TokenRevoked,
    UpstreamUnavailable,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::LoginSuccess => "login_success",
            SecurityEventType::LoginFailed => "login_failed",
            SecurityEventType::AccountLocked => "account_locked",
            SecurityEventType::RateLimitExceeded => "rate_limit_exceeded",
            SecurityEventType::PasswordRehashed => "password_rehashed",
            SecurityEventType::TokenRejected => "token_rejected",
            SecurityEventType::TokenRevoked => "token_revoked",
            SecurityEventType::UpstreamUnavailable => "upstream_unavailable",
        }
    }
}

/// 安全事件（不包含密码或令牌内容）
#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub identifier: Option<String>,
    pub source_ip: Option<String>,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl SecurityEvent {
    pub fn new(event_type: SecurityEventType, occurred_at: DateTime<Utc>) -> Self {
        Self {
            event_type,
            identifier: None,
            source_ip: None,
            reason: None,
            occurred_at,
        }
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    pub fn source_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// 审计输出
///
/// 同步且不可失败：审计写入失败不能影响认证结果。
pub trait AuditSink: Send + Sync {
    fn record_event(&self, event: SecurityEvent);
}

/// 输出为结构化 tracing 事件（target = "security"）
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_event(&self, event: SecurityEvent) {
        let identifier = event.identifier.as_deref().unwrap_or("-");
        let source_ip = event.source_ip.as_deref().unwrap_or("-");
        let reason = event.reason.as_deref().unwrap_or("-");

        match event.event_type {
            SecurityEventType::LoginSuccess
            | SecurityEventType::PasswordRehashed
            | SecurityEventType::TokenRevoked => {
                tracing::info!(
                    target: "security",
                    event_type = event.event_type.as_str(),
                    identifier,
                    source_ip,
                    reason,
                    occurred_at = %event.occurred_at,
                    "Security event"
                );
            }
            SecurityEventType::UpstreamUnavailable => {
                tracing::error!(
                    target: "security",
                    event_type = event.event_type.as_str(),
                    identifier,
                    source_ip,
                    reason,
                    occurred_at = %event.occurred_at,
                    "Security event"
                );
            }
            _ => {
                tracing::warn!(
                    target: "security",
                    event_type = event.event_type.as_str(),
                    identifier,
                    source_ip,
                    reason,
                    occurred_at = %event.occurred_at,
                    "Security event"
                );
            }
        }
    }
}

/// 内存收集（测试用）
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<SecurityEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SecurityEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn event_types(&self) -> Vec<SecurityEventType> {
        self.events().iter().map(|e| e.event_type).collect()
    }

    pub fn count(&self, event_type: SecurityEventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_event(&self, event: SecurityEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        assert_eq!(SecurityEventType::LoginFailed.as_str(), "login_failed");
        assert_eq!(
            serde_json::to_value(SecurityEventType::RateLimitExceeded).unwrap(),
            "rate_limit_exceeded"
        );
    }

    #[test]
    fn test_memory_sink_collects_events() {
        let sink = MemoryAuditSink::new();
        let now = Utc::now();

        sink.record_event(
            SecurityEvent::new(SecurityEventType::LoginFailed, now)
                .identifier("alice")
                .source_ip("10.0.0.1")
                .reason("invalid_credentials"),
        );
        sink.record_event(SecurityEvent::new(SecurityEventType::LoginSuccess, now));

        assert_eq!(
            sink.event_types(),
            vec![SecurityEventType::LoginFailed, SecurityEventType::LoginSuccess]
        );
        assert_eq!(sink.count(SecurityEventType::LoginFailed), 1);
        assert_eq!(sink.events()[0].identifier.as_deref(), Some("alice"));

        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_tracing_sink_does_not_panic() {
        TracingAuditSink.record_event(
            SecurityEvent::new(SecurityEventType::AccountLocked, Utc::now()).identifier("bob"),
        );
    }
}
