//! 登录失败锁定
//! 每个账户在窗口内累计失败次数，达到阈值后锁定一段时间

use crate::{clock::SharedClock, config::LockoutConfig};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;

/// 账户锁定状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LockoutState {
    Clear,
    /// 已有失败但未达到阈值
    Warning { failures: u32, remaining: u32 },
    Locked { until: DateTime<Utc> },
}

impl LockoutState {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockoutState::Locked { .. })
    }
}

#[derive(Debug, Default)]
struct LockoutEntry {
    /// 窗口内的失败时间戳（升序）
    failures: VecDeque<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
}

impl LockoutEntry {
    fn lock_active(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        while let Some(&front) = self.failures.front() {
            if now - front < window {
                break;
            }
            self.failures.pop_front();
        }
    }

    fn recent_failures(&self, now: DateTime<Utc>, window: Duration) -> usize {
        self.failures.iter().filter(|&&at| now - at < window).count()
    }
}

/// 失败次数追踪器
pub struct LockoutTracker {
    entries: DashMap<String, LockoutEntry>,
    max_failed_attempts: u32,
    window: Duration,
    lockout_duration: Duration,
    clock: SharedClock,
}

impl LockoutTracker {
    pub fn new(config: LockoutConfig, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            max_failed_attempts: config.max_failed_attempts,
            window: Duration::seconds(config.window_secs as i64),
            lockout_duration: Duration::seconds(config.duration_secs as i64),
            clock,
        }
    }

    /// 记录一次失败，返回记录后的状态
    pub fn record_failure(&self, identifier: &str) -> LockoutState {
        let now = self.clock.now();
        let mut entry = self.entries.entry(identifier.to_string()).or_default();

        // 过期的锁定不再计入
        if entry.locked_until.is_some_and(|until| until <= now) {
            entry.locked_until = None;
            entry.failures.clear();
        }

        entry.prune(now, self.window);
        entry.failures.push_back(now);

        let failures = entry.failures.len() as u32;

        if let Some(until) = entry.locked_until {
            return LockoutState::Locked { until };
        }

        if failures >= self.max_failed_attempts {
            let until = now + self.lockout_duration;
            entry.locked_until = Some(until);
            tracing::warn!(
                identifier = %identifier,
                failures,
                locked_until = %until,
                "Account locked after repeated failures"
            );
            return LockoutState::Locked { until };
        }

        LockoutState::Warning {
            failures,
            remaining: self.max_failed_attempts - failures,
        }
    }

    /// 认证成功，清除该账户的全部记录
    pub fn record_success(&self, identifier: &str) {
        self.entries.remove(identifier);
    }

    /// 是否处于锁定期内（锁定已过期的条目会被清除）
    pub fn is_locked(&self, identifier: &str) -> bool {
        let now = self.clock.now();

        let locked = match self.entries.get(identifier) {
            Some(entry) => match entry.locked_until {
                Some(until) => until > now,
                None => return false,
            },
            None => return false,
        };

        if !locked && self.clear_expired_lock(identifier, now) {
            tracing::info!(identifier = %identifier, "Lockout expired");
        }

        locked
    }

    /// 删除已过期的锁定条目；条目在此期间被重新锁定时保留
    fn clear_expired_lock(&self, identifier: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .remove_if(identifier, |_, entry| {
                entry.locked_until.is_some() && !entry.lock_active(now)
            })
            .is_some()
    }

    /// 只读查询当前状态
    pub fn state(&self, identifier: &str) -> LockoutState {
        let now = self.clock.now();

        let Some(entry) = self.entries.get(identifier) else {
            return LockoutState::Clear;
        };

        if let Some(until) = entry.locked_until {
            return if until > now {
                LockoutState::Locked { until }
            } else {
                LockoutState::Clear
            };
        }

        match entry.recent_failures(now, self.window) as u32 {
            0 => LockoutState::Clear,
            failures => LockoutState::Warning {
                failures,
                remaining: self.max_failed_attempts.saturating_sub(failures),
            },
        }
    }

    /// 清理既未锁定、窗口内也没有失败记录的条目
    pub fn purge_stale(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();

        self.entries.retain(|_, entry| {
            if entry.lock_active(now) {
                return true;
            }
            if entry.locked_until.is_some() {
                return false;
            }
            entry.prune(now, self.window);
            !entry.failures.is_empty()
        });

        before.saturating_sub(self.entries.len())
    }

    /// 当前追踪的账户数
    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}
