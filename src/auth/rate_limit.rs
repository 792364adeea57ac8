//! 滑动窗口限流
//! 按标识符（IP、账户等）统计窗口内的尝试次数

use crate::{clock::SharedClock, config::RateLimitConfig};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// 单个标识符的窗口
type Window = Arc<Mutex<VecDeque<DateTime<Utc>>>>;

/// 滑动窗口限流器
///
/// 每个标识符单独加锁，不同标识符之间互不阻塞。
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, Window>>,
    max_requests: usize,
    window: Duration,
    clock: SharedClock,
}

/// 限流器统计
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub tracked_identifiers: usize,
    pub config_max_requests: u32,
    pub config_window_secs: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_requests: config.max_requests as usize,
            window: Duration::seconds(config.window_secs as i64),
            clock,
        }
    }

    /// 是否还有余量（不记录本次尝试）
    pub fn allow(&self, identifier: &str) -> bool {
        let Some(window) = self.windows.get(identifier).map(|w| w.clone()) else {
            return self.max_requests > 0;
        };

        let now = self.clock.now();
        let mut requests = lock(&window);
        self.prune(&mut requests, now);
        requests.len() < self.max_requests
    }

    /// 记录一次尝试
    pub fn record(&self, identifier: &str) {
        let window = self.window_for(identifier);
        let now = self.clock.now();
        let mut requests = lock(&window);
        self.prune(&mut requests, now);
        requests.push_back(now);
    }

    /// 检查并记录（同一把锁内完成，避免并发下超额放行）
    pub fn check_and_record(&self, identifier: &str) -> bool {
        let window = self.window_for(identifier);
        let now = self.clock.now();
        let mut requests = lock(&window);
        self.prune(&mut requests, now);

        if requests.len() < self.max_requests {
            requests.push_back(now);
            true
        } else {
            false
        }
    }

    /// 窗口内剩余次数
    pub fn remaining(&self, identifier: &str) -> usize {
        let Some(window) = self.windows.get(identifier).map(|w| w.clone()) else {
            return self.max_requests;
        };

        let now = self.clock.now();
        let mut requests = lock(&window);
        self.prune(&mut requests, now);
        self.max_requests.saturating_sub(requests.len())
    }

    /// 清理已过期的窗口，返回清理数量
    pub fn purge_stale(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();

        self.windows.retain(|_, window| {
            let mut requests = lock(window);
            self.prune(&mut requests, now);
            !requests.is_empty()
        });

        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged idle rate limit windows");
        }
        removed
    }

    /// 获取当前统计
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            tracked_identifiers: self.windows.len(),
            config_max_requests: self.max_requests as u32,
            config_window_secs: self.window.num_seconds() as u64,
        }
    }

    /// 获取或创建指定标识符的窗口
    fn window_for(&self, identifier: &str) -> Window {
        if let Some(window) = self.windows.get(identifier) {
            return window.clone();
        }

        self.windows
            .entry(identifier.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
            .clone()
    }

    /// 清理窗口外的请求记录
    fn prune(&self, requests: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        while let Some(&front) = requests.front() {
            if now - front < self.window {
                break;
            }
            requests.pop_front();
        }
    }
}

/// 锁中毒时继续使用内部数据（窗口只含时间戳，不会处于不一致状态）
fn lock(window: &Mutex<VecDeque<DateTime<Utc>>>) -> MutexGuard<'_, VecDeque<DateTime<Utc>>> {
    window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
