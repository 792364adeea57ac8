//! 日志与追踪系统
//! 初始化结构化日志和指标收集

use crate::{config::AppConfig, services::SweepReport};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 初始化日志与追踪系统
///
/// 安全事件使用 target = "security"，因此保留 target 字段。
pub fn init_telemetry(config: &AppConfig) {
    // 从环境变量构建过滤器
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // 根据配置选择日志格式
    let log_layer = match config.logging.format.to_lowercase().as_str() {
        "json" => {
            // JSON 格式（生产环境）
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
                .boxed()
        }
        _ => {
            // 美化格式（开发环境）
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .boxed()
        }
    };

    // 初始化 subscriber（重复初始化时忽略）
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .try_init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.logging.level,
        format = %config.logging.format,
        "Telemetry initialized"
    );
}

/// 初始化指标收集器
pub fn init_metrics() {
    // metrics 0.24 不再需要显式注册指标，首次使用时自动创建
    metrics::describe_counter!(
        "auth_attempts_total",
        "Authentication attempts by outcome"
    );
    metrics::describe_counter!("http_requests_total", "HTTP requests by method and status");
    tracing::debug!("Metrics initialized");
}

/// 记录后台清理结果
pub fn record_sweep_metrics(report: &SweepReport) {
    metrics::counter!("security_state_purged_total", "kind" => "rate_limit_window")
        .increment(report.rate_limit_windows as u64);
    metrics::counter!("security_state_purged_total", "kind" => "lockout_entry")
        .increment(report.lockout_entries as u64);
    metrics::counter!("security_state_purged_total", "kind" => "revoked_token")
        .increment(report.revoked_tokens as u64);
}
