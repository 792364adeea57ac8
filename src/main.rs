//! 认证服务主入口

use gatekeeper::{
    auth::{AuditSink, TracingAuditSink, UserStore},
    clock::{SharedClock, SystemClock},
    config::AppConfig,
    db,
    handlers::health,
    middleware::{AppState, ClientIpResolver},
    repository::PgUserStore,
    routes,
    services::AuthService,
    telemetry,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("gatekeeper {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 按优先级加载：.env.local > .env.development > .env
    if let Ok(env) = std::env::var("GATEKEEPER_ENV") {
        dotenv::from_filename(format!(".env.{}", env)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::from_filename(".env.development").ok();
        dotenv::dotenv().ok();
    }

    // 设置应用启动时间
    health::set_start_time();

    // 1. 加载配置（密钥缺失或过短时直接退出）
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Gatekeeper starting...");

    // 3. 凭据库（建池 + 迁移）
    let db_pool = db::connect(&config.database).await?;

    // 4. 构建认证服务
    let clock: SharedClock = Arc::new(SystemClock);
    let store: Arc<dyn UserStore> = Arc::new(PgUserStore::new(db_pool.clone()));
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let auth_service = Arc::new(AuthService::new(&config, store, audit, clock)?);

    let app_state = Arc::new(AppState {
        config: config.clone(),
        db: Some(db_pool.clone()),
        auth_service: auth_service.clone(),
        client_ip: ClientIpResolver::from_config(&config.security)?,
    });

    // 5. 后台清理任务
    let sweeper = spawn_sweeper(
        auth_service.clone(),
        db_pool.clone(),
        Duration::from_secs(config.security.sweep_interval_secs.max(1)),
    );

    // 6. 构建路由
    let app = routes::create_router(app_state);

    // 7. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(addr = %addr, "Server listening");

    // 8. 优雅关闭
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.server.graceful_shutdown_timeout_secs))
    .await?;

    sweeper.abort();
    db_pool.close().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 定期清理限流窗口、锁定记录和撤销列表
fn spawn_sweeper(
    auth_service: Arc<AuthService>,
    db_pool: sqlx::PgPool,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // 第一次 tick 立即返回
        interval.tick().await;

        loop {
            interval.tick().await;
            let report = auth_service.purge_stale();
            telemetry::record_sweep_metrics(&report);
            db::record_pool_metrics(&db_pool);
        }
    })
}

/// 优雅关闭信号处理
async fn shutdown_signal(timeout_secs: u64) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    // 超时后强制退出
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(timeout_secs)).await;
        tracing::warn!("Graceful shutdown timeout reached, forcing exit");
        std::process::exit(1);
    });
}

/// 打印帮助信息
fn print_help() {
    println!("gatekeeper {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: gatekeeper [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 GATEKEEPER_ 前缀的环境变量完成");
    println!("  可用选项请参考 .env.example");
}
