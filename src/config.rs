//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use sqlx::types::ipnetwork::IpNetwork;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）
    pub url: Secret<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// JWT 签名密钥（使用 Secret 包装，防止日志泄露）
    pub jwt_secret: Secret<String>,
    /// 令牌签发者 (iss)
    pub jwt_issuer: String,
    /// 令牌受众 (aud)
    pub jwt_audience: String,
    /// 访问令牌过期时间（秒）
    pub access_token_exp_secs: u64,
    /// 刷新令牌过期时间（秒）
    pub refresh_token_exp_secs: u64,
    /// 校验 exp/nbf 时允许的时钟偏差（秒）
    #[serde(default)]
    pub token_leeway_secs: u64,
    /// 是否信任反向代理写入的 X-Forwarded-For / X-Real-IP
    pub trust_proxy: bool,
    /// 受信任代理地址，逗号分隔的 IP 或 CIDR（trust_proxy 开启时必填）
    #[serde(default)]
    pub trusted_proxies: String,
    /// 用户存储查询超时（毫秒）
    pub user_store_timeout_ms: u64,
    /// 内存状态清理间隔（秒）
    pub sweep_interval_secs: u64,
}

/// Argon2id 参数（写入 PHC 字符串，修改后旧哈希仍可验证）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct HashingConfig {
    /// 内存开销（KiB）
    pub memory_kib: u32,
    /// 迭代次数
    pub iterations: u32,
    /// 并行度
    pub parallelism: u32,
}

impl Default for HashingConfig {
    fn default() -> Self {
        // OWASP recommended: m=64MiB, t=3, p=4
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// 密码策略
#[derive(Debug, Clone, Deserialize)]
pub struct PasswordPolicyConfig {
    /// 密码最小长度
    pub min_length: usize,
    /// 密码必须包含大写字母
    pub require_uppercase: bool,
    /// 密码必须包含小写字母
    pub require_lowercase: bool,
    /// 密码必须包含数字
    pub require_digit: bool,
    /// 密码必须包含特殊字符
    pub require_special: bool,
}

impl Default for PasswordPolicyConfig {
    fn default() -> Self {
        Self {
            min_length: 8,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_special: true,
        }
    }
}

/// 登录失败锁定
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LockoutConfig {
    /// 窗口内最大失败次数
    pub max_failed_attempts: u32,
    /// 失败次数统计窗口（秒）
    pub window_secs: u64,
    /// 锁定持续时间（秒）
    pub duration_secs: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            window_secs: 3600,
            duration_secs: 1800,
        }
    }
}

/// 滑动窗口限流
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    /// 时间窗口内的最大请求数
    pub max_requests: u32,
    /// 时间窗口（秒）
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub hashing: HashingConfig,
    #[serde(default)]
    pub password_policy: PasswordPolicyConfig,
    #[serde(default)]
    pub lockout: LockoutConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl SecurityConfig {
    /// 解析受信任代理列表
    pub fn trusted_proxy_networks(&self) -> Result<Vec<IpNetwork>, ConfigError> {
        self.trusted_proxies
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                entry.parse::<IpNetwork>().map_err(|e| {
                    ConfigError::Message(format!("Invalid trusted proxy '{}': {}", entry, e))
                })
            })
            .collect()
    }
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("security.jwt_issuer", "gatekeeper-api")?
            .set_default("security.jwt_audience", "gatekeeper-client")?
            .set_default("security.access_token_exp_secs", 900)?
            .set_default("security.refresh_token_exp_secs", 604800)?
            .set_default("security.token_leeway_secs", 0)?
            .set_default("security.trust_proxy", false)?
            .set_default("security.trusted_proxies", "")?
            .set_default("security.user_store_timeout_ms", 3000)?
            .set_default("security.sweep_interval_secs", 300)?
            // 哈希参数
            .set_default("hashing.memory_kib", 65536)?
            .set_default("hashing.iterations", 3)?
            .set_default("hashing.parallelism", 4)?
            // 密码策略
            .set_default("password_policy.min_length", 8)?
            .set_default("password_policy.require_uppercase", true)?
            .set_default("password_policy.require_lowercase", true)?
            .set_default("password_policy.require_digit", true)?
            .set_default("password_policy.require_special", true)?
            // 登录锁定
            .set_default("lockout.max_failed_attempts", 5)?
            .set_default("lockout.window_secs", 3600)?
            .set_default("lockout.duration_secs", 1800)?
            // 限流
            .set_default("rate_limit.max_requests", 60)?
            .set_default("rate_limit.window_secs", 60)?;

        // 从环境变量加载配置（前缀为 GATEKEEPER_）
        settings = settings.add_source(
            Environment::with_prefix("GATEKEEPER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        // 验证数据库连接池配置
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        // 验证 JWT 密钥长度（至少 32 字符）
        if self.security.jwt_secret.expose_secret().len() < 32 {
            return Err(ConfigError::Message(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.security.jwt_issuer.trim().is_empty() || self.security.jwt_audience.trim().is_empty()
        {
            return Err(ConfigError::Message(
                "jwt_issuer and jwt_audience must not be empty".to_string(),
            ));
        }

        // 验证令牌过期时间
        if self.security.access_token_exp_secs < 60 || self.security.access_token_exp_secs > 86400 {
            return Err(ConfigError::Message(
                "access_token_exp_secs must be between 60 and 86400 (1 minute to 24 hours)"
                    .to_string(),
            ));
        }

        if self.security.refresh_token_exp_secs < 3600
            || self.security.refresh_token_exp_secs > 2592000
        {
            return Err(ConfigError::Message(
                "refresh_token_exp_secs must be between 3600 and 2592000 (1 hour to 30 days)"
                    .to_string(),
            ));
        }

        // 信任代理时必须指定代理地址，否则任何客户端都能伪造来源 IP
        let proxies = self.security.trusted_proxy_networks()?;
        if self.security.trust_proxy && proxies.is_empty() {
            return Err(ConfigError::Message(
                "trusted_proxies must be set when trust_proxy is enabled".to_string(),
            ));
        }

        if self.security.user_store_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "user_store_timeout_ms must be greater than 0".to_string(),
            ));
        }

        // 验证哈希参数（Argon2 要求 m >= 8 * p）
        if self.hashing.iterations < 1
            || self.hashing.parallelism < 1
            || self.hashing.parallelism > 16
            || self.hashing.memory_kib < 8 * self.hashing.parallelism
        {
            return Err(ConfigError::Message(
                "hashing parameters out of range (t >= 1, 1 <= p <= 16, m >= 8 * p)".to_string(),
            ));
        }

        // 验证密码策略
        if self.password_policy.min_length < 6 || self.password_policy.min_length > 128 {
            return Err(ConfigError::Message(
                "password_policy.min_length must be between 6 and 128".to_string(),
            ));
        }

        // 验证登录失败锁定配置
        if self.lockout.max_failed_attempts < 1 || self.lockout.max_failed_attempts > 20 {
            return Err(ConfigError::Message(
                "lockout.max_failed_attempts must be between 1 and 20".to_string(),
            ));
        }

        if self.lockout.window_secs == 0 || self.lockout.duration_secs == 0 {
            return Err(ConfigError::Message(
                "lockout.window_secs and lockout.duration_secs must be greater than 0".to_string(),
            ));
        }

        // 验证限流配置
        if self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Message(
                "rate_limit.max_requests and rate_limit.window_secs must be greater than 0"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
