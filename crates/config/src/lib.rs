//! 统一配置中心
//!
//! 配置按以下优先级合并：
//! - 内置默认值
//! - `CONVERSE_CONFIG_FILE` 指向的可选配置文件（TOML / YAML / JSON）
//! - `CONVERSE_` 前缀的环境变量，嵌套字段用 `__` 分隔（如 `CONVERSE_HUB__SEND_QUEUE_CAPACITY`）

use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const CONFIG_FILE_ENV: &str = "CONVERSE_CONFIG_FILE";
pub const ENV_PREFIX: &str = "CONVERSE_";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub jwt: JwtConfig,
    #[validate(nested)]
    pub hub: HubConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    pub environment: String,
    pub log_level: String,
    pub shutdown_timeout_seconds: u64,
    /// 允许的 Origin，空表示不限制
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            environment: "development".to_string(),
            log_level: "info".to_string(),
            shutdown_timeout_seconds: 10,
            allowed_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 数据库配置，未设置 url 时使用内存消息存储
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JwtConfig {
    #[validate(length(min = 1))]
    pub secret: String,
    #[validate(range(min = 1))]
    pub expiration_hours: i64,
    pub issuer: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: "dev-secret-key-not-for-production-use-minimum-32-chars".to_string(),
            expiration_hours: 24,
            issuer: "converse".to_string(),
        }
    }
}

/// 实时消息中枢配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HubConfig {
    /// 每个连接的出站队列容量
    #[validate(range(min = 1))]
    pub send_queue_capacity: usize,
    /// 中枢命令通道容量
    #[validate(range(min = 1))]
    pub command_queue_capacity: usize,
    #[validate(range(min = 1))]
    pub write_wait_seconds: u64,
    /// 读超时；收到 pong 时刷新
    #[validate(range(min = 1))]
    pub pong_wait_seconds: u64,
    /// 单帧最大字节数
    #[validate(range(min = 1))]
    pub max_message_size: usize,
    /// 上下线时是否广播 user_joined / user_left
    pub announce_presence: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            send_queue_capacity: 256,
            command_queue_capacity: 1024,
            write_wait_seconds: 10,
            pong_wait_seconds: 60,
            max_message_size: 512,
            announce_presence: false,
        }
    }
}

impl HubConfig {
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_seconds)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_seconds)
    }

    /// 心跳周期，必须小于 pong 等待时间
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
}

impl AppConfig {
    /// 从默认值、可选配置文件和环境变量加载
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            figment = if path.ends_with(".yml") || path.ends_with(".yaml") {
                figment.merge(Yaml::file(path))
            } else if path.ends_with(".json") {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }
        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.validate_all()?;
        Ok(config)
    }

    /// 结构校验之外，生产环境还要求足够强度的 JWT 密钥
    pub fn validate_all(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if self.server.is_production() {
            if self.jwt.secret.len() < 32 {
                return Err(ConfigError::InvalidJwtSecret(
                    "JWT secret must be at least 32 characters long".to_string(),
                ));
            }
            if self.jwt.secret.contains("dev-secret")
                || self.jwt.secret.contains("not-for-production")
            {
                return Err(ConfigError::InvalidJwtSecret(
                    "Cannot use development JWT secret in production".to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate_all().is_ok());
        assert_eq!(config.hub.send_queue_capacity, 256);
        assert_eq!(config.hub.max_message_size, 512);
        assert_eq!(config.hub.ping_period(), Duration::from_secs(54));
        assert!(config.hub.ping_period() < config.hub.pong_wait());
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_env_overrides_nested_fields() {
        Jail::expect_with(|jail| {
            jail.set_env("CONVERSE_SERVER__PORT", "9090");
            jail.set_env("CONVERSE_HUB__SEND_QUEUE_CAPACITY", "8");
            jail.set_env("CONVERSE_DATABASE__URL", "postgres://db/chat");

            let config = AppConfig::load().expect("config");
            assert_eq!(config.server.port, 9090);
            assert_eq!(config.hub.send_queue_capacity, 8);
            assert_eq!(config.database.url.as_deref(), Some("postgres://db/chat"));
            Ok(())
        });
    }

    #[test]
    fn test_config_file_is_merged_below_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "converse.toml",
                r#"
                [server]
                port = 7000
                log_level = "debug"

                [hub]
                announce_presence = true
                "#,
            )?;
            jail.set_env(CONFIG_FILE_ENV, "converse.toml");
            jail.set_env("CONVERSE_SERVER__PORT", "7001");

            let config = AppConfig::load().expect("config");
            assert_eq!(config.server.port, 7001);
            assert_eq!(config.server.log_level, "debug");
            assert!(config.hub.announce_presence);
            Ok(())
        });
    }

    #[test]
    fn test_zero_queue_capacity_is_rejected() {
        let mut config = AppConfig::default();
        config.hub.send_queue_capacity = 0;
        assert!(matches!(config.validate_all(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_production_requires_strong_jwt_secret() {
        let mut config = AppConfig::default();
        config.server.environment = "production".to_string();
        assert!(matches!(
            config.validate_all(),
            Err(ConfigError::InvalidJwtSecret(_))
        ));

        config.jwt.secret = "short".to_string();
        assert!(config.validate_all().is_err());

        config.jwt.secret = "production-grade-secret-key-with-sufficient-length".to_string();
        assert!(config.validate_all().is_ok());
    }
}
