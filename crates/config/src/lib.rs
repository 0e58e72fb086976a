//! 统一配置中心
//!
//! 配置按以下顺序叠加，后者覆盖前者：
//! - 内置开发默认值
//! - 可选的 YAML 配置文件
//! - `APP_` 前缀的环境变量（嵌套字段用 `__` 分隔，例如 `APP_JWT__SECRET`）

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    /// 管理员配置
    #[serde(default)]
    pub admin: AdminConfig,
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub bcrypt_cost: Option<u32>,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// 数据库配置
///
/// `url` 为空时使用进程内存储，仅适合开发和测试。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

/// JWT配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

/// 管理员配置
///
/// 使用 `emails` 中的邮箱注册的账号获得管理员角色。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminConfig {
    #[serde(default)]
    pub emails: Vec<String>,
}

impl Default for AppConfig {
    /// 开发环境默认值，生产环境必须通过文件或环境变量覆盖 JWT 密钥
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5000,
                bcrypt_cost: None,
                cors_origins: Vec::new(),
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: "dev-secret-key-not-for-production-use-minimum-32-chars".to_string(),
                expiration_hours: 24 * 30,
            },
            admin: AdminConfig::default(),
        }
    }
}

impl AppConfig {
    /// 构建配置来源
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed("APP_").split("__"))
    }

    /// 加载配置并校验
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment(path)
            .extract()
            .map_err(|err| ConfigError::Load(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 是否仍在使用内置的开发密钥
    pub fn uses_development_secret(&self) -> bool {
        self.jwt.secret.contains("dev-secret") || self.jwt.secret.contains("not-for-production")
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证JWT密钥长度（至少256位/32字节）
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT expiration must be positive".to_string(),
            ));
        }

        if let Some(url) = &self.database.url {
            if url.trim().is_empty() {
                return Err(ConfigError::InvalidDatabaseUrl(
                    "Database URL cannot be empty".to_string(),
                ));
            }
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidDatabaseConfig(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerPort(
                "port must be greater than 0".to_string(),
            ));
        }

        if let Some(email) = self.admin.emails.iter().find(|email| !email.contains('@')) {
            return Err(ConfigError::InvalidServerConfig(format!(
                "admin email {email} is not a valid address"
            )));
        }

        // 验证bcrypt cost（如果设置）
        if let Some(cost) = self.server.bcrypt_cost {
            if !(4..=31).contains(&cost) {
                return Err(ConfigError::InvalidServerConfig(
                    "bcrypt cost must be between 4 and 31".to_string(),
                ));
            }
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid server port: {0}")]
    InvalidServerPort(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.database.url.is_none());
        assert!(config.uses_development_secret());
    }

    #[test]
    fn test_env_overrides_defaults() {
        Jail::expect_with(|jail| {
            jail.set_env("APP_SERVER__PORT", "9090");
            jail.set_env(
                "APP_JWT__SECRET",
                "production-secret-key-with-at-least-32-characters",
            );
            jail.set_env("APP_DATABASE__URL", "postgres://user:pass@db:5432/chat");

            let config = AppConfig::load(None).expect("config");
            assert_eq!(config.server.port, 9090);
            assert_eq!(
                config.database.url.as_deref(),
                Some("postgres://user:pass@db:5432/chat")
            );
            assert!(!config.uses_development_secret());
            Ok(())
        });
    }

    #[test]
    fn test_yaml_file_is_merged_before_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "app.yaml",
                r#"
server:
  host: 0.0.0.0
  port: 7000
jwt:
  secret: yaml-secret-key-with-at-least-32-characters
  expiration_hours: 12
admin:
  emails:
    - admin@everlink.example
"#,
            )?;
            jail.set_env("APP_SERVER__PORT", "7100");

            let config = AppConfig::load(Some(Path::new("app.yaml"))).expect("config");
            assert_eq!(config.server.host, "0.0.0.0");
            assert_eq!(config.server.port, 7100);
            assert_eq!(config.jwt.expiration_hours, 12);
            assert_eq!(config.admin.emails, vec!["admin@everlink.example".to_string()]);
            Ok(())
        });
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();

        // 测试无效JWT密钥长度
        config.jwt.secret = "short".to_string();
        assert!(config.validate().is_err());

        config.jwt.secret = "production-grade-secret-key-with-sufficient-length".to_string();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        config.database.max_connections = 5;
        config.database.url = Some("   ".to_string());
        assert!(config.validate().is_err());

        config.database.url = None;
        config.admin.emails = vec!["not-an-address".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bcrypt_cost_validation() {
        let mut config = AppConfig::default();

        config.server.bcrypt_cost = Some(12);
        assert!(config.validate().is_ok());

        config.server.bcrypt_cost = Some(2);
        assert!(config.validate().is_err());

        config.server.bcrypt_cost = Some(40);
        assert!(config.validate().is_err());
    }
}
