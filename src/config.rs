use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub calculator: CalculatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub slow_statement_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalculatorConfig {
    /// 金额小数位
    pub currency_precision: i64,
    /// 超过该金额的采购估价单需要审批
    pub estimate_approval_threshold: BigDecimal,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/purchase_discount".to_string(),
                max_connections: 20,
                acquire_timeout_secs: 10,
                slow_statement_secs: 5,
            },
            calculator: CalculatorConfig {
                currency_precision: 2,
                estimate_approval_threshold: BigDecimal::from(100_000),
            },
        }
    }
}

impl AppConfig {
    /// 加载配置：默认值 < APP__SECTION__KEY 环境变量 < DATABASE_URL
    pub fn from_env() -> Result<Self, config::ConfigError> {
        let defaults = Self::default();

        config::Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", defaults.server.port as i64)?
            .set_default("database.url", defaults.database.url)?
            .set_default("database.max_connections", defaults.database.max_connections as i64)?
            .set_default("database.acquire_timeout_secs", defaults.database.acquire_timeout_secs as i64)?
            .set_default("database.slow_statement_secs", defaults.database.slow_statement_secs as i64)?
            .set_default("calculator.currency_precision", defaults.calculator.currency_precision)?
            .set_default(
                "calculator.estimate_approval_threshold",
                defaults.calculator.estimate_approval_threshold.to_string(),
            )?
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_deserialize_without_environment() {
        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.calculator.currency_precision, 2);
        assert_eq!(config.calculator.estimate_approval_threshold, BigDecimal::from(100_000));
        assert!(config.server.port > 0);
    }
}
