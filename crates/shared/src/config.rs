//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

use crate::error::{KiekjeError, Result};

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// 日志输出格式：json（结构化）或 pretty（人类可读）
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}

/// 每日提醒配置
///
/// 时间窗口与随机延迟默认关闭，此时扫描在 cron 触发时立即发送。
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReminderConfig {
    /// 六段式 cron 表达式（秒 分 时 日 月 周），UTC
    pub cron: String,
    /// 按档案查询当日条目时的最大并发数
    pub scan_concurrency: usize,
    /// 允许执行扫描的起始小时（含），UTC
    pub window_start_hour: Option<u32>,
    /// 允许执行扫描的结束小时（不含），UTC；可小于起始小时以跨越午夜
    pub window_end_hour: Option<u32>,
    /// 每条提醒的最大随机延迟（分钟），0 表示立即发送
    pub max_spread_minutes: u64,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            cron: "0 0 9 * * *".to_string(),
            scan_concurrency: 8,
            window_start_hour: None,
            window_end_hour: None,
            max_spread_minutes: 0,
        }
    }
}

impl ReminderConfig {
    /// 返回生效的执行窗口，起止小时必须同时配置
    pub fn window(&self) -> Option<(u32, u32)> {
        match (self.window_start_hour, self.window_end_hour) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }
}

/// 文档存储配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON 快照路径，用于初始化内存存储
    pub snapshot_path: Option<String>,
}

/// 延迟任务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeferredConfig {
    /// 到期任务的轮询间隔
    pub poll_interval_secs: u64,
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 60,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub observability: ObservabilityConfig,
    pub reminder: ReminderConfig,
    pub store: StoreConfig,
    pub deferred: DeferredConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（KIEKJE_ 前缀，双下划线分隔层级，如 KIEKJE_REMINDER__CRON -> reminder.cron）
    pub fn load(service_name: &str) -> std::result::Result<Self, ConfigError> {
        // .env 文件不存在时忽略
        let _ = dotenvy::dotenv();

        let env = std::env::var("KIEKJE_ENV").unwrap_or_else(|_| "development".to_string());

        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env.clone())?
            .add_source(File::from(Path::new(&config_dir).join("default.toml")).required(false))
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", env))).required(false),
            )
            .add_source(
                File::from(Path::new(&config_dir).join(format!("{}.toml", service_name)))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix("KIEKJE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 校验配置取值范围
    pub fn validate(&self) -> Result<()> {
        if self.reminder.scan_concurrency == 0 {
            return Err(KiekjeError::Validation(
                "reminder.scan_concurrency 必须大于 0".to_string(),
            ));
        }

        let hours = [self.reminder.window_start_hour, self.reminder.window_end_hour];
        if hours.iter().flatten().any(|h| *h > 23) {
            return Err(KiekjeError::Validation(
                "reminder 执行窗口小时必须在 0-23 之间".to_string(),
            ));
        }

        if self.reminder.window_start_hour.is_some() != self.reminder.window_end_hour.is_some() {
            return Err(KiekjeError::Validation(
                "reminder.window_start_hour 与 reminder.window_end_hour 必须同时配置".to_string(),
            ));
        }

        if self.deferred.poll_interval_secs == 0 {
            return Err(KiekjeError::Validation(
                "deferred.poll_interval_secs 必须大于 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.reminder.cron, "0 0 9 * * *");
        assert_eq!(config.reminder.scan_concurrency, 8);
        assert_eq!(config.reminder.max_spread_minutes, 0);
        assert!(config.reminder.window().is_none());
        assert_eq!(config.deferred.poll_interval_secs, 60);
        assert!(!config.observability.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_window_requires_both_hours() {
        let mut config = AppConfig::default();
        config.reminder.window_start_hour = Some(8);
        assert!(config.reminder.window().is_none());
        assert!(config.validate().is_err());

        config.reminder.window_end_hour = Some(20);
        assert_eq!(config.reminder.window(), Some((8, 20)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_values() {
        let mut config = AppConfig::default();
        config.reminder.window_start_hour = Some(8);
        config.reminder.window_end_hour = Some(24);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.reminder.scan_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_log_format() {
        let config = ObservabilityConfig {
            log_format: "JSON".to_string(),
            ..Default::default()
        };
        assert!(config.json_logs());
        assert!(!ObservabilityConfig::default().json_logs());
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let config: AppConfig = Config::builder()
            .add_source(config::File::from_str(
                r#"
                service_name = "notification-worker"

                [reminder]
                cron = "0 30 8 * * *"
                max_spread_minutes = 720
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .and_then(|c| c.try_deserialize())
            .expect("解析配置失败");

        assert_eq!(config.service_name, "notification-worker");
        assert_eq!(config.reminder.cron, "0 30 8 * * *");
        assert_eq!(config.reminder.max_spread_minutes, 720);
        // 未配置的字段回落到默认值
        assert_eq!(config.reminder.scan_concurrency, 8);
        assert_eq!(config.observability.log_level, "info");
    }
}
