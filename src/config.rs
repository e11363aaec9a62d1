use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub matching: MatchingConfig,
    pub extraction: ExtractionConfig,
    pub fx: FxConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/receipt_matcher".to_string(),
            max_connections: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    File,
    Postgres,
}

/// 缓存存储位置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub cache_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            cache_dir: PathBuf::from("./cache"),
        }
    }
}

impl StorageConfig {
    pub fn extraction_cache_path(&self) -> PathBuf {
        self.cache_dir.join("receipt_extraction_cache.json")
    }

    pub fn rate_cache_path(&self) -> PathBuf {
        self.cache_dir.join("fx_rates.json")
    }
}

/// 匹配参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// 金额允许的相对误差 (百分比, 含边界)
    pub tolerance_percent: f64,
    /// 候选进入分配所需的最低置信度 (含边界)
    pub min_confidence: f64,
    /// 抽取置信度低于此值的领据不参与匹配
    pub min_extraction_confidence: f64,
    /// 默认检索窗口 (天)
    pub date_range_days: u32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            tolerance_percent: 3.0,
            min_confidence: 0.7,
            min_extraction_confidence: 0.5,
            date_range_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// 并发抽取的 worker 数
    pub max_workers: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { max_workers: 5 }
    }
}

/// 汇率配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FxConfig {
    pub domestic_currency: String,
    pub base_url: String,
    /// 当日无汇率时向前回退的最大天数
    pub fallback_days: u32,
    pub max_concurrent_lookups: usize,
    /// 单次汇率请求的总尝试次数 (含第一次)
    pub max_retries: u32,
    pub request_timeout_secs: u64,
}

impl Default for FxConfig {
    fn default() -> Self {
        Self {
            domestic_currency: "JPY".to_string(),
            base_url: "https://api.frankfurter.app".to_string(),
            fallback_days: 3,
            max_concurrent_lookups: 4,
            max_retries: 3,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// 加载顺序: 默认值 -> receipt-matcher.toml -> MATCHER__* 环境变量
    /// (DATABASE_URL / SERVER_HOST / SERVER_PORT 仍然生效)
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("receipt-matcher")
    }

    pub fn load_from(file_stem: &str) -> Result<Self, config::ConfigError> {
        let defaults = Config::try_from(&AppConfig::default())?;

        Config::builder()
            .add_source(defaults)
            .add_source(File::with_name(file_stem).required(false))
            .add_source(
                Environment::with_prefix("MATCHER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option(
                "server.port",
                std::env::var("SERVER_PORT").ok().and_then(|p| p.parse::<i64>().ok()),
            )?
            .build()?
            .try_deserialize()
    }
}
