use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

pub use common::config::{BrokerConfig, CacheConfig, DatabaseConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default = "default_allow_origins")]
    pub allow_origins: Vec<String>,
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

fn default_allow_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}
fn default_cors_max_age() -> u64 {
    3600
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allow_origins: default_allow_origins(),
            max_age: default_cors_max_age(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub cors: CorsConfig,
    /// Submissions accepted per minute before 429. 0 disables the limiter.
    #[serde(default = "default_submission_rate")]
    pub submission_rate_per_minute: u32,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    3000
}
fn default_submission_rate() -> u32 {
    120
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors: CorsConfig::default(),
            submission_rate_per_minute: default_submission_rate(),
        }
    }
}

/// Stuck-job detector settings. The timeout must sit above the longest
/// primary-queue TTL so the broker's own dead-lettering gets first pick.
#[derive(Debug, Deserialize, Clone)]
pub struct StuckJobConfig {
    #[serde(default = "default_stuck_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_stuck_scan_interval_secs")]
    pub scan_interval_secs: u64,
}

fn default_stuck_timeout_secs() -> u64 {
    7200
}
fn default_stuck_scan_interval_secs() -> u64 {
    300
}

impl Default for StuckJobConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_stuck_timeout_secs(),
            scan_interval_secs: default_stuck_scan_interval_secs(),
        }
    }
}

/// Queue-depth monitor settings.
#[derive(Debug, Deserialize, Clone)]
pub struct MonitorConfig {
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
}

fn default_monitor_interval_secs() -> u64 {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub stuck: StuckJobConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CAMFORGE_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 3000_i64)?
            // Load from config/config.toml
            .add_source(File::with_name(&config_path).required(false))
            // Override from environment (e.g. CAMFORGE__DATABASE__URL)
            .add_source(Environment::with_prefix("CAMFORGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
