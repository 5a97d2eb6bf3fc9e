use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use common::WorkloadClass;
pub use common::config::{BrokerConfig, CacheConfig, DatabaseConfig};

/// Worker-specific configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    /// Unique identifier for this worker instance. Default: "worker-1".
    #[serde(default = "default_worker_id")]
    pub id: String,
    /// Workload classes this worker consumes. Default: all classes.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
}

fn default_worker_id() -> String {
    "worker-1".into()
}
fn default_queues() -> Vec<String> {
    WorkloadClass::ALL
        .iter()
        .map(|c| c.as_str().to_string())
        .collect()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            id: default_worker_id(),
            queues: default_queues(),
        }
    }
}

/// Worker application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct WorkerAppConfig {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl WorkerAppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CAMFORGE_CONFIG").unwrap_or_else(|_| "config/config".to_string());

        let s = Config::builder()
            .set_default("worker.id", "worker-1")?
            .add_source(File::with_name(&config_path).required(false))
            .add_source(Environment::with_prefix("CAMFORGE").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_queues_cover_every_class() {
        let config = WorkerConfig::default();
        assert_eq!(config.queues.len(), WorkloadClass::ALL.len());
        for name in &config.queues {
            assert!(name.parse::<WorkloadClass>().is_ok());
        }
    }
}
