use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// PostgreSQL connection URL; when absent the service runs on the
    /// in-memory backend (dev mode).
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

/// Recovery worker tuning
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RecoveryConfig {
    pub scan_interval_secs: u64,
    pub stale_threshold_secs: u64,
    pub batch_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 30,
            stale_threshold_secs: 60,
            batch_size: 100,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_dir: "logs".to_string(),
            log_file: "propflow.log".to_string(),
            use_json: false,
            rotation: "daily".to_string(),
            postgres_url: None,
            recovery: RecoveryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file, falling back to defaults when the
    /// file is missing. `DATABASE_URL` overrides the file's `postgres_url`.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config: AppConfig = match fs::read_to_string(path) {
            Ok(contents) => serde_yaml::from_str(&contents)?,
            Err(_) => AppConfig::default(),
        };

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.postgres_url = Some(url);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.log_level, "info");
        assert!(config.postgres_url.is_none());
        assert_eq!(config.recovery.scan_interval_secs, 30);
        assert_eq!(config.recovery.batch_size, 100);
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
log_level: debug
log_dir: /var/log/propflow
log_file: core.log
use_json: true
rotation: hourly
recovery:
  scan_interval_secs: 10
  stale_threshold_secs: 30
  batch_size: 25
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(config.use_json);
        assert_eq!(config.recovery.stale_threshold_secs, 30);
    }
}
