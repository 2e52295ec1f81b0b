use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Startup configuration, loaded once from a JSON file (SPEC_FULL.md §6, §10.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_wasm")]
    pub max_wasm_containers: u32,
    #[serde(default = "default_max_native")]
    pub max_native_containers: u32,
    #[serde(default = "default_rps_epoch")]
    pub rps_epoch: u32,
    #[serde(default = "default_sample_threshold")]
    pub invocation_sample_threshold: u32,
    #[serde(default = "default_cleanup_interval")]
    pub container_cleanup_interval: u64,
    #[serde(default = "default_expiration_time")]
    pub container_expiration_time: u64,
    #[serde(default = "default_log_level")]
    pub default_log_level: String,
    #[serde(default = "default_log_level")]
    pub curr_log_level: String,
    #[serde(default = "default_use_database")]
    pub use_database: bool,
}

fn default_max_wasm() -> u32 {
    16
}
fn default_max_native() -> u32 {
    16
}
fn default_rps_epoch() -> u32 {
    10
}
fn default_sample_threshold() -> u32 {
    100
}
fn default_cleanup_interval() -> u64 {
    30
}
fn default_expiration_time() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_use_database() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_wasm_containers: default_max_wasm(),
            max_native_containers: default_max_native(),
            rps_epoch: default_rps_epoch(),
            invocation_sample_threshold: default_sample_threshold(),
            container_cleanup_interval: default_cleanup_interval(),
            container_expiration_time: default_expiration_time(),
            default_log_level: default_log_level(),
            curr_log_level: default_log_level(),
            use_database: default_use_database(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidInput(format!("reading config {path:?}: {e}")))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::InvalidInput(format!("parsing config {path:?}: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.max_wasm_containers == 0 {
            return Err(Error::InvalidInput(
                "max_wasm_containers must be > 0".into(),
            ));
        }
        if self.max_native_containers == 0 {
            return Err(Error::InvalidInput(
                "max_native_containers must be > 0".into(),
            ));
        }
        if self.invocation_sample_threshold == 0 {
            return Err(Error::InvalidInput(
                "invocation_sample_threshold must be > 0".into(),
            ));
        }
        if self.container_cleanup_interval == 0 {
            return Err(Error::InvalidInput(
                "container_cleanup_interval must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn to_json_string(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Internal(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn parse_minimal_json_fills_defaults() {
        let json = r#"{"max_wasm_containers": 4}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.max_wasm_containers, 4);
        assert_eq!(config.max_native_containers, 16);
        assert_eq!(config.container_expiration_time, 300);
    }

    #[test]
    fn rejects_zero_caps() {
        let mut config = Config::default();
        config.max_native_containers = 0;
        assert!(config.validate().is_err());
    }
}
