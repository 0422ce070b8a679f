//! Startup configuration: loading from a TOML file, `LOOM_*` environment
//! overrides, and validation via [`config_validator::ConfigValidator`] —
//! every violation is collected and reported at once rather than failing
//! fast on the first one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config_validator::{format_validation_errors, ConfigValidator};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    /// Address the HTTP server binds to, e.g. `0.0.0.0:7070`.
    pub bind_addr: String,
    /// Directory the store snapshots into. Created on startup if absent.
    pub data_dir: PathBuf,
    /// Per-call timeout for the dispatch-step ack (recommended default ~30s).
    pub dispatch_timeout_ms: u64,
    /// Per-call timeout for dry-run requests, generally longer since the
    /// migrator computes a diff synchronously.
    pub dry_run_timeout_ms: u64,
    /// Dispatch activity retry policy.
    pub dispatch_max_attempts: u32,
    pub dispatch_base_delay_ms: u64,
}

impl Default for LoomConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:7070".to_string(),
            data_dir: PathBuf::from("./loom-data"),
            dispatch_timeout_ms: 30_000,
            dry_run_timeout_ms: 60_000,
            dispatch_max_attempts: 5,
            dispatch_base_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {message}")]
    Read { path: String, message: String },
    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid configuration:\n{0}")]
    Invalid(String),
}

impl LoomConfig {
    /// Loads from `path` if it exists (TOML), else starts from defaults;
    /// either way, `LOOM_*` environment variables override the loaded
    /// values, and the result is validated before being returned.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LOOM_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("LOOM_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("LOOM_DISPATCH_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse() {
                self.dispatch_timeout_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("LOOM_DRY_RUN_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse() {
                self.dry_run_timeout_ms = parsed;
            }
        }
        if let Ok(v) = std::env::var("LOOM_DISPATCH_MAX_ATTEMPTS") {
            if let Ok(parsed) = v.parse() {
                self.dispatch_max_attempts = parsed;
            }
        }
        if let Ok(v) = std::env::var("LOOM_DISPATCH_BASE_DELAY_MS") {
            if let Ok(parsed) = v.parse() {
                self.dispatch_base_delay_ms = parsed;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let mut validator = ConfigValidator::new();
        validator.validate_non_empty("bind_addr", &self.bind_addr);
        validator.validate_duration_ms("dispatch_timeout_ms", self.dispatch_timeout_ms, 1_000, 120_000);
        validator.validate_duration_ms("dry_run_timeout_ms", self.dry_run_timeout_ms, 1_000, 300_000);
        validator.validate_range("dispatch_max_attempts", self.dispatch_max_attempts as i64, 1, 20);
        validator.validate_duration_ms("dispatch_base_delay_ms", self.dispatch_base_delay_ms, 10, 60_000);

        if self.data_dir.exists() {
            validator.validate_is_directory("data_dir", &self.data_dir);
            validator.validate_writable("data_dir", &self.data_dir);
        }

        validator
            .finish()
            .map_err(|errors| ConfigError::Invalid(format_validation_errors(&errors)))
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }

    pub fn dry_run_timeout(&self) -> Duration {
        Duration::from_millis(self.dry_run_timeout_ms)
    }

    /// Renders a starter config file for `loom-server init`.
    pub fn render_starter_toml() -> String {
        toml::to_string_pretty(&Self::default()).expect("default config always serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = LoomConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_timeout() {
        let mut config = LoomConfig::default();
        config.dispatch_timeout_ms = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_falls_back_to_defaults_when_file_absent() {
        let config = LoomConfig::load(Path::new("/nonexistent/loom.toml")).unwrap();
        assert_eq!(config.bind_addr, LoomConfig::default().bind_addr);
    }

    #[test]
    fn starter_toml_round_trips() {
        let rendered = LoomConfig::render_starter_toml();
        let parsed: LoomConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.bind_addr, LoomConfig::default().bind_addr);
    }
}
