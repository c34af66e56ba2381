//! Application configuration loaded from a TOML file.
//!
//! Missing files are created with defaults; every field has a default so a
//! partial file keeps working across upgrades.

use host_server::HostConfig;
use module_auth_memory::UserRecord;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    /// Host engine settings (lifecycle timeouts, session policy).
    #[serde(default)]
    pub host: HostConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Module catalog settings.
    #[serde(default)]
    pub modules: ModuleSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default log level when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON-formatted log records.
    #[serde(default)]
    pub json_format: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleSettings {
    /// Run the telemetry heartbeat module.
    #[serde(default = "default_telemetry_enabled")]
    pub telemetry_enabled: bool,
    /// Heartbeat publish interval.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// User table for the in-memory auth module.
    #[serde(default = "default_users")]
    pub users: Vec<UserRecord>,
}

fn default_telemetry_enabled() -> bool {
    true
}

fn default_heartbeat_interval_secs() -> u64 {
    60
}

fn default_users() -> Vec<UserRecord> {
    vec![UserRecord::new("admin", "admin").with_permissions(&["core.remote_access"])]
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            telemetry_enabled: default_telemetry_enabled(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            users: default_users(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path`, creating a default file when missing.
    pub async fn load_from_file(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        if self.modules.telemetry_enabled && self.modules.heartbeat_interval_secs == 0 {
            return Err("modules.heartbeat_interval_secs must be greater than 0".to_string());
        }

        if self.modules.users.is_empty() {
            return Err("modules.users must contain at least one user".to_string());
        }

        self.host.validate().map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.logging.level, "info");
        assert!(config.modules.telemetry_enabled);
        assert_eq!(config.modules.users.len(), 1);
    }

    #[test]
    fn invalid_log_level_fails_validation() {
        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_heartbeat_with_telemetry_fails_validation() {
        let mut config = AppConfig::default();
        config.modules.heartbeat_interval_secs = 0;
        assert!(config.validate().is_err());

        config.modules.telemetry_enabled = false;
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meridian.toml");

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert!(config.validate().is_ok());
        assert!(path.exists());

        // A second load reads the file that was just written.
        let again = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(again.logging.level, config.logging.level);
    }

    #[tokio::test]
    async fn partial_file_keeps_defaults_for_missing_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meridian.toml");
        tokio::fs::write(
            &path,
            r#"
            [logging]
            level = "debug"

            [host]
            session_ttl_secs = 60
            "#,
        )
        .await
        .unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.host.session_ttl_secs, 60);
        assert_eq!(config.host.init_timeout_secs, 30);
        assert!(config.modules.telemetry_enabled);
    }

    #[tokio::test]
    async fn users_deserialize_from_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meridian.toml");
        tokio::fs::write(
            &path,
            r#"
            [[modules.users]]
            login = "ops"
            credential = "hunter2"
            permissions = ["core.remote_access"]
            org_group = 4
            "#,
        )
        .await
        .unwrap();

        let config = AppConfig::load_from_file(&path).await.unwrap();
        assert_eq!(config.modules.users.len(), 1);
        assert_eq!(config.modules.users[0].login, "ops");
        assert_eq!(config.modules.users[0].org_group, 4);
    }
}
