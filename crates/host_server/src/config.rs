//! Host configuration with serde defaults.
//!
//! Every field has a default so a partial (or empty) config section
//! deserializes to a working host. Durations are plain seconds in the file.

use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use session_manager::SessionConfig;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Default bound for a module's `initialize` phase.
    #[serde(default = "default_init_timeout_secs")]
    pub init_timeout_secs: u64,

    /// Bound for each module's `post_initialize` / `pre_uninitialize` pass.
    #[serde(default = "default_post_init_timeout_secs")]
    pub post_init_timeout_secs: u64,

    /// Bound for `uninitialize` and for bus-worker stop during unload.
    #[serde(default = "default_unload_timeout_secs")]
    pub unload_timeout_secs: u64,

    /// Sliding session expiration window.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Interval between session expiration sweeps.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Expiry window for buffered mailbox entries.
    #[serde(default = "default_mailbox_ttl_secs")]
    pub mailbox_ttl_secs: u64,

    /// Reject a second logon for an active login unless flagged as a retry.
    #[serde(default = "default_exclusive_login")]
    pub exclusive_login: bool,
}

fn default_init_timeout_secs() -> u64 {
    30
}

fn default_post_init_timeout_secs() -> u64 {
    15
}

fn default_unload_timeout_secs() -> u64 {
    10
}

fn default_session_ttl_secs() -> u64 {
    30 * 60
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_mailbox_ttl_secs() -> u64 {
    5 * 60
}

fn default_exclusive_login() -> bool {
    true
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            init_timeout_secs: default_init_timeout_secs(),
            post_init_timeout_secs: default_post_init_timeout_secs(),
            unload_timeout_secs: default_unload_timeout_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            mailbox_ttl_secs: default_mailbox_ttl_secs(),
            exclusive_login: default_exclusive_login(),
        }
    }
}

impl HostConfig {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn post_init_timeout(&self) -> Duration {
        Duration::from_secs(self.post_init_timeout_secs)
    }

    pub fn unload_timeout(&self) -> Duration {
        Duration::from_secs(self.unload_timeout_secs)
    }

    /// The session-layer slice of the host configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            mailbox_ttl: Duration::from_secs(self.mailbox_ttl_secs),
            exclusive_login: self.exclusive_login,
        }
    }

    pub fn validate(&self) -> Result<(), ServerError> {
        let nonzero = [
            ("init_timeout_secs", self.init_timeout_secs),
            ("post_init_timeout_secs", self.post_init_timeout_secs),
            ("unload_timeout_secs", self.unload_timeout_secs),
            ("session_ttl_secs", self.session_ttl_secs),
            ("sweep_interval_secs", self.sweep_interval_secs),
            ("mailbox_ttl_secs", self.mailbox_ttl_secs),
        ];
        for (name, value) in nonzero {
            if value == 0 {
                return Err(ServerError::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let config: HostConfig = toml::from_str("").unwrap();
        assert_eq!(config.init_timeout_secs, 30);
        assert_eq!(config.unload_timeout_secs, 10);
        assert!(config.exclusive_login);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let config: HostConfig = toml::from_str(
            r#"
            init_timeout_secs = 5
            exclusive_login = false
            "#,
        )
        .unwrap();
        assert_eq!(config.init_timeout_secs, 5);
        assert!(!config.exclusive_login);
        assert_eq!(config.session_ttl_secs, 30 * 60);
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let config = HostConfig {
            unload_timeout_secs: 0,
            ..HostConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unload_timeout_secs"));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let config = HostConfig {
            session_ttl_secs: 120,
            ..HostConfig::default()
        };
        let text = toml::to_string(&config).unwrap();
        let back: HostConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.session_ttl_secs, 120);
        assert_eq!(back.init_timeout_secs, config.init_timeout_secs);
    }
}
