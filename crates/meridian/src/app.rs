//! Application lifecycle: catalog assembly, server startup, health
//! reporting, graceful shutdown.

use crate::cli::CliArgs;
use crate::config::AppConfig;
use crate::logging::display_banner;
use crate::signals::wait_for_shutdown;
use host_server::HostServer;
use module_system::ModuleCatalog;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(60);

pub struct Application {
    config: AppConfig,
    server: Arc<HostServer>,
}

impl Application {
    /// Loads configuration, applies CLI overrides, assembles the module
    /// catalog, and constructs the host server.
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;

        if let Some(log_level) = args.log_level {
            config.logging.level = log_level;
        }
        if args.json_logs {
            config.logging.json_format = true;
        }
        if args.no_telemetry {
            config.modules.telemetry_enabled = false;
        }

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated");

        display_banner();

        let catalog = build_catalog(&config);
        let server = HostServer::new(config.host.clone(), catalog)?;

        info!(
            "📂 Config: {} | Telemetry: {} | Users: {}",
            args.config_path.display(),
            config.modules.telemetry_enabled,
            config.modules.users.len()
        );

        Ok(Self { config, server })
    }

    /// Starts the host, reports health periodically, and drains to Stopped
    /// on the first termination signal.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        info!("🌟 Starting Meridian Module Host");
        info!(
            session_ttl_secs = self.config.host.session_ttl_secs,
            exclusive_login = self.config.host.exclusive_login,
            "⚙️ session policy"
        );

        let fully = self.server.start().await?;
        if !fully {
            warn!("⚠️ startup completed with one or more module failures");
        }
        info!(
            modules = self.server.lifecycle().len(),
            "✅ Host is serving"
        );

        let mut health = tokio::time::interval(HEALTH_REPORT_INTERVAL);
        health.tick().await; // immediate first tick
        let shutdown = wait_for_shutdown();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = &mut shutdown => {
                    result?;
                    break;
                }
                _ = health.tick() => {
                    info!(
                        state = %self.server.state(),
                        modules = self.server.lifecycle().len(),
                        sessions = self.server.sessions().session_count(),
                        "📊 health report"
                    );
                }
            }
        }

        self.server.stop().await?;
        info!("👋 Meridian Module Host shut down cleanly");
        Ok(())
    }
}

/// Assembles the module catalog from the configuration.
fn build_catalog(config: &AppConfig) -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    catalog.register(module_auth_memory::registration(
        config.modules.users.clone(),
    ));

    let telemetry = module_telemetry::registration_with_interval(Duration::from_secs(
        config.modules.heartbeat_interval_secs,
    ));
    if config.modules.telemetry_enabled {
        catalog.register(telemetry);
    } else {
        catalog.register(telemetry.disabled());
    }
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_respects_telemetry_toggle() {
        let mut config = AppConfig::default();
        let catalog = build_catalog(&config);
        assert_eq!(catalog.load_order().len(), 2);

        config.modules.telemetry_enabled = false;
        let catalog = build_catalog(&config);
        assert_eq!(catalog.load_order().len(), 1);
        // Disabled, not absent.
        assert!(catalog.get(module_telemetry::MODULE_NAME).is_some());
    }

    #[test]
    fn auth_module_loads_before_telemetry() {
        let catalog = build_catalog(&AppConfig::default());
        let names: Vec<&str> = catalog
            .load_order()
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                module_auth_memory::MODULE_NAME,
                module_telemetry::MODULE_NAME
            ]
        );
    }
}
