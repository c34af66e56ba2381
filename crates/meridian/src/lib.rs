//! # Meridian Module Host - Entry Point
//!
//! Modular server host: independently registered modules are loaded, wired
//! together over a typed message bus, and torn down under centrally enforced
//! timeouts and ordering rules, while a session layer authenticates clients
//! and buffers their outbound messages for pull delivery.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run with default configuration (meridian.toml, created if missing)
//! meridian
//!
//! # Specify custom configuration
//! meridian --config production.toml
//!
//! # Override log level, JSON logging for production
//! meridian --log-level debug --json-logs
//! ```
//!
//! ## Signal Handling
//!
//! The host drains to Stopped on SIGINT (Ctrl+C) or SIGTERM: modules are
//! unloaded in exact reverse load order with bounded teardown timeouts.

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

/// Full application lifecycle: parse CLI, load configuration, set up
/// logging, run until a termination signal, drain, exit.
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Configuration is loaded once here just for the logging settings; the
    // application re-loads it with full validation and overrides.
    let config = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default();

    if let Err(e) = logging::setup_logging(&config.logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {e}");
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{LoggingSettings, ModuleSettings};
