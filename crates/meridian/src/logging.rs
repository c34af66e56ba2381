//! Logging setup on top of tracing-subscriber.

use crate::config::LoggingSettings;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the tracing subscriber. `RUST_LOG` wins over the configured
/// level; `json_format` (from the config or the CLI flag) switches output to
/// structured JSON records.
pub fn setup_logging(
    config: &LoggingSettings,
    json_format: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let registry = tracing_subscriber::registry().with(filter);

    if json_format || config.json_format {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_file(false)
                    .with_line_number(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .init();
    }

    info!("🔧 Logging initialized with level: {}", config.level);
    Ok(())
}

/// Startup banner, through the logger rather than stdout.
pub fn display_banner() {
    let version = option_env!("CARGO_PKG_VERSION").unwrap_or("UNK");
    info!("╔══════════════════════════════════════════╗");
    info!("║           ⬡ MERIDIAN HOST ⬡             ║");
    info!("║               v{}                     ║", version);
    info!("║                                          ║");
    info!("║  Modular Server Host                     ║");
    info!("║                                          ║");
    info!("║  📦 Lifecycle-Managed Modules            ║");
    info!("║  📨 Typed Publish/Subscribe Bus          ║");
    info!("║  🔐 Session & Auth Management            ║");
    info!("║  ⏱️  Bounded Lifecycle Timeouts           ║");
    info!("║                                          ║");
    info!("╚══════════════════════════════════════════╝");
}
