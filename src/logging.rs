//! Tracing subscriber setup

use std::fs::OpenOptions;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber; `RUST_LOG` takes precedence over `config.level`
pub fn init_logging(config: &LoggingConfig) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("moldb={}", config.level)));
    let json = config.format.eq_ignore_ascii_case("json");

    match &config.file {
        Some(path) => {
            let file = Arc::new(OpenOptions::new().create(true).append(true).open(path)?);
            let layer = fmt::layer().with_writer(file).with_ansi(false);
            if json {
                tracing_subscriber::registry().with(filter).with(layer.json()).init();
            } else {
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
        }
        None => {
            let layer = fmt::layer().with_writer(std::io::stderr);
            if json {
                tracing_subscriber::registry().with(filter).with(layer.json()).init();
            } else {
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
        }
    }
    Ok(())
}
