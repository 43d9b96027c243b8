//! Tracing subscriber setup
//!
//! Installed once by the binary. `RUST_LOG` overrides the configured level.

use anyhow::{anyhow, Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::Level;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Filter for `level`, letting `RUST_LOG` take over when set
pub fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy()
}

/// Install the global subscriber described by `config`.
///
/// `verbose` forces DEBUG regardless of the configured level.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow!("Failed to parse log level: {}", e))?
    };

    let writer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(writer);

    let installed = match config.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "pretty" => builder.pretty().try_init(),
        _ => builder.compact().try_init(),
    };

    installed.map_err(|e| anyhow!("Failed to install tracing subscriber: {}", e))
}
