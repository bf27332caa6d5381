/*!
 * Logging and tracing initialization
 */

use std::fs::File;
use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ClientConfig;
use crate::error::{PeriscopeError, Result};

/// Install the global tracing subscriber described by the configuration:
/// a compact layer on stdout, or a JSON layer when a log file is set.
/// `RUST_LOG` in the environment overrides the configured level.
pub fn init_logging(config: &ClientConfig) -> Result<()> {
    let filter = build_filter(config)?;
    match &config.log_file {
        Some(path) => init_file_logging(path, filter),
        None => {
            init_stdout_logging(filter);
            Ok(())
        }
    }
}

fn build_filter(config: &ClientConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let level = if config.verbose {
        tracing::Level::DEBUG
    } else {
        config.log_level.to_tracing_level()
    };
    EnvFilter::try_new(format!("periscope={}", level))
        .map_err(|e| PeriscopeError::Config(format!("invalid log filter: {}", e)))
}

fn init_stdout_logging(filter: EnvFilter) {
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).compact())
        .init();
}

fn init_file_logging(log_path: &Path, filter: EnvFilter) -> Result<()> {
    let file = File::create(log_path).map_err(|e| {
        PeriscopeError::Config(format!("cannot create log file {}: {}", log_path.display(), e))
    })?;

    // One JSON object per line; thread names matter here because cache
    // maintenance runs off the calling thread
    let layer = fmt::layer()
        .with_writer(file)
        .with_thread_names(true)
        .json();

    tracing_subscriber::registry().with(filter).with(layer).init();
    Ok(())
}
