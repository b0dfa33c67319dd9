// src/logging.rs

use color_eyre::eyre::{Result, WrapErr};
use directories::ProjectDirs;
use lazy_static::lazy_static;
use std::path::PathBuf;
use tracing_error::ErrorLayer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

lazy_static! {
    /// `NETAUDIT_LOGLEVEL`, consulted when `RUST_LOG` is unset.
    pub static ref LOG_LEVEL_ENV: String = format!("{}LOGLEVEL", *crate::config::ENV_PREFIX);
    /// `NETAUDIT_LOG_DIR`, overrides the platform data directory.
    pub static ref LOG_DIR_ENV: String = format!("{}LOG_DIR", *crate::config::ENV_PREFIX);
    pub static ref LOG_FILE: String = format!("{}.log", env!("CARGO_PKG_NAME"));
}

/// Directory the audit log is written to.
pub fn log_directory() -> PathBuf {
    if let Ok(dir) = std::env::var(LOG_DIR_ENV.as_str()) {
        return PathBuf::from(dir);
    }
    match ProjectDirs::from("com", "netaudit", env!("CARGO_PKG_NAME")) {
        Some(dirs) => dirs.data_local_dir().to_path_buf(),
        None => PathBuf::from(".").join(".data"),
    }
}

fn file_filter() -> EnvFilter {
    let directives = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(LOG_LEVEL_ENV.as_str()))
        .unwrap_or_else(|_| format!("{}=info,netaudit=info", env!("CARGO_CRATE_NAME")));
    EnvFilter::new(directives)
}

/// Installs the global subscriber: events at the configured level go to the
/// log file, warnings and errors are echoed to stderr.
///
/// Only the runner binary calls this; the library emits events and leaves
/// the subscriber to whoever embeds it. Returns the log file path.
pub fn initialize_logging() -> Result<PathBuf> {
    let directory = log_directory();
    std::fs::create_dir_all(&directory)
        .wrap_err_with(|| format!("creating log directory {}", directory.display()))?;
    let log_path = directory.join(LOG_FILE.as_str());
    let log_file = std::fs::File::create(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_target(false)
        .with_ansi(false)
        .with_filter(file_filter());

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(LevelFilter::WARN);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(ErrorLayer::default())
        .init();

    Ok(log_path)
}
