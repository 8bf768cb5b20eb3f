//! Logging utilities
//!
//! Installs a `tracing` subscriber scoped to this crate.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Log level configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    fn filter(self) -> EnvFilter {
        EnvFilter::new(format!("test_engine={}", self.to_tracing_level()))
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{other}'")),
        }
    }
}

/// Initialize the logger with specified level.
///
/// Panics if a global subscriber is already installed; hosts that may have
/// one should use [`try_init_logger`].
pub fn init_logger(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(level.filter())
        .with_target(false)
        .compact()
        .init();
}

/// Install the logger unless a global subscriber already exists
pub fn try_init_logger(level: LogLevel) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(level.filter())
        .with_target(false)
        .compact()
        .try_init()
        .is_ok()
}
