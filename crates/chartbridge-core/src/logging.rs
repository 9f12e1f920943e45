#![forbid(unsafe_code)]

//! Logging bootstrap.
//!
//! Library code only emits `tracing` events. Binaries and tests that want
//! them printed call [`init_tracing`] (feature `tracing-json`), which installs
//! a `tracing-subscriber` fmt subscriber with an env filter, optionally in
//! JSON.
//!
//! Output always goes to stderr: the host binary uses stdout as its frame
//! channel.

use crate::config::BridgeConfig;

/// Default filter when neither the config nor `RUST_LOG` provides one.
pub const DEFAULT_FILTER: &str = "info";

/// Subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `chartbridge_runtime=debug`.
    pub filter: Option<String>,
    /// Emit one JSON object per event instead of human-readable lines.
    pub json: bool,
    /// Include the emitting module path.
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: None,
            json: false,
            with_target: true,
        }
    }
}

impl LogConfig {
    /// Take the filter from a bridge config.
    #[must_use]
    pub fn from_bridge(config: &BridgeConfig) -> Self {
        Self {
            filter: config.log_filter.clone(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Filter directive actually used: explicit filter, then `RUST_LOG`,
    /// then [`DEFAULT_FILTER`].
    #[must_use]
    pub fn effective_filter(&self) -> String {
        self.effective_filter_with(|key| std::env::var(key).ok())
    }

    fn effective_filter_with<F>(&self, get_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        self.filter
            .clone()
            .or_else(|| get_env("RUST_LOG"))
            .filter(|f| !f.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_FILTER.to_string())
    }
}

/// Install the global subscriber. Fails if one is already installed or the
/// filter does not parse.
#[cfg(feature = "tracing-json")]
pub fn init_tracing(config: &LogConfig) -> crate::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(config.effective_filter())
        .map_err(|e| crate::BridgeError::InvalidState(format!("log filter: {e}")))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.with_target)
        .with_writer(std::io::stderr);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| crate::BridgeError::InvalidState(format!("log init: {e}")))
}
