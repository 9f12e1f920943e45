#![forbid(unsafe_code)]

//! Bridge configuration.
//!
//! Defaults are usable as-is. Every blocking wait in the bridge takes its
//! limit from here so that a dead or hung render surface surfaces as
//! [`BridgeError::Timeout`](crate::BridgeError::Timeout) instead of blocking
//! forever.
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |---|---|
//! | `CHARTBRIDGE_LOAD_TIMEOUT_MS` | [`BridgeConfig::load_timeout`] |
//! | `CHARTBRIDGE_RETURN_TIMEOUT_MS` | [`BridgeConfig::return_timeout`] |
//! | `CHARTBRIDGE_EXIT_TIMEOUT_MS` | [`BridgeConfig::exit_timeout`] |
//! | `CHARTBRIDGE_FLUSH_MODE` | [`BridgeConfig::flush_mode`] (`concatenated` / `per-statement`) |
//! | `CHARTBRIDGE_HOST_BIN` | [`BridgeConfig::host_program`] |
//! | `CHARTBRIDGE_LOG` | [`BridgeConfig::log_filter`] |

use std::path::PathBuf;
use std::time::Duration;

use crate::id::{DEFAULT_ID_LEN, DEFAULT_MAX_ATTEMPTS};

const ENV_LOAD_TIMEOUT: &str = "CHARTBRIDGE_LOAD_TIMEOUT_MS";
const ENV_RETURN_TIMEOUT: &str = "CHARTBRIDGE_RETURN_TIMEOUT_MS";
const ENV_EXIT_TIMEOUT: &str = "CHARTBRIDGE_EXIT_TIMEOUT_MS";
const ENV_FLUSH_MODE: &str = "CHARTBRIDGE_FLUSH_MODE";
const ENV_HOST_BIN: &str = "CHARTBRIDGE_HOST_BIN";
const ENV_LOG: &str = "CHARTBRIDGE_LOG";

/// Readiness check evaluated before the deferred queue is flushed.
pub const DEFAULT_READY_PROBE: &str = "document.readyState == \"complete\"";

/// How the deferred queue is handed to the sink when loading completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// One sink call with all statements joined by `\n`.
    #[default]
    Concatenated,
    /// One sink call per buffered statement, in order.
    PerStatement,
}

impl FlushMode {
    /// Parse the env spelling. Case-insensitive; `-` and `_` are equivalent.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "concatenated" | "joined" | "single" => Some(Self::Concatenated),
            "per-statement" | "statement" | "each" => Some(Self::PerStatement),
            _ => None,
        }
    }
}

/// Tunables shared by the controller, window and transports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Max wait for the host to report the surface loaded.
    pub load_timeout: Duration,
    /// Max wait for a synchronous evaluate reply.
    pub return_timeout: Duration,
    /// Max wait for the host to acknowledge `exit`.
    pub exit_timeout: Duration,
    /// Deferred-queue flush strategy.
    pub flush_mode: FlushMode,
    /// Generated id length.
    pub id_len: usize,
    /// Collision retry cap for id generation.
    pub id_max_attempts: u32,
    /// Script evaluated (and required to return `"true"`) before flushing.
    pub ready_probe: Option<String>,
    /// Host executable for the child-process transport.
    pub host_program: Option<PathBuf>,
    /// `tracing` filter directive.
    pub log_filter: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_secs(30),
            return_timeout: Duration::from_secs(10),
            exit_timeout: Duration::from_secs(5),
            flush_mode: FlushMode::Concatenated,
            id_len: DEFAULT_ID_LEN,
            id_max_attempts: DEFAULT_MAX_ATTEMPTS,
            ready_probe: Some(DEFAULT_READY_PROBE.to_string()),
            host_program: None,
            log_filter: None,
        }
    }
}

impl BridgeConfig {
    /// Defaults with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a custom environment lookup (for tests).
    #[must_use]
    pub fn from_env_with<F>(get_env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(d) = env_millis(&get_env, ENV_LOAD_TIMEOUT) {
            config.load_timeout = d;
        }
        if let Some(d) = env_millis(&get_env, ENV_RETURN_TIMEOUT) {
            config.return_timeout = d;
        }
        if let Some(d) = env_millis(&get_env, ENV_EXIT_TIMEOUT) {
            config.exit_timeout = d;
        }
        if let Some(raw) = get_env(ENV_FLUSH_MODE) {
            match FlushMode::parse(&raw) {
                Some(mode) => config.flush_mode = mode,
                None => tracing::warn!(var = ENV_FLUSH_MODE, value = %raw, "unrecognized flush mode"),
            }
        }
        if let Some(bin) = get_env(ENV_HOST_BIN).filter(|v| !v.trim().is_empty()) {
            config.host_program = Some(PathBuf::from(bin));
        }
        if let Some(filter) = get_env(ENV_LOG).filter(|v| !v.trim().is_empty()) {
            config.log_filter = Some(filter);
        }
        config
    }

    #[must_use]
    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_return_timeout(mut self, timeout: Duration) -> Self {
        self.return_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_exit_timeout(mut self, timeout: Duration) -> Self {
        self.exit_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    #[must_use]
    pub fn with_id_len(mut self, len: usize) -> Self {
        self.id_len = len;
        self
    }

    /// Set (or clear, with `None`) the readiness probe.
    #[must_use]
    pub fn with_ready_probe(mut self, probe: Option<impl Into<String>>) -> Self {
        self.ready_probe = probe.map(Into::into);
        self
    }

    #[must_use]
    pub fn with_host_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.host_program = Some(program.into());
        self
    }
}

fn env_millis<F>(get_env: &F, key: &str) -> Option<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = get_env(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            tracing::warn!(var = key, value = %raw, "ignoring non-numeric timeout");
            None
        }
    }
}
