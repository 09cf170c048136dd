//! Process-wide configuration for the primitives.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: a config passed to [`SyncConfig::install`]
//! 2. **Environment variables**: values from `DUALSYNC_*` env vars
//! 3. **Defaults**: built-in defaults from [`SyncConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `DUALSYNC_MAX_RECURSION_DEPTH` | `usize` | `max_recursion_depth` |
//! | `DUALSYNC_MONITOR_SHARDS` | `usize` | `monitor_shards` |
//! | `DUALSYNC_TIMER_THREAD_NAME` | `String` | `timer_thread_name` |
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `max_recursion_depth` | 1 048 576 |
//! | `monitor_shards` | 16 |
//! | `timer_thread_name` | `"dualsync-timer"` |

use std::sync::OnceLock;

use crate::tracing_compat::warn;

/// Environment variable name for the reentrancy ceiling.
pub const ENV_MAX_RECURSION_DEPTH: &str = "DUALSYNC_MAX_RECURSION_DEPTH";
/// Environment variable name for the monitor registry shard count.
pub const ENV_MONITOR_SHARDS: &str = "DUALSYNC_MONITOR_SHARDS";
/// Environment variable name for the timer thread name.
pub const ENV_TIMER_THREAD_NAME: &str = "DUALSYNC_TIMER_THREAD_NAME";

const DEFAULT_MAX_RECURSION_DEPTH: usize = 1 << 20;
const DEFAULT_MONITOR_SHARDS: usize = 16;
const DEFAULT_TIMER_THREAD_NAME: &str = "dualsync-timer";

static GLOBAL: OnceLock<SyncConfig> = OnceLock::new();

/// Error raised while building a [`SyncConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("invalid value for {var}: {reason}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// What was wrong with it.
        reason: String,
    },
    /// A field value is outside its accepted range.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
    /// The global configuration was already initialised.
    #[error("global configuration already initialised")]
    AlreadyInitialized,
}

/// Tunables shared by every primitive in the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Maximum depth a flow may enter a reentrant lock.
    pub max_recursion_depth: usize,
    /// Number of independently locked shards in the monitor registry.
    pub monitor_shards: usize,
    /// Name given to the timer thread.
    pub timer_thread_name: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            monitor_shards: DEFAULT_MONITOR_SHARDS,
            timer_thread_name: DEFAULT_TIMER_THREAD_NAME.to_string(),
        }
    }
}

impl SyncConfig {
    /// Builds a config from defaults overridden by the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `DUALSYNC_*` environment variable overrides in place.
    ///
    /// Only variables that are set are applied.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = read_env(ENV_MAX_RECURSION_DEPTH) {
            self.max_recursion_depth = parse_usize(ENV_MAX_RECURSION_DEPTH, &val)?;
        }
        if let Some(val) = read_env(ENV_MONITOR_SHARDS) {
            self.monitor_shards = parse_usize(ENV_MONITOR_SHARDS, &val)?;
        }
        if let Some(val) = read_env(ENV_TIMER_THREAD_NAME) {
            self.timer_thread_name = val;
        }
        Ok(())
    }

    /// Checks field ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_recursion_depth == 0 {
            return Err(ConfigError::Invalid("max_recursion_depth must be > 0"));
        }
        if self.monitor_shards == 0 {
            return Err(ConfigError::Invalid("monitor_shards must be > 0"));
        }
        if self.timer_thread_name.is_empty() {
            return Err(ConfigError::Invalid("timer_thread_name must not be empty"));
        }
        Ok(())
    }

    /// Normalizes values to what the implementation uses.
    ///
    /// The shard count is rounded up to a power of two.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.monitor_shards = self.monitor_shards.max(1).next_power_of_two();
        self
    }

    /// Installs this config as the process-wide configuration.
    ///
    /// Must run before the first primitive reads [`SyncConfig::global`].
    pub fn install(self) -> Result<(), ConfigError> {
        self.validate()?;
        GLOBAL
            .set(self.normalized())
            .map_err(|_| ConfigError::AlreadyInitialized)
    }

    /// Returns the process-wide configuration.
    ///
    /// Initialised on first use from the environment; an invalid environment
    /// is logged and replaced by the defaults.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| {
            Self::from_env()
                .unwrap_or_else(|err| {
                    warn!(error = %err, "ignoring invalid dualsync environment configuration");
                    Self::default()
                })
                .normalized()
        })
    }
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidEnv {
            var,
            reason: format!("expected unsigned integer, got {val:?} ({e})"),
        })
}
