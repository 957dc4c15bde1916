//! Engine configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via TWINFORGE_CONFIG)
//! 3. Environment variables

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use twinforge_adapter::RetryPolicy;

/// Engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Adapter binding configuration.
    pub adapters: AdapterConfig,
    /// Shadowing runner configuration.
    pub shadowing: ShadowingConfig,
    /// Event bus configuration.
    pub bus: BusConfig,
    /// Lifecycle orchestration configuration.
    pub lifecycle: LifecycleConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("TWINFORGE_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        self.adapters.apply_env_overrides();
        self.shadowing.apply_env_overrides();
        self.bus.apply_env_overrides();
        self.lifecycle.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Adapter binding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Bind timeout in milliseconds; an adapter not BOUND within it is
    /// forced to ERROR.
    pub start_timeout_ms: u64,
    /// Maximum rebind attempts after a post-bind failure.
    pub retry_max_attempts: u32,
    /// Backoff before the first rebind attempt in milliseconds; doubles
    /// per attempt.
    pub retry_backoff_ms: u64,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: 5000,
            retry_max_attempts: 3,
            retry_backoff_ms: 100,
        }
    }
}

impl AdapterConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("TWINFORGE_ADAPTER_START_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.start_timeout_ms = ms;
            }
        }

        if let Ok(max) = std::env::var("TWINFORGE_ADAPTER_RETRY_MAX") {
            if let Ok(n) = max.parse() {
                self.retry_max_attempts = n;
            }
        }

        if let Ok(backoff) = std::env::var("TWINFORGE_ADAPTER_RETRY_BACKOFF_MS") {
            if let Ok(ms) = backoff.parse() {
                self.retry_backoff_ms = ms;
            }
        }
    }

    /// Returns the bind timeout as Duration.
    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    /// Returns the rebind retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            initial_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Shadowing runner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowingConfig {
    /// Retries after a stale-version conflict before the event is dropped.
    pub max_conflict_retries: u32,
    /// Capacity of the per-twin physical event queue.
    pub queue_capacity: usize,
}

impl Default for ShadowingConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            queue_capacity: 256,
        }
    }
}

impl ShadowingConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(retries) = std::env::var("TWINFORGE_SHADOW_MAX_RETRIES") {
            if let Ok(n) = retries.parse() {
                self.max_conflict_retries = n;
            }
        }

        if let Ok(capacity) = std::env::var("TWINFORGE_SHADOW_QUEUE_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.queue_capacity = n;
            }
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Per-subscriber queue capacity.
    pub channel_capacity: usize,
    /// Diagnostic observer queue capacity.
    pub diagnostic_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
            diagnostic_capacity: 256,
        }
    }
}

impl BusConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(capacity) = std::env::var("TWINFORGE_BUS_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.channel_capacity = n;
            }
        }

        if let Ok(capacity) = std::env::var("TWINFORGE_DIAGNOSTIC_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.diagnostic_capacity = n;
            }
        }
    }
}

/// How many physical adapters must reach BOUND for the engine to enter
/// RUNNING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingPolicy {
    /// At least one physical adapter must be bound.
    RequireAny,
    /// Every registered physical adapter must be bound.
    RequireAll,
}

impl BindingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingPolicy::RequireAny => "require_any",
            BindingPolicy::RequireAll => "require_all",
        }
    }
}

/// Lifecycle orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Binding strictness for entering RUNNING.
    pub binding_policy: BindingPolicy,
    /// Grace period in milliseconds for draining in-flight shadowing work
    /// at stop.
    pub stop_grace_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            binding_policy: BindingPolicy::RequireAny,
            stop_grace_ms: 5000,
        }
    }
}

impl LifecycleConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(policy) = std::env::var("TWINFORGE_BINDING_POLICY") {
            self.binding_policy = match policy.to_lowercase().as_str() {
                "require_all" | "all" => BindingPolicy::RequireAll,
                "require_any" | "any" => BindingPolicy::RequireAny,
                _ => self.binding_policy,
            };
        }

        if let Ok(grace) = std::env::var("TWINFORGE_STOP_GRACE_MS") {
            if let Ok(ms) = grace.parse() {
                self.stop_grace_ms = ms;
            }
        }
    }

    /// Returns the stop grace period as Duration.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
