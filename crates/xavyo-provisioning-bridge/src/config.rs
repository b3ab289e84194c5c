//! Bridge configuration management.

use std::env;
use std::time::Duration;

use crate::error::BridgeError;

/// Default capacity of each reply endpoint buffer.
pub const DEFAULT_ENDPOINT_CAPACITY: usize = 64;

/// Default prefix of the report message written when an update in pull fails.
pub const DEFAULT_PULL_FAILURE_PREFIX: &str =
    "Update failed, trying to pull status anyway (if configured)\n";

const REPLY_TIMEOUT_VAR: &str = "PROVISIONING_REPLY_TIMEOUT_MS";
const ENDPOINT_CAPACITY_VAR: &str = "PROVISIONING_ENDPOINT_CAPACITY";
const PULL_FAILURE_PREFIX_VAR: &str = "PROVISIONING_PULL_FAILURE_PREFIX";

/// Provisioning bridge configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How long a call waits for its reply. `None` waits indefinitely.
    pub reply_timeout: Option<Duration>,

    /// Buffer size of each reply endpoint opened on the engine.
    pub endpoint_capacity: usize,

    /// Prefix of the report message written by the pull fallback.
    pub pull_failure_prefix: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            reply_timeout: None,
            endpoint_capacity: DEFAULT_ENDPOINT_CAPACITY,
            pull_failure_prefix: DEFAULT_PULL_FAILURE_PREFIX.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional:
    /// - `PROVISIONING_REPLY_TIMEOUT_MS`: bounded reply wait in milliseconds
    ///   (unset or `0` waits indefinitely)
    /// - `PROVISIONING_ENDPOINT_CAPACITY`: reply endpoint buffer size (default: 64)
    /// - `PROVISIONING_PULL_FAILURE_PREFIX`: report message prefix for failed pull updates
    pub fn from_env() -> Result<Self, BridgeError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BridgeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(raw) = lookup(REPLY_TIMEOUT_VAR) {
            let millis: u64 = raw.trim().parse().map_err(|_| BridgeError::ConfigInvalid {
                var: REPLY_TIMEOUT_VAR.to_string(),
                reason: format!("expected milliseconds, got '{raw}'"),
            })?;
            if millis > 0 {
                builder = builder.reply_timeout(Duration::from_millis(millis));
            }
        }

        if let Some(raw) = lookup(ENDPOINT_CAPACITY_VAR) {
            let capacity: usize = raw.trim().parse().map_err(|_| BridgeError::ConfigInvalid {
                var: ENDPOINT_CAPACITY_VAR.to_string(),
                reason: format!("expected a positive integer, got '{raw}'"),
            })?;
            builder = builder.endpoint_capacity(capacity);
        }

        if let Some(prefix) = lookup(PULL_FAILURE_PREFIX_VAR) {
            builder = builder.pull_failure_prefix(prefix);
        }

        builder.build()
    }

    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> BridgeConfigBuilder {
        BridgeConfigBuilder::new()
    }
}

/// Builder for `BridgeConfig`.
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    reply_timeout: Option<Duration>,
    endpoint_capacity: Option<usize>,
    pull_failure_prefix: Option<String>,
}

impl BridgeConfigBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the reply wait.
    #[must_use]
    pub fn reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    /// Set the reply endpoint buffer size.
    #[must_use]
    pub fn endpoint_capacity(mut self, capacity: usize) -> Self {
        self.endpoint_capacity = Some(capacity);
        self
    }

    /// Set the pull failure message prefix.
    pub fn pull_failure_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.pull_failure_prefix = Some(prefix.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<BridgeConfig, BridgeError> {
        let endpoint_capacity = self.endpoint_capacity.unwrap_or(DEFAULT_ENDPOINT_CAPACITY);
        if endpoint_capacity == 0 {
            return Err(BridgeError::ConfigInvalid {
                var: "endpoint_capacity".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        if self.reply_timeout == Some(Duration::ZERO) {
            return Err(BridgeError::ConfigInvalid {
                var: "reply_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(BridgeConfig {
            reply_timeout: self.reply_timeout,
            endpoint_capacity,
            pull_failure_prefix: self
                .pull_failure_prefix
                .unwrap_or_else(|| DEFAULT_PULL_FAILURE_PREFIX.to_string()),
        })
    }
}
