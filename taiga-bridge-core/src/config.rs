//! Runtime configuration for the bridge.
//!
//! Tunables come from `TAIGA_BRIDGE_*` environment variables. Unparsable
//! values are logged and replaced by the default rather than aborting
//! startup; cross-field invariants are enforced by [`BridgeConfig::validate`].

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Host accepted by the streaming mounts when `ALLOWED_HOST` is unset.
pub const DEFAULT_ALLOWED_HOST: &str = "projects.alphaomegateam.co";

/// Errors raised while loading startup configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required environment variable is absent or empty.
    #[error("Environment variable {name} must be configured")]
    MissingVar {
        /// Variable name
        name: &'static str,
    },

    /// A variable is present but unusable.
    #[error("Environment variable {name} is invalid: {reason}")]
    InvalidVar {
        /// Variable name
        name: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// Values are individually valid but inconsistent.
    #[error("Invalid configuration: {0}")]
    Inconsistent(String),
}

/// Bridge-wide settings shared by the transports and the action gateway.
#[derive(Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Shared secret for `/actions/*`; `None` means the proxy is disabled (503).
    pub action_api_key: Option<String>,

    /// Extra host accepted by the streaming mounts besides loopback names.
    pub allowed_host: String,

    /// Streaming sessions idle for longer than this are reclaimed.
    pub session_idle_timeout: Duration,

    /// How often the idle reaper runs.
    pub session_reap_interval: Duration,

    /// Retention of idempotency records.
    pub idempotency_ttl: Duration,

    /// Bound on waiting for an in-flight create with the same key.
    pub idempotency_wait: Duration,

    /// Page size used when only `page` is supplied.
    pub default_page_size: u32,

    /// Server-enforced page size ceiling.
    pub max_page_size: u32,

    /// Request body limit in bytes.
    pub max_body_bytes: usize,
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field(
                "action_api_key",
                &self.action_api_key.as_ref().map(|_| "<redacted>"),
            )
            .field("allowed_host", &self.allowed_host)
            .field("session_idle_timeout", &self.session_idle_timeout)
            .field("session_reap_interval", &self.session_reap_interval)
            .field("idempotency_ttl", &self.idempotency_ttl)
            .field("idempotency_wait", &self.idempotency_wait)
            .field("default_page_size", &self.default_page_size)
            .field("max_page_size", &self.max_page_size)
            .field("max_body_bytes", &self.max_body_bytes)
            .finish()
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            action_api_key: None,
            allowed_host: DEFAULT_ALLOWED_HOST.to_string(),
            session_idle_timeout: Duration::from_secs(1800), // 30 minutes
            session_reap_interval: Duration::from_secs(60),
            idempotency_ttl: Duration::from_secs(86400), // 24 hours
            idempotency_wait: Duration::from_secs(10),
            default_page_size: 20,
            max_page_size: 100,
            max_body_bytes: 1024 * 1024,
        }
    }
}

impl BridgeConfig {
    /// Load settings from environment variables.
    ///
    /// # Environment Variables
    /// - `ACTION_PROXY_API_KEY`
    /// - `ALLOWED_HOST`
    /// - `TAIGA_BRIDGE_SESSION_IDLE_SECS`
    /// - `TAIGA_BRIDGE_SESSION_REAP_INTERVAL_SECS`
    /// - `TAIGA_BRIDGE_IDEMPOTENCY_TTL_SECS`
    /// - `TAIGA_BRIDGE_IDEMPOTENCY_WAIT_SECS`
    /// - `TAIGA_BRIDGE_DEFAULT_PAGE_SIZE`
    /// - `TAIGA_BRIDGE_MAX_PAGE_SIZE`
    /// - `TAIGA_BRIDGE_MAX_BODY_BYTES`
    pub fn from_env() -> Self {
        let default = Self::default();

        let action_api_key = std::env::var("ACTION_PROXY_API_KEY")
            .ok()
            .filter(|key| !key.is_empty());

        let allowed_host = std::env::var("ALLOWED_HOST")
            .ok()
            .map(|host| host.trim().to_string())
            .filter(|host| !host.is_empty())
            .unwrap_or(default.allowed_host);

        Self {
            action_api_key,
            allowed_host,
            session_idle_timeout: Duration::from_secs(parse_env_warn(
                "TAIGA_BRIDGE_SESSION_IDLE_SECS",
                default.session_idle_timeout.as_secs(),
            )),
            session_reap_interval: Duration::from_secs(parse_env_warn(
                "TAIGA_BRIDGE_SESSION_REAP_INTERVAL_SECS",
                default.session_reap_interval.as_secs(),
            )),
            idempotency_ttl: Duration::from_secs(parse_env_warn(
                "TAIGA_BRIDGE_IDEMPOTENCY_TTL_SECS",
                default.idempotency_ttl.as_secs(),
            )),
            idempotency_wait: Duration::from_secs(parse_env_warn(
                "TAIGA_BRIDGE_IDEMPOTENCY_WAIT_SECS",
                default.idempotency_wait.as_secs(),
            )),
            default_page_size: parse_env_warn(
                "TAIGA_BRIDGE_DEFAULT_PAGE_SIZE",
                default.default_page_size,
            ),
            max_page_size: parse_env_warn("TAIGA_BRIDGE_MAX_PAGE_SIZE", default.max_page_size),
            max_body_bytes: parse_env_warn("TAIGA_BRIDGE_MAX_BODY_BYTES", default.max_body_bytes),
        }
    }

    /// Check cross-field invariants.
    ///
    /// # Invariants
    /// 1. `0 < default_page_size <= max_page_size`
    /// 2. `idempotency_wait < idempotency_ttl`
    /// 3. `session_idle_timeout` and `session_reap_interval` are non-zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::Inconsistent(format!(
                "default_page_size ({}) must be between 1 and max_page_size ({})",
                self.default_page_size, self.max_page_size
            )));
        }

        if self.idempotency_wait >= self.idempotency_ttl {
            return Err(ConfigError::Inconsistent(format!(
                "idempotency_wait ({:?}) must be less than idempotency_ttl ({:?})",
                self.idempotency_wait, self.idempotency_ttl
            )));
        }

        if self.session_idle_timeout.is_zero() || self.session_reap_interval.is_zero() {
            return Err(ConfigError::Inconsistent(
                "session_idle_timeout and session_reap_interval must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse an environment variable with a warning on invalid values.
pub(crate) fn parse_env_warn<T: std::str::FromStr + std::fmt::Display>(
    name: &str,
    default: T,
) -> T {
    match std::env::var(name) {
        Ok(val) => match val.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    env_var = name,
                    value = %val,
                    default = %default,
                    "Invalid value for environment variable, using default"
                );
                default
            }
        },
        Err(_) => default,
    }
}

/// Read a required, non-empty environment variable.
pub(crate) fn require_env(name: &'static str) -> Result<String, ConfigError> {
    match std::env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar { name }),
    }
}


#[cfg(test)]
mod tests {
    use super::test_env::EnvVarGuard;
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "ACTION_PROXY_API_KEY",
        "ALLOWED_HOST",
        "TAIGA_BRIDGE_SESSION_IDLE_SECS",
        "TAIGA_BRIDGE_MAX_PAGE_SIZE",
        "TAIGA_BRIDGE_DEFAULT_PAGE_SIZE",
    ];

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::default();
        assert_eq!(config.allowed_host, DEFAULT_ALLOWED_HOST);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
        assert_eq!(config.idempotency_ttl, Duration::from_secs(86400));
        assert_eq!(config.idempotency_wait, Duration::from_secs(10));
        assert_eq!(config.default_page_size, 20);
        assert_eq!(config.max_page_size, 100);
        assert!(config.action_api_key.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_default_above_max() {
        let config = BridgeConfig {
            default_page_size: 200,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Inconsistent(_))
        ));
    }

    #[test]
    fn test_validate_rejects_wait_longer_than_ttl() {
        let config = BridgeConfig {
            idempotency_wait: Duration::from_secs(100),
            idempotency_ttl: Duration::from_secs(50),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = BridgeConfig {
            action_api_key: Some("hunter2".into()),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_values() {
        let env = EnvVarGuard::new(VARS);
        env.set("ACTION_PROXY_API_KEY", "secret");
        env.set("ALLOWED_HOST", "taiga.example.com");
        env.set("TAIGA_BRIDGE_SESSION_IDLE_SECS", "60");
        env.set("TAIGA_BRIDGE_MAX_PAGE_SIZE", "50");

        let config = BridgeConfig::from_env();
        assert_eq!(config.action_api_key.as_deref(), Some("secret"));
        assert_eq!(config.allowed_host, "taiga.example.com");
        assert_eq!(config.session_idle_timeout, Duration::from_secs(60));
        assert_eq!(config.max_page_size, 50);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_value_falls_back() {
        let env = EnvVarGuard::new(VARS);
        env.set("TAIGA_BRIDGE_DEFAULT_PAGE_SIZE", "twenty");
        env.remove("ACTION_PROXY_API_KEY");

        let config = BridgeConfig::from_env();
        assert_eq!(config.default_page_size, 20);
        assert!(config.action_api_key.is_none());
    }

    #[test]
    #[serial]
    fn test_empty_api_key_is_unset() {
        let env = EnvVarGuard::new(VARS);
        env.set("ACTION_PROXY_API_KEY", "");
        let config = BridgeConfig::from_env();
        assert!(config.action_api_key.is_none());
    }
}
