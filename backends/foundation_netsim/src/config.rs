//! Harness configuration.

use core::time::Duration;
use std::net::{IpAddr, Ipv4Addr};

use serde::Deserialize;

use crate::errors::{ConfigError, NetsimResult};

/// Environment variable naming a TOML file to load with [`HarnessConfig::from_env`].
pub const CONFIG_ENV_VAR: &str = "FOUNDATION_NETSIM_CONFIG";

const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;

/// Configuration shared by fake servers and the client override.
///
/// Can be built in code or read from TOML:
///
/// ```toml
/// bind_ip = "127.0.0.1"
/// shutdown_timeout_ms = 2000
/// strict_hosts = true
/// accept_invalid_certs = true
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Loopback address the listener binds to, the port is always OS assigned.
    bind_ip: IpAddr,
    /// Upper bound on how long `stop()` waits for the listener and connections.
    shutdown_timeout_ms: u64,
    /// Answer `421` to requests whose `Host` header is outside the host set.
    strict_hosts: bool,
    /// Disable certificate verification on overridden clients.
    accept_invalid_certs: bool,
}

impl HarnessConfig {
    /// Creates a configuration with default values.
    ///
    /// Defaults:
    /// - `bind_ip`: 127.0.0.1
    /// - `shutdown_timeout_ms`: 5000
    /// - `strict_hosts`: false
    /// - `accept_invalid_certs`: true
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            strict_hosts: false,
            accept_invalid_certs: true,
        }
    }

    #[must_use]
    pub const fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = timeout.as_millis() as u64;
        self
    }

    #[must_use]
    pub const fn strict_hosts(mut self, strict: bool) -> Self {
        self.strict_hosts = strict;
        self
    }

    #[must_use]
    pub const fn accept_invalid_certs(mut self, accept: bool) -> Self {
        self.accept_invalid_certs = accept;
        self
    }

    #[must_use]
    pub const fn get_bind_ip(&self) -> IpAddr {
        self.bind_ip
    }

    #[must_use]
    pub const fn get_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    #[must_use]
    pub const fn get_strict_hosts(&self) -> bool {
        self.strict_hosts
    }

    #[must_use]
    pub const fn get_accept_invalid_certs(&self) -> bool {
        self.accept_invalid_certs
    }
}

// -- Loaders

impl HarnessConfig {
    /// Parses a configuration from TOML, missing keys fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Deserialization`] for malformed TOML or unknown keys.
    pub fn from_toml_str(content: &str) -> NetsimResult<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::from)?;
        Ok(config)
    }

    /// Reads and parses a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read.
    pub fn from_path<V: Into<std::path::PathBuf>>(target: V) -> NetsimResult<Self> {
        let target_path = target.into();
        let content = std::fs::read_to_string(&target_path).map_err(ConfigError::from)?;
        tracing::debug!("Loaded harness config from {}", target_path.display());
        Self::from_toml_str(&content)
    }

    /// Loads the file named by [`CONFIG_ENV_VAR`], or defaults when it is unset.
    ///
    /// # Errors
    ///
    /// Same as [`HarnessConfig::from_path`] when the variable is set.
    pub fn from_env() -> NetsimResult<Self> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::from_path(path),
            None => Ok(Self::new()),
        }
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new()
    }
}
