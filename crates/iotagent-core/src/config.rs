//! Agent configuration.
//!
//! Loaded from TOML, then optionally overridden from environment variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::{DeviceTypeSchema, TypeCatalog};
use crate::device::ServiceScope;
use crate::error::{Error, Result};

/// Default values.
pub mod defaults {
    pub const BROKER_HOST: &str = "localhost";
    pub const BROKER_PORT: u16 = 1026;
    pub const BROKER_TIMEOUT_MS: u64 = 5000;
    pub const REGISTRATION_DURATION: &str = "P1M";
    pub const SUBSERVICE: &str = "/";
    pub const LOG_LEVEL: &str = "info";
}

/// Environment variable names.
pub mod env_vars {
    pub const CB_HOST: &str = "IOTA_CB_HOST";
    pub const CB_PORT: &str = "IOTA_CB_PORT";
    pub const CB_TIMEOUT_MS: &str = "IOTA_CB_TIMEOUT_MS";
    pub const PROVIDER_URL: &str = "IOTA_PROVIDER_URL";
    pub const SERVICE: &str = "IOTA_SERVICE";
    pub const SUBSERVICE: &str = "IOTA_SUBSERVICE";
    pub const REGISTRY_TYPE: &str = "IOTA_REGISTRY_TYPE";
    pub const REGISTRY_PATH: &str = "IOTA_REGISTRY_PATH";
    pub const LOG_LEVEL: &str = "IOTA_LOG_LEVEL";
}

/// Context broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    /// Upper bound for every broker request.
    #[serde(default = "default_broker_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_broker_host() -> String {
    defaults::BROKER_HOST.to_string()
}

fn default_broker_port() -> u16 {
    defaults::BROKER_PORT
}

fn default_broker_timeout_ms() -> u64 {
    defaults::BROKER_TIMEOUT_MS
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            timeout_ms: default_broker_timeout_ms(),
        }
    }
}

impl BrokerConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which registry backend to build at startup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RegistryBackendKind {
    #[default]
    Memory,
    Redb,
}

impl std::str::FromStr for RegistryBackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(RegistryBackendKind::Memory),
            "redb" => Ok(RegistryBackendKind::Redb),
            other => Err(Error::Config(format!(
                "Unknown registry backend: {} (expected memory or redb)",
                other
            ))),
        }
    }
}

/// Device registry settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RegistryConfig {
    #[serde(default)]
    pub backend: RegistryBackendKind,
    /// Database file, required by the redb backend.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    defaults::LOG_LEVEL.to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Default service for requests that do not carry one.
    #[serde(default)]
    pub service: String,
    /// Default subservice for requests that do not carry one.
    #[serde(default = "default_subservice")]
    pub subservice: String,
    /// URL the broker calls back for lazy attributes and commands.
    #[serde(default)]
    pub provider_url: String,
    /// ISO 8601 duration of provider registrations.
    #[serde(default = "default_registration_duration")]
    pub device_registration_duration: String,
    #[serde(default)]
    pub context_broker: BrokerConfig,
    #[serde(default)]
    pub device_registry: RegistryConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Device type schemas keyed by type name.
    #[serde(default)]
    pub types: BTreeMap<String, DeviceTypeSchema>,
}

fn default_subservice() -> String {
    defaults::SUBSERVICE.to_string()
}

fn default_registration_duration() -> String {
    defaults::REGISTRATION_DURATION.to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            service: String::new(),
            subservice: default_subservice(),
            provider_url: String::new(),
            device_registration_duration: default_registration_duration(),
            context_broker: BrokerConfig::default(),
            device_registry: RegistryConfig::default(),
            log: LogConfig::default(),
            types: BTreeMap::new(),
        }
    }
}

impl AgentConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load a TOML file, apply environment overrides and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        tracing::info!(
            category = "config",
            path = %path.display(),
            types = config.types.len(),
            "Loaded agent configuration"
        );
        Ok(config)
    }

    /// Override settings from `IOTA_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup(env_vars::CB_HOST) {
            self.context_broker.host = host;
        }
        if let Some(port) = lookup(env_vars::CB_PORT) {
            self.context_broker.port = port
                .parse()
                .map_err(|_| Error::Config(format!("Invalid {}: {}", env_vars::CB_PORT, port)))?;
        }
        if let Some(timeout) = lookup(env_vars::CB_TIMEOUT_MS) {
            self.context_broker.timeout_ms = timeout.parse().map_err(|_| {
                Error::Config(format!("Invalid {}: {}", env_vars::CB_TIMEOUT_MS, timeout))
            })?;
        }
        if let Some(url) = lookup(env_vars::PROVIDER_URL) {
            self.provider_url = url;
        }
        if let Some(service) = lookup(env_vars::SERVICE) {
            self.service = service;
        }
        if let Some(subservice) = lookup(env_vars::SUBSERVICE) {
            self.subservice = subservice;
        }
        if let Some(kind) = lookup(env_vars::REGISTRY_TYPE) {
            self.device_registry.backend = kind.parse()?;
        }
        if let Some(path) = lookup(env_vars::REGISTRY_PATH) {
            self.device_registry.path = Some(PathBuf::from(path));
        }
        if let Some(level) = lookup(env_vars::LOG_LEVEL) {
            self.log.level = level;
        }
        Ok(())
    }

    /// Check settings that cannot be defaulted.
    pub fn validate(&self) -> Result<()> {
        if self.provider_url.is_empty() {
            return Err(Error::Config("provider_url must be set".to_string()));
        }
        if self.device_registry.backend == RegistryBackendKind::Redb
            && self.device_registry.path.is_none()
        {
            return Err(Error::Config(
                "device_registry.path is required for the redb backend".to_string(),
            ));
        }
        if self.context_broker.timeout_ms == 0 {
            return Err(Error::Config(
                "context_broker.timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_scope(&self) -> ServiceScope {
        ServiceScope::new(&self.service, &self.subservice)
    }

    pub fn catalog(&self) -> TypeCatalog {
        TypeCatalog::from_types(&self.types)
    }
}
