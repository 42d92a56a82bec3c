//! Server and client configuration

use process_manager::manager::{DEFAULT_CLOSE_GRACE_PERIOD, duration_secs};
use process_manager::{CacheOptions, ManagerOptions};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default bound on a single remote call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_grace_period() -> Duration {
    DEFAULT_CLOSE_GRACE_PERIOD
}

/// Settings of the process service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address of the framed transport; not served when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_addr: Option<String>,
    /// Listen address of the command-document transport; not served when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wire_addr: Option<String>,
    /// Manager id; generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager_id: Option<String>,
    /// Bound on each request, in seconds
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,
    /// Pause between SIGTERM and SIGKILL when the manager closes, in seconds
    #[serde(default = "default_grace_period", with = "duration_secs")]
    pub close_grace_period: Duration,
    /// Logging cache tuning
    #[serde(default)]
    pub cache: CacheOptions,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rpc_addr: Some("127.0.0.1:2285".to_string()),
            wire_addr: Some("127.0.0.1:2286".to_string()),
            manager_id: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            close_grace_period: DEFAULT_CLOSE_GRACE_PERIOD,
            cache: CacheOptions::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a `.yaml`/`.yml` or JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load(path.as_ref()).await?;
        config.validate(path.as_ref())?;
        Ok(config)
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.rpc_addr.is_none() && self.wire_addr.is_none() {
            return Err(Error::config(path, "no listen address configured"));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::config(path, "request timeout must be positive"));
        }
        self.cache
            .validate()
            .map_err(|e| Error::config(path, e.to_string()))?;
        Ok(())
    }

    /// Options for the served manager
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            id: self.manager_id.clone(),
            close_grace_period: self.close_grace_period,
            cache: self.cache,
        }
    }
}

/// Which encoding a client speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Length-prefixed protobuf frames
    #[default]
    Rpc,
    /// Command documents in legacy database messages
    Wire,
}

impl Protocol {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Rpc => "rpc",
            Protocol::Wire => "wire",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = process_manager::Error;

    fn from_str(s: &str) -> process_manager::Result<Self> {
        match s {
            "rpc" => Ok(Protocol::Rpc),
            "wire" => Ok(Protocol::Wire),
            other => Err(process_manager::Error::invalid(format!("unknown protocol '{}'", other))),
        }
    }
}

/// Settings of a remote client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Service address
    pub addr: String,
    /// Encoding to speak
    #[serde(default)]
    pub protocol: Protocol,
    /// Bound on each call, in seconds
    #[serde(default = "default_request_timeout", with = "duration_secs")]
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Settings for `addr` over `protocol` with the default timeout
    pub fn new(addr: impl Into<String>, protocol: Protocol) -> Self {
        Self {
            addr: addr.into(),
            protocol,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Set the per-call timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Load from a `.yaml`/`.yml` or JSON file
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = load(path.as_ref()).await?;
        if config.addr.is_empty() {
            return Err(Error::config(path.as_ref(), "addr must not be empty"));
        }
        if config.request_timeout.is_zero() {
            return Err(Error::config(path.as_ref(), "request timeout must be positive"));
        }
        Ok(config)
    }
}

async fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = async_fs::read_to_string(path).await?;
    match path.extension().and_then(|s| s.to_str()) {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&contents)?),
        _ => Ok(serde_json::from_str(&contents)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[smol_potat::test]
    async fn test_server_config_from_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.yaml");
        std::fs::write(
            &path,
            "rpc_addr: 127.0.0.1:4000\nrequest_timeout: 2.5\ncache:\n  max_size: 10\n",
        )
        .unwrap();

        let config = ServerConfig::from_file(&path).await.unwrap();
        assert_eq!(config.rpc_addr.as_deref(), Some("127.0.0.1:4000"));
        assert_eq!(config.wire_addr, None);
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.close_grace_period, DEFAULT_CLOSE_GRACE_PERIOD);
        assert_eq!(config.manager_options().cache.max_size, 10);
    }

    #[smol_potat::test]
    async fn test_server_config_rejects_nonsense() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(&path, r#"{"rpc_addr": "127.0.0.1:4000", "cache": {"max_size": -1}}"#).unwrap();
        assert!(matches!(ServerConfig::from_file(&path).await, Err(Error::Config { .. })));

        std::fs::write(&path, r#"{"request_timeout": 1}"#).unwrap();
        assert!(matches!(ServerConfig::from_file(&path).await, Err(Error::Config { .. })));
    }

    #[smol_potat::test]
    async fn test_client_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        std::fs::write(&path, r#"{"addr": "127.0.0.1:4000", "protocol": "wire"}"#).unwrap();

        let config = ClientConfig::from_file(&path).await.unwrap();
        assert_eq!(config.protocol, Protocol::Wire);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
        assert_eq!("rpc".parse::<Protocol>().unwrap(), Protocol::Rpc);
        assert!("grpc".parse::<Protocol>().is_err());
    }
}
