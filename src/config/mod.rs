//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files (default: `<config dir>/cms-gateway/config.toml`)
//! - Environment variables (`CMS_GATEWAY_*`)
//! - CLI arguments (for the `cms-gateway` binary)
//!
//! ```toml
//! [credentials]
//! api_key = "..."
//! project_id = "..."
//!
//! [command_channel]
//! endpoint = "wss://gateway.example.com/cmd/websocket"
//! heartbeat_ms = 40000
//!
//! [upload_channel]
//! endpoint = "https://gateway.example.com/upload"
//! timeout_secs = 60
//!
//! [reconnect]
//! max_delay_ms = 60000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::client::{DEFAULT_COMMAND_CHANNEL_ENDPOINT, DEFAULT_UPLOAD_CHANNEL_ENDPOINT};
use crate::error::{GatewayError, Result};
use crate::protocol::ReconnectPolicy;
use crate::transport::DEFAULT_HEARTBEAT_INTERVAL;

/// Main configuration struct
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway credentials
    #[serde(default)]
    pub credentials: CredentialsConfig,

    /// Command channel (WebSocket) settings
    #[serde(default)]
    pub command_channel: CommandChannelConfig,

    /// Upload channel (HTTP) settings
    #[serde(default)]
    pub upload_channel: UploadChannelConfig,

    /// Reconnect backoff settings
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl GatewayConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        toml::from_str(&content)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration from a variable lookup (`CMS_GATEWAY_*` names).
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(api_key) = lookup("CMS_GATEWAY_API_KEY") {
            config.credentials.api_key = Some(api_key);
        }
        if let Some(project_id) = lookup("CMS_GATEWAY_PROJECT_ID") {
            config.credentials.project_id = Some(project_id);
        }
        if let Some(endpoint) = lookup("CMS_GATEWAY_COMMAND_ENDPOINT") {
            config.command_channel.endpoint = endpoint;
        }
        if let Some(endpoint) = lookup("CMS_GATEWAY_UPLOAD_ENDPOINT") {
            config.upload_channel.endpoint = endpoint;
        }
        if let Some(heartbeat) = lookup("CMS_GATEWAY_HEARTBEAT_MS") {
            if let Ok(heartbeat) = heartbeat.parse() {
                config.command_channel.heartbeat_ms = heartbeat;
            }
        }

        config
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("cms-gateway").join("config.toml"))
    }

    /// Load `path` (or the default file, if it exists) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(path)?,
                None => Self::default(),
            },
        };

        Ok(file.merge(Self::from_env()))
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(self, other: Self) -> Self {
        let command_defaults = CommandChannelConfig::default();
        let upload_defaults = UploadChannelConfig::default();

        Self {
            credentials: CredentialsConfig {
                api_key: other.credentials.api_key.or(self.credentials.api_key),
                project_id: other.credentials.project_id.or(self.credentials.project_id),
            },
            command_channel: CommandChannelConfig {
                endpoint: if other.command_channel.endpoint != command_defaults.endpoint {
                    other.command_channel.endpoint
                } else {
                    self.command_channel.endpoint
                },
                heartbeat_ms: if other.command_channel.heartbeat_ms != command_defaults.heartbeat_ms {
                    other.command_channel.heartbeat_ms
                } else {
                    self.command_channel.heartbeat_ms
                },
            },
            upload_channel: UploadChannelConfig {
                endpoint: if other.upload_channel.endpoint != upload_defaults.endpoint {
                    other.upload_channel.endpoint
                } else {
                    self.upload_channel.endpoint
                },
                timeout_secs: if other.upload_channel.timeout_secs != upload_defaults.timeout_secs {
                    other.upload_channel.timeout_secs
                } else {
                    self.upload_channel.timeout_secs
                },
            },
            reconnect: ReconnectConfig {
                max_delay_ms: other.reconnect.max_delay_ms.or(self.reconnect.max_delay_ms),
            },
        }
    }
}

/// Gateway credentials
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// API key, sent as the `key` query parameter
    pub api_key: Option<String>,

    /// Project ID, sent as the `projectId` query parameter
    pub project_id: Option<String>,
}

/// Command channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandChannelConfig {
    /// WebSocket endpoint
    pub endpoint: String,

    /// Heartbeat interval in milliseconds (0 disables)
    pub heartbeat_ms: u64,
}

impl Default for CommandChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_COMMAND_CHANNEL_ENDPOINT.to_string(),
            heartbeat_ms: DEFAULT_HEARTBEAT_INTERVAL.as_millis() as u64,
        }
    }
}

impl CommandChannelConfig {
    /// Heartbeat interval as a duration
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

/// Upload channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadChannelConfig {
    /// HTTP upload endpoint
    pub endpoint: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for UploadChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_UPLOAD_CHANNEL_ENDPOINT.to_string(),
            timeout_secs: 60,
        }
    }
}

impl UploadChannelConfig {
    /// Request timeout as a duration
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Reconnect configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Backoff ceiling in milliseconds (unset: uncapped)
    pub max_delay_ms: Option<u64>,
}

impl ReconnectConfig {
    /// Build the reconnect policy
    pub fn policy(&self) -> ReconnectPolicy {
        match self.max_delay_ms {
            Some(ms) => ReconnectPolicy::new().with_max_delay(Duration::from_millis(ms)),
            None => ReconnectPolicy::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config() {
        let config = GatewayConfig::default();
        assert_eq!(config.command_channel.endpoint, "ws://localhost/cmd/websocket");
        assert_eq!(config.command_channel.heartbeat_ms, 40_000);
        assert_eq!(config.upload_channel.endpoint, "http://localhost/upload");
        assert_eq!(config.upload_channel.timeout(), Duration::from_secs(60));
        assert!(config.credentials.api_key.is_none());
        assert!(config.reconnect.max_delay_ms.is_none());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [credentials]
            api_key = "secret"
            project_id = "proj-1"

            [command_channel]
            endpoint = "wss://gateway.example.com/cmd/websocket"

            [reconnect]
            max_delay_ms = 30000
        "#;

        let config: GatewayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.credentials.api_key.as_deref(), Some("secret"));
        assert_eq!(config.credentials.project_id.as_deref(), Some("proj-1"));
        assert_eq!(config.command_channel.endpoint, "wss://gateway.example.com/cmd/websocket");
        // Omitted keys keep their defaults
        assert_eq!(config.command_channel.heartbeat_ms, 40_000);
        assert_eq!(config.upload_channel.endpoint, "http://localhost/upload");
        assert_eq!(config.reconnect.max_delay_ms, Some(30_000));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[upload_channel]\ntimeout_secs = 5").unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.upload_channel.timeout_secs, 5);
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = GatewayConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, GatewayError::Config(_)));

        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[credentials\napi_key = 1").unwrap();
        let broken = GatewayConfig::from_file(&path).unwrap_err();
        assert!(broken.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_from_vars() {
        let vars: HashMap<&str, &str> = [
            ("CMS_GATEWAY_API_KEY", "k"),
            ("CMS_GATEWAY_PROJECT_ID", "p"),
            ("CMS_GATEWAY_UPLOAD_ENDPOINT", "https://up.example.com/upload"),
            ("CMS_GATEWAY_HEARTBEAT_MS", "not a number"),
        ]
        .into_iter()
        .collect();

        let config = GatewayConfig::from_vars(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.credentials.api_key.as_deref(), Some("k"));
        assert_eq!(config.credentials.project_id.as_deref(), Some("p"));
        assert_eq!(config.upload_channel.endpoint, "https://up.example.com/upload");
        assert_eq!(config.command_channel.heartbeat_ms, 40_000);
    }

    #[test]
    fn test_merge_prefers_other() {
        let file: GatewayConfig = toml::from_str(
            r#"
            [credentials]
            api_key = "from-file"
            project_id = "p"

            [command_channel]
            endpoint = "wss://file.example.com/cmd/websocket"
            "#,
        )
        .unwrap();
        let env = GatewayConfig::from_vars(|name| {
            (name == "CMS_GATEWAY_API_KEY").then(|| "from-env".to_string())
        });

        let merged = file.merge(env);
        assert_eq!(merged.credentials.api_key.as_deref(), Some("from-env"));
        assert_eq!(merged.credentials.project_id.as_deref(), Some("p"));
        assert_eq!(merged.command_channel.endpoint, "wss://file.example.com/cmd/websocket");
    }

    #[test]
    fn test_reconnect_policy_from_config() {
        let config = ReconnectConfig {
            max_delay_ms: Some(2000),
        };
        let mut policy = config.policy();
        assert!(policy.should_retry());
        assert!(policy.reset().current_delay().is_zero());
    }
}
