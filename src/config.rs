//! Client configuration loading and persistence.
//!
//! Settings live in `config.json` under the platform config directory
//! (`CHATLINE_CONFIG_DIR` overrides it). Every field can also be overridden
//! with a `CHATLINE_*` environment variable, which wins over the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, str::FromStr};

use crate::constants::{
    DEFAULT_RECONNECT_ATTEMPTS, HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT, REQUEST_TIMEOUT,
};
use crate::transport::SessionConfig;

const CONFIG_FILE: &str = "config.json";

/// Where tokens and the customer identity are kept between runs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    /// OS keychain / Secret Service.
    #[default]
    Keyring,
    /// `credentials.json` next to the config file.
    File,
    /// Nothing survives the process.
    Memory,
}

impl FromStr for CredentialBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "keyring" => Ok(Self::Keyring),
            "file" => Ok(Self::File),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown credential backend `{other}`")),
        }
    }
}

/// Configuration for a chat client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// REST base URL, e.g. `https://chat.example.com`.
    pub chat_url: String,
    /// WebSocket URL. Derived from `chat_url` when empty.
    pub socket_url: String,
    /// Brand id.
    pub brand_id: i64,
    /// Channel id.
    pub channel_id: String,
    /// Guarded reconnect attempts after a connection loss.
    pub reconnect_attempts: u32,
    /// Seconds between heartbeats.
    pub heartbeat_interval: u64,
    /// Seconds to wait for any frame after a heartbeat.
    pub heartbeat_timeout: u64,
    /// Seconds a request waits for its answer.
    pub request_timeout: u64,
    /// Credential persistence.
    pub credential_backend: CredentialBackend,
    /// Endpoint receiving error-level log records, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_log_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chat_url: String::new(),
            socket_url: String::new(),
            brand_id: 0,
            channel_id: String::new(),
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            heartbeat_interval: HEARTBEAT_INTERVAL.as_secs(),
            heartbeat_timeout: HEARTBEAT_TIMEOUT.as_secs(),
            request_timeout: REQUEST_TIMEOUT.as_secs(),
            credential_backend: CredentialBackend::default(),
            remote_log_url: None,
        }
    }
}

impl ClientConfig {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `CHATLINE_CONFIG_DIR` wins; otherwise the platform config dir
    /// (macOS: ~/Library/Application Support/chatline).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = match std::env::var("CHATLINE_CONFIG_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::config_dir()
                .context("Could not determine config directory")?
                .join("chatline"),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads `path` without applying overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Applies `CHATLINE_*` overrides looked up through `lookup`.
    /// Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|raw| raw.trim().parse().ok())
        }

        if let Some(url) = lookup("CHATLINE_CHAT_URL") {
            self.chat_url = url;
        }
        if let Some(url) = lookup("CHATLINE_SOCKET_URL") {
            self.socket_url = url;
        }
        if let Some(brand_id) = parsed(&lookup, "CHATLINE_BRAND_ID") {
            self.brand_id = brand_id;
        }
        if let Some(channel_id) = lookup("CHATLINE_CHANNEL_ID") {
            self.channel_id = channel_id;
        }
        if let Some(attempts) = parsed(&lookup, "CHATLINE_RECONNECT_ATTEMPTS") {
            self.reconnect_attempts = attempts;
        }
        if let Some(secs) = parsed(&lookup, "CHATLINE_HEARTBEAT_INTERVAL") {
            self.heartbeat_interval = secs;
        }
        if let Some(secs) = parsed(&lookup, "CHATLINE_HEARTBEAT_TIMEOUT") {
            self.heartbeat_timeout = secs;
        }
        if let Some(secs) = parsed(&lookup, "CHATLINE_REQUEST_TIMEOUT") {
            self.request_timeout = secs;
        }
        if let Some(backend) = parsed(&lookup, "CHATLINE_CREDENTIALS") {
            self.credential_backend = backend;
        }
        if let Some(url) = lookup("CHATLINE_REMOTE_LOG_URL") {
            self.remote_log_url = Some(url).filter(|u| !u.is_empty());
        }
    }

    /// Persists the configuration to the default location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Persists the configuration to `path` with owner-only permissions.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// WebSocket URL, derived from `chat_url` when not set explicitly.
    #[must_use]
    pub fn socket_url(&self) -> String {
        if !self.socket_url.is_empty() {
            return self.socket_url.clone();
        }
        format!(
            "{}/?brandId={}&channelId={}",
            crate::transport::ws::http_to_ws_scheme(self.chat_url.trim_end_matches('/')),
            self.brand_id,
            self.channel_id
        )
    }

    /// Session settings derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            url: self.socket_url(),
            brand_id: self.brand_id,
            channel_id: self.channel_id.clone(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval),
            heartbeat_timeout: Duration::from_secs(self.heartbeat_timeout),
            request_timeout: Duration::from_secs(self.request_timeout),
            reconnect_attempts: self.reconnect_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_overrides_win_and_bad_numbers_are_ignored() {
        let mut config = ClientConfig {
            brand_id: 7,
            ..ClientConfig::default()
        };
        config.apply_overrides(lookup(&[
            ("CHATLINE_CHAT_URL", "https://chat.example.com"),
            ("CHATLINE_CHANNEL_ID", "chat_abc"),
            ("CHATLINE_BRAND_ID", "not-a-number"),
            ("CHATLINE_RECONNECT_ATTEMPTS", "5"),
            ("CHATLINE_CREDENTIALS", "FILE"),
        ]));

        assert_eq!(config.chat_url, "https://chat.example.com");
        assert_eq!(config.channel_id, "chat_abc");
        assert_eq!(config.brand_id, 7);
        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.credential_backend, CredentialBackend::File);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let config = ClientConfig {
            chat_url: "https://chat.example.com".to_string(),
            brand_id: 1086,
            channel_id: "chat_51eafa".to_string(),
            remote_log_url: Some("https://logs.example.com".to_string()),
            ..ClientConfig::default()
        };

        config.save_to(&path).unwrap();
        assert_eq!(ClientConfig::load_from(&path).unwrap(), config);

        #[cfg(unix)]
        {
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"brand_id": 3, "channel_id": "c"}"#).unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.brand_id, 3);
        assert_eq!(config.reconnect_attempts, DEFAULT_RECONNECT_ATTEMPTS);
        assert_eq!(config.credential_backend, CredentialBackend::Keyring);
    }

    #[test]
    fn test_socket_url_derived_from_chat_url() {
        let config = ClientConfig {
            chat_url: "https://chat.example.com/".to_string(),
            brand_id: 1,
            channel_id: "chat_1".to_string(),
            ..ClientConfig::default()
        };
        assert_eq!(
            config.socket_url(),
            "wss://chat.example.com/?brandId=1&channelId=chat_1"
        );
        assert_eq!(config.session_config().url, config.socket_url());
    }
}
