// Client configuration file.
//
// Location: `~/.murmur/client.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::ReconnectPolicy;
use crate::reducers::{DeletionScope, UnreadKeying};

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080/ws";

/// Root directory for murmur client state: `~/.murmur/`.
pub fn client_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".murmur"))
}

/// Path to the client config file: `~/.murmur/client.toml`.
pub fn client_config_path() -> Option<PathBuf> {
    client_dir().map(|dir| dir.join("client.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket endpoint; `userId` is appended per session.
    pub server_url: String,
    pub reconnect: ReconnectConfig,
    pub unread_keying: UnreadKeying,
    pub deletion_scope: DeletionScope,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reconnect: ReconnectConfig::default(),
            unread_keying: UnreadKeying::default(),
            deletion_scope: DeletionScope::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { max_attempts: 5, delay_ms: 1_000 }
    }
}

impl From<ReconnectConfig> for ReconnectPolicy {
    fn from(config: ReconnectConfig) -> Self {
        Self { delay: Duration::from_millis(config.delay_ms), max_attempts: config.max_attempts }
    }
}

impl ClientConfig {
    /// Load from `~/.murmur/client.toml`, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        match client_config_path() {
            Some(path) => Self::load_or_default(&path),
            None => Ok(Self::default()),
        }
    }

    /// Load from `path`; a missing file yields defaults, anything else that
    /// goes wrong is an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::load_from(path) {
            Err(ConfigError::Io(error)) if error.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        self.reconnect.into()
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_reference_reconnection() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.server_url, "ws://127.0.0.1:8080/ws");
        assert_eq!(cfg.reconnect_policy(), ReconnectPolicy::default());
        assert_eq!(cfg.unread_keying, UnreadKeying::OtherParty);
        assert_eq!(cfg.deletion_scope, DeletionScope::AnyConversation);
    }

    #[test]
    fn parse_from_toml() {
        let toml_str = r#"
server_url = "wss://chat.example.com/ws"
unread_keying = "sender"
deletion_scope = "selected_conversation"

[reconnect]
max_attempts = 10
delay_ms = 250
"#;
        let cfg: ClientConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.server_url, "wss://chat.example.com/ws");
        assert_eq!(cfg.unread_keying, UnreadKeying::Sender);
        assert_eq!(cfg.deletion_scope, DeletionScope::SelectedConversation);
        assert_eq!(
            cfg.reconnect_policy(),
            ReconnectPolicy { delay: Duration::from_millis(250), max_attempts: 10 }
        );
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let cfg: ClientConfig = toml::from_str("[reconnect]\ndelay_ms = 50\n").unwrap();
        assert_eq!(cfg.reconnect.delay_ms, 50);
        assert_eq!(cfg.reconnect.max_attempts, 5);
        assert_eq!(cfg.server_url, DEFAULT_SERVER_URL);
    }

    #[test]
    fn unknown_reconnect_field_is_rejected() {
        let error = toml::from_str::<ClientConfig>("[reconnect]\nbackoff = \"exp\"\n")
            .expect_err("parse should fail");
        assert!(error.to_string().contains("unknown field `backoff`"));
    }

    #[test]
    fn roundtrip_through_nested_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deep").join("client.toml");
        let cfg = ClientConfig {
            server_url: "wss://chat.example.com/ws".into(),
            reconnect: ReconnectConfig { max_attempts: 3, delay_ms: 200 },
            unread_keying: UnreadKeying::Sender,
            deletion_scope: DeletionScope::SelectedConversation,
        };

        cfg.save_to(&path).unwrap();

        assert_eq!(ClientConfig::load_from(&path).unwrap(), cfg);
    }

    #[test]
    fn missing_file_yields_defaults_but_garbage_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        assert_eq!(ClientConfig::load_or_default(&missing).unwrap(), ClientConfig::default());

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "server_url = [").unwrap();
        assert!(matches!(ClientConfig::load_or_default(&broken), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn client_dir_is_under_home() {
        let dir = client_dir().expect("home directory");
        assert!(dir.ends_with(".murmur"));
    }
}
