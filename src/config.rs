use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Mode flag that puts the bot into quiet hours.
pub const MODE_DND: &str = "dnd";

/// Mode flag raised while the host is showing an alert.
pub const MODE_ALERT: &str = "alert";

/// Mode flag enabled when the lighting integration is active.
pub const MODE_LOGILED: &str = "logiled";

/// Configuration shared between the bot, the session and command actions.
pub type SharedConfig = Arc<RwLock<Config>>;

/// Bot configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Gateway transport configuration
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Bot identity and access control
    #[serde(default)]
    pub bot: BotConfig,

    /// Host state the bot reacts to
    #[serde(default)]
    pub host: HostConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default = "default_broker")]
    pub broker: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BotConfig {
    /// Credential presented to the gateway on login
    #[serde(default)]
    pub token: String,
    /// Channel that receives the greeting and farewell messages
    #[serde(default = "default_notification_channel")]
    pub notification_channel: String,
    /// Users exempt from quiet hours and admin-only restrictions
    #[serde(default)]
    pub privileged_users: BTreeSet<String>,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: char,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    #[serde(default)]
    pub modes: BTreeSet<String>,
    #[serde(default)]
    pub lighting_color: String,
}

fn default_broker() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    1883
}

fn default_keep_alive() -> u64 {
    30
}

fn default_topic_prefix() -> String {
    "gatebot".to_string()
}

fn default_client_id() -> String {
    "gatebot".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_notification_channel() -> String {
    "general".to_string()
}

fn default_command_prefix() -> char {
    '!'
}

fn default_ready_timeout() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            broker: default_broker(),
            port: default_port(),
            keep_alive_secs: default_keep_alive(),
            topic_prefix: default_topic_prefix(),
            client_id: default_client_id(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            notification_channel: default_notification_channel(),
            privileged_users: BTreeSet::new(),
            command_prefix: default_command_prefix(),
            ready_timeout_secs: default_ready_timeout(),
        }
    }
}

impl HostConfig {
    pub fn has_mode(&self, mode: &str) -> bool {
        self.modes.contains(mode)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(
            broker = %config.gateway.broker,
            channel = %config.bot.notification_channel,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            info!(path = %path.as_ref().display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Persist configuration as TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(RwLock::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.broker, "localhost");
        assert_eq!(config.gateway.port, 1883);
        assert_eq!(config.bot.notification_channel, "general");
        assert_eq!(config.bot.command_prefix, '!');
        assert!(config.bot.privileged_users.is_empty());
        assert!(config.host.modes.is_empty());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let toml = r#"
            [bot]
            token = "secret"
            privileged_users = ["alice"]

            [host]
            modes = ["dnd"]
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.bot.token, "secret");
        assert!(config.bot.privileged_users.contains("alice"));
        assert_eq!(config.bot.notification_channel, "general");
        assert_eq!(config.gateway.topic_prefix, "gatebot");
        assert!(config.host.has_mode(MODE_DND));
        assert!(!config.host.has_mode(MODE_ALERT));
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = NamedTempFile::new().unwrap();
        let mut config = Config::default();
        config.bot.token = "abc".to_string();
        config.bot.notification_channel = "bots".to_string();
        config.host.modes.insert(MODE_LOGILED.to_string());

        config.save(tmp.path()).unwrap();
        let loaded = Config::from_file(tmp.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_file_is_error() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[bot\ntoken = ").unwrap();
        assert!(Config::from_file(tmp.path()).is_err());
    }
}
