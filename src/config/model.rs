//! Configuration data model.
//!
//! All structs derive `Serialize`/`Deserialize` for TOML persistence.
//! Every field has a sensible default so the client works out of the box.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::nickname::generate_nickname;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            reconnect: ReconnectConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_servers() -> Vec<ServerConfig> {
    vec![ServerConfig {
        name: "libera".into(),
        channels: vec!["#crabirc".into()],
        ..ServerConfig::new("irc.libera.chat", 6697, true)
    }]
}

/// Configuration for a single IRC server connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// User-facing label (e.g. `"libera"`), also used for log file names.
    pub name: String,
    /// Hostname or IP address of the IRC server.
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub tls: bool,
    #[serde(default = "default_nickname")]
    pub nickname: String,
    /// Ident; defaults to the nickname.
    #[serde(default)]
    pub username: Option<String>,
    /// Real name; defaults to the nickname.
    #[serde(default)]
    pub realname: Option<String>,
    /// Server password, sent as `PASS` before registration.
    #[serde(default)]
    pub password: Option<String>,
    /// User mode sent with `USER`.
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub sasl: Option<SaslConfig>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub auto_connect: bool,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    /// Delay between two outbound lines.
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    /// Extra capabilities to request on top of the built-in ones.
    #[serde(default)]
    pub caps: Vec<String>,
}

impl ServerConfig {
    pub fn new(host: &str, port: u16, tls: bool) -> Self {
        Self {
            name: host.to_string(),
            host: host.to_string(),
            port,
            tls,
            nickname: generate_nickname(),
            username: None,
            realname: None,
            password: None,
            mode: default_mode(),
            sasl: None,
            channels: vec![],
            auto_connect: false,
            accept_invalid_certs: false,
            send_interval_ms: default_send_interval_ms(),
            caps: vec![],
        }
    }

    pub fn username(&self) -> &str {
        self.username.as_deref().unwrap_or(&self.nickname)
    }

    pub fn realname(&self) -> &str {
        self.realname.as_deref().unwrap_or(&self.nickname)
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms.max(1))
    }

    #[cfg(test)]
    pub(crate) fn for_tests() -> Self {
        Self {
            name: "test".into(),
            nickname: "botnick".into(),
            username: Some("bot".into()),
            realname: Some("Test Bot".into()),
            ..Self::new("irc.example.com", 6667, false)
        }
    }
}

/// SASL PLAIN credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaslConfig {
    pub account: String,
    pub password: String,
}

/// Automatic reconnection policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before attempt `attempt` (1-based): doubles each time, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Diagnostics and raw traffic logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default `tracing` filter; `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub traffic_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            traffic_enabled: false,
            log_dir: default_log_dir(),
        }
    }
}

fn default_nickname() -> String {
    generate_nickname()
}
fn default_port() -> u16 {
    6697
}
fn default_true() -> bool {
    true
}
fn default_mode() -> String {
    "8".to_string()
}
fn default_send_interval_ms() -> u64 {
    1500
}
fn default_max_attempts() -> u32 {
    10
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_level() -> String {
    "info".to_string()
}
fn default_log_dir() -> String {
    "~/.local/share/crabirc/logs".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_server_gets_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [[servers]]
            name = "local"
            host = "localhost"
            "#,
        )
        .unwrap();
        let server = &config.servers[0];
        assert_eq!(server.port, 6697);
        assert!(server.tls);
        assert_eq!(server.mode, "8");
        assert_eq!(server.send_interval_ms, 1500);
        assert_eq!(server.nickname.len(), 9);
        assert_eq!(server.username(), server.nickname);
        assert!(server.sasl.is_none());
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_sasl_and_reconnect_sections() {
        let config: AppConfig = toml::from_str(
            r#"
            [reconnect]
            enabled = false

            [[servers]]
            name = "net"
            host = "irc.example.net"
            port = 6667
            tls = false

            [servers.sasl]
            account = "me"
            password = "secret"
            "#,
        )
        .unwrap();
        assert!(!config.reconnect.enabled);
        assert_eq!(config.reconnect.max_attempts, 10);
        let sasl = config.servers[0].sasl.as_ref().unwrap();
        assert_eq!(sasl.account, "me");
        assert_eq!(sasl.password, "secret");
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            ..ReconnectConfig::default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(5000));
    }
}
