//! Application configuration loaded from a TOML file.
//!
//! The configuration is split into focused sections: the protocol server
//! itself, the filesystem paths it reads and writes, the session tokens it
//! accepts, and logging. A missing file is created with defaults so the
//! binary runs out of the box.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Protocol server settings
    pub server: ServerSettings,
    /// Filesystem paths
    pub paths: PathSettings,
    /// Accepted session tokens and the identities they resolve to
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Settings for the session protocol listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Address to bind the TCP listener to
    pub bind_address: String,
    /// Origin id stamped into every outbound envelope
    #[serde(default = "default_server_id")]
    pub server_id: u32,
    /// Technical name of the storyline driving chapter advancement
    #[serde(default = "default_storyline")]
    pub storyline: String,
    /// Socket receive timeout in seconds
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_secs: u64,
    /// KeepAlive loop interval in milliseconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_ms: u64,
    /// Pause before StartMissionForClients in milliseconds
    #[serde(default = "default_mission_start_delay")]
    pub mission_start_delay_ms: u64,
    /// Address text served to HTTP probes; empty answers a plain OK
    #[serde(default)]
    pub probe_reply_address: Option<String>,
    /// Whether AI-controlled teams act
    #[serde(default = "default_ai_enabled")]
    pub ai_enabled: bool,
    /// Karma granted to a freshly committed career
    #[serde(default = "default_starting_karma")]
    pub starting_karma: i32,
    /// Nuyen granted to a freshly committed career
    #[serde(default = "default_starting_nuyen")]
    pub starting_nuyen: i32,
}

pub fn default_server_id() -> u32 {
    1
}

pub fn default_storyline() -> String {
    "Main Campaign".to_string()
}

pub fn default_receive_timeout() -> u64 {
    60
}

pub fn default_keepalive_interval() -> u64 {
    2000
}

pub fn default_mission_start_delay() -> u64 {
    6000
}

pub fn default_ai_enabled() -> bool {
    true
}

pub fn default_starting_karma() -> i32 {
    5
}

pub fn default_starting_nuyen() -> i32 {
    2000
}

/// Filesystem locations the server reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Directory where per-identity career files are persisted
    pub data_dir: String,
    /// Directory holding the extracted static game data
    /// (`metagameplay.json`, `shops.json`, henchman templates)
    pub static_dir: String,
}

/// One accepted session token and the account identity behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    /// Session token the client presents at login
    pub token: String,
    /// Account identity the token resolves to
    pub identity: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to emit logs as JSON
    #[serde(default)]
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:5055".to_string(),
                server_id: default_server_id(),
                storyline: default_storyline(),
                receive_timeout_secs: default_receive_timeout(),
                keepalive_interval_ms: default_keepalive_interval(),
                mission_start_delay_ms: default_mission_start_delay(),
                probe_reply_address: None,
                ai_enabled: default_ai_enabled(),
                starting_karma: default_starting_karma(),
                starting_nuyen: default_starting_nuyen(),
            },
            paths: PathSettings {
                data_dir: "data".to_string(),
                static_dir: "static_data".to_string(),
            },
            sessions: vec![SessionEntry {
                token: "local-session".to_string(),
                identity: "local-player".to_string(),
            }],
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at
    /// the specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation
    /// failed.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration into the protocol server's
    /// configuration type.
    ///
    /// Timing knobs not exposed in the TOML file keep the engine defaults.
    pub fn to_server_config(&self) -> Result<aplay_server::ServerConfig, Box<dyn std::error::Error>> {
        let defaults = aplay_server::ServerConfig::default();
        Ok(aplay_server::ServerConfig {
            bind_address: self.server.bind_address.parse()?,
            server_id: self.server.server_id,
            storyline: self.server.storyline.clone(),
            receive_timeout_secs: self.server.receive_timeout_secs,
            keepalive_interval_ms: self.server.keepalive_interval_ms,
            mission_start_delay_ms: self.server.mission_start_delay_ms,
            probe_reply_address: self.server.probe_reply_address.clone(),
            ai_enabled: self.server.ai_enabled,
            starting_karma: self.server.starting_karma,
            starting_nuyen: self.server.starting_nuyen,
            ..defaults
        })
    }

    /// Validates the merged configuration before startup.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if self.server.storyline.is_empty() {
            return Err("Storyline name cannot be empty".to_string());
        }

        if self.paths.data_dir.is_empty() {
            return Err("Data directory cannot be empty".to_string());
        }
        if self.paths.static_dir.is_empty() {
            return Err("Static-data directory cannot be empty".to_string());
        }

        for entry in &self.sessions {
            if entry.token.is_empty() || entry.identity.is_empty() {
                return Err("Session entries need a non-empty token and identity".to_string());
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.bind_address, "127.0.0.1:5055");
        assert_eq!(config.sessions.len(), 1);
    }

    #[test]
    fn default_config_converts_to_server_config() {
        let config = AppConfig::default();
        let server_config = config.to_server_config().expect("conversion");
        assert_eq!(server_config.bind_address.port(), 5055);
        assert_eq!(server_config.storyline, "Main Campaign");
        // Knobs not exposed in TOML keep their engine defaults.
        assert_eq!(server_config.creation_info_resend_attempts, 3);
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.server.bind_address = "invalid".to_string();
        assert!(config.validate().is_err());

        config.server.bind_address = "127.0.0.1:5055".to_string();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        config.sessions.push(SessionEntry {
            token: String::new(),
            identity: "x".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("srlocal.toml");
        let config = AppConfig::load_from_file(&path).await.expect("load");
        assert!(path.exists());
        assert_eq!(config.server.bind_address, "127.0.0.1:5055");

        // A second load reads the file back identically.
        let reread = AppConfig::load_from_file(&path).await.expect("reload");
        assert_eq!(reread.paths.data_dir, config.paths.data_dir);
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("srlocal.toml");
        tokio::fs::write(
            &path,
            r#"
[server]
bind_address = "0.0.0.0:6000"

[paths]
data_dir = "saves"
static_dir = "extracted"

[logging]
level = "debug"
"#,
        )
        .await
        .expect("write");

        let config = AppConfig::load_from_file(&path).await.expect("load");
        assert_eq!(config.server.bind_address, "0.0.0.0:6000");
        assert_eq!(config.server.keepalive_interval_ms, 2000);
        assert!(config.server.ai_enabled);
        assert!(config.sessions.is_empty());
    }
}
