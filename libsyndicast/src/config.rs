//! Configuration management for Syndicast

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ConfigError, Result};
use crate::types::Platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    pub twitter: Option<OAuthAppConfig>,
    pub linkedin: Option<OAuthAppConfig>,
    pub bluesky: Option<BlueskyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP entrypoints.
    pub bind: String,
    /// Fallback origin for OAuth error redirects when the handshake (and
    /// therefore the caller's return origin) cannot be recovered.
    pub app_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8787".to_string(),
            app_origin: "http://127.0.0.1:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between sweeps.
    pub poll_interval: u64,
    /// Half-width of the due window in seconds. Must stay below the poll
    /// interval or overlapping sweeps could double-select a post.
    pub tolerance_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: 60,
            tolerance_secs: 60,
        }
    }
}

/// Registered OAuth2 application for a PKCE platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAppConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueskyConfig {
    /// PDS base URL.
    pub service: String,
}

impl Default for BlueskyConfig {
    fn default() -> Self {
        Self {
            service: "https://bsky.social".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            database: DatabaseConfig {
                path: "~/.local/share/syndicast/syndicast.db".to_string(),
            },
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            twitter: None,
            linkedin: None,
            bluesky: Some(BlueskyConfig::default()),
        }
    }

    /// Whether the given platform has the configuration its adapter needs.
    pub fn platform_configured(&self, platform: Platform) -> bool {
        match platform {
            Platform::Twitter => self.twitter.is_some(),
            Platform::Linkedin => self.linkedin.is_some(),
            Platform::Bluesky => self.bluesky.is_some(),
        }
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("SYNDICAST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("syndicast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_sane_scheduler() {
        let config = Config::default_config();
        assert_eq!(config.scheduler.poll_interval, 60);
        assert!(config.scheduler.tolerance_secs <= config.scheduler.poll_interval as i64);
    }

    #[test]
    fn test_platform_configured() {
        let mut config = Config::default_config();
        assert!(!config.platform_configured(Platform::Twitter));
        assert!(config.platform_configured(Platform::Bluesky));

        config.twitter = Some(OAuthAppConfig {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "https://example.com/oauth/twitter/callback".to_string(),
        });
        assert!(config.platform_configured(Platform::Twitter));
    }

    #[test]
    #[serial_test::serial]
    fn test_config_path_env_override() {
        std::env::set_var("SYNDICAST_CONFIG", "/tmp/custom-syndicast.toml");
        let path = resolve_config_path().unwrap();
        assert_eq!(path, PathBuf::from("/tmp/custom-syndicast.toml"));
        std::env::remove_var("SYNDICAST_CONFIG");
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
            [database]
            path = "/tmp/syndicast.db"

            [twitter]
            client_id = "abc"
            client_secret = "def"
            redirect_uri = "https://example.com/oauth/twitter/callback"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database.path, "/tmp/syndicast.db");
        assert_eq!(config.server.bind, "127.0.0.1:8787");
        assert!(config.twitter.is_some());
        assert!(config.linkedin.is_none());
    }
}
