use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub spotify: SpotifyConfig,
    #[serde(default)]
    pub ytmd: YtmdConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the plugin listens for the host runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Spotify,
    Ytmd,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_spotify_api_base")]
    pub api_base: String,
    #[serde(default = "default_spotify_accounts_base")]
    pub accounts_base: String,
    /// JSON file holding the access/refresh token pair.
    #[serde(default = "default_spotify_token_file")]
    pub token_file: PathBuf,
}

/// YouTube Music Desktop companion server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YtmdConfig {
    #[serde(default = "default_bind_address")]
    pub host: String,
    #[serde(default = "default_ytmd_port")]
    pub port: u16,
    #[serde(default = "default_ytmd_app_id")]
    pub app_id: String,
    #[serde(default = "default_ytmd_token_file")]
    pub token_file: PathBuf,
    /// Subscribe to the companion's realtime socket in addition to polling.
    #[serde(default = "default_true")]
    pub realtime: bool,
}

/// Engine cadences.  Per-key intervals in the host's key data override the
/// first two.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingConfig {
    #[serde(default = "default_fetch_interval_ms")]
    pub fetch_interval_ms: u64,
    #[serde(default = "default_interpolation_interval_ms")]
    pub interpolation_interval_ms: u64,
    #[serde(default = "default_song_end_buffer_ms")]
    pub song_end_buffer_ms: u64,
    #[serde(default = "default_push_debounce_ms")]
    pub push_debounce_ms: u64,
    #[serde(default = "default_interaction_settle_ms")]
    pub interaction_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when RUST_LOG is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_base: default_spotify_api_base(),
            accounts_base: default_spotify_accounts_base(),
            token_file: default_spotify_token_file(),
        }
    }
}

impl Default for YtmdConfig {
    fn default() -> Self {
        Self {
            host: default_bind_address(),
            port: default_ytmd_port(),
            app_id: default_ytmd_app_id(),
            token_file: default_ytmd_token_file(),
            realtime: true,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fetch_interval_ms: default_fetch_interval_ms(),
            interpolation_interval_ms: default_interpolation_interval_ms(),
            song_end_buffer_ms: default_song_end_buffer_ms(),
            push_debounce_ms: default_push_debounce_ms(),
            interaction_settle_ms: default_interaction_settle_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    platform::PLUGIN_TCP_PORT
}

fn default_true() -> bool {
    true
}

fn default_spotify_api_base() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_spotify_accounts_base() -> String {
    "https://accounts.spotify.com".to_string()
}

fn default_spotify_token_file() -> PathBuf {
    platform::data_dir().join("spotify_tokens.json")
}

fn default_ytmd_port() -> u16 {
    9863
}

fn default_ytmd_app_id() -> String {
    "nowplaying-keys".to_string()
}

fn default_ytmd_token_file() -> PathBuf {
    platform::data_dir().join("ytmd_token.json")
}

fn default_fetch_interval_ms() -> u64 {
    4000
}

fn default_interpolation_interval_ms() -> u64 {
    1000
}

fn default_song_end_buffer_ms() -> u64 {
    200
}

fn default_push_debounce_ms() -> u64 {
    500
}

fn default_interaction_settle_ms() -> u64 {
    250
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            backend: BackendConfig::default(),
            spotify: SpotifyConfig::default(),
            ytmd: YtmdConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
