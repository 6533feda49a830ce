use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use crate::errors::{Result, SpotifyToMp3Error};

/// Supported audio formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    M4a,
    Flac,
    Opus,
}

impl AudioFormat {
    /// File extension produced by the transcode step
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4a => "m4a",
            AudioFormat::Flac => "flac",
            AudioFormat::Opus => "opus",
        }
    }

    pub fn is_lossless(&self) -> bool {
        matches!(self, AudioFormat::Flac)
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = SpotifyToMp3Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "m4a" => Ok(AudioFormat::M4a),
            "flac" => Ok(AudioFormat::Flac),
            "opus" => Ok(AudioFormat::Opus),
            _ => Err(SpotifyToMp3Error::InvalidFormat(s.to_string())),
        }
    }
}

/// Supported bitrates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Bitrate {
    #[value(name = "128")]
    #[serde(rename = "128")]
    Kbps128,
    #[value(name = "192")]
    #[serde(rename = "192")]
    Kbps192,
    #[value(name = "256")]
    #[serde(rename = "256")]
    Kbps256,
    #[value(name = "320")]
    #[serde(rename = "320")]
    Kbps320,
}

impl std::fmt::Display for Bitrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

impl std::str::FromStr for Bitrate {
    type Err = SpotifyToMp3Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim_end_matches(['k', 'K']) {
            "128" => Ok(Bitrate::Kbps128),
            "192" => Ok(Bitrate::Kbps192),
            "256" => Ok(Bitrate::Kbps256),
            "320" => Ok(Bitrate::Kbps320),
            _ => Err(SpotifyToMp3Error::InvalidBitrate(s.to_string())),
        }
    }
}

impl Bitrate {
    pub fn as_u32(&self) -> u32 {
        match self {
            Bitrate::Kbps128 => 128,
            Bitrate::Kbps192 => 192,
            Bitrate::Kbps256 => 256,
            Bitrate::Kbps320 => 320,
        }
    }
}

/// API Keys configuration for the playlist provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub spotify_client_id: Option<String>,
    pub spotify_client_secret: Option<String>,
}

/// Search retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub max_attempts: u32,
    /// First backoff step; 0 disables the delay between attempts
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 250,
            max_delay_ms: 4000,
        }
    }
}

impl ResolverConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Per-operation timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub search_secs: u64,
    pub download_secs: u64,
    pub artwork_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            search_secs: 60,
            download_secs: 900,
            artwork_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn search(&self) -> Duration {
        Duration::from_secs(self.search_secs)
    }

    pub fn download(&self) -> Duration {
        Duration::from_secs(self.download_secs)
    }

    pub fn artwork(&self) -> Duration {
        Duration::from_secs(self.artwork_secs)
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub download_directory: PathBuf,
    pub default_format: AudioFormat,
    pub default_bitrate: Bitrate,
    /// Worker count; `None` uses the available CPU parallelism
    pub workers: Option<usize>,
    pub yt_dlp_path: String,
    pub api_keys: ApiKeys,
    pub resolver: ResolverConfig,
    pub timeouts: TimeoutConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            download_directory: dirs::audio_dir()
                .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Spotify Playlists"),
            default_format: AudioFormat::Mp3,
            default_bitrate: Bitrate::Kbps192,
            workers: None,
            yt_dlp_path: "yt-dlp".to_string(),
            api_keys: ApiKeys::default(),
            resolver: ResolverConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Get the configuration directory path
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .ok_or_else(|| SpotifyToMp3Error::Config("Could not find config directory".to_string()))
            .map(|dir| dir.join("spotify-to-mp3"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from the default location, writing defaults if absent,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let settings_path = Self::settings_path()?;

        let mut config = if settings_path.exists() {
            Self::load_from(&settings_path)?
        } else {
            let config = Self::default();
            config.save_to(&settings_path)?;
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SpotifyToMp3Error::Config(format!("Failed to read settings file: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SpotifyToMp3Error::Config(format!("Failed to parse settings file: {}", e)))
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::settings_path()?)
    }

    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SpotifyToMp3Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)
            .map_err(|e| SpotifyToMp3Error::Config(format!("Failed to write settings file: {}", e)))?;

        Ok(())
    }

    /// `SPOTIFY_CLIENT_ID` / `SPOTIFY_CLIENT_SECRET` take precedence over the file
    pub fn apply_env_overrides(&mut self) {
        if let Ok(client_id) = std::env::var("SPOTIFY_CLIENT_ID") {
            if !client_id.is_empty() {
                self.api_keys.spotify_client_id = Some(client_id);
            }
        }
        if let Ok(client_secret) = std::env::var("SPOTIFY_CLIENT_SECRET") {
            if !client_secret.is_empty() {
                self.api_keys.spotify_client_secret = Some(client_secret);
            }
        }
    }

    /// Worker count to use when none is given on the command line
    pub fn worker_count(&self) -> usize {
        self.workers
            .filter(|&n| n > 0)
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }
}
