use thiserror::Error;

/// Main error type for the playlist downloader
#[derive(Error, Debug)]
pub enum SpotifyToMp3Error {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Track store error: {0}")]
    Csv(#[from] csv::Error),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("ID3 tagging error: {0}")]
    Id3(#[from] id3::Error),

    #[error("Lofty tagging error: {0}")]
    Lofty(#[from] lofty::error::LoftyError),

    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Spotify API error: {0}")]
    Spotify(String),

    #[error("yt-dlp error: {0}")]
    YtDlp(String),

    #[error("No valid URLs found for {query} after {attempts} attempts")]
    ResolutionExhausted {
        query: String,
        attempts: u32,
        last_error: Option<String>,
    },

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Tag write failed: {0}")]
    TagWrite(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Worker {segment} failed to start: {source}")]
    WorkerStartup {
        segment: usize,
        #[source]
        source: Box<SpotifyToMp3Error>,
    },

    #[error("Worker task failed: {0}")]
    Join(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid bitrate: {0}")]
    InvalidBitrate(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, SpotifyToMp3Error>;
