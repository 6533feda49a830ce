pub mod partition;
pub mod resolver;
pub mod fetcher;
pub mod tagger;
pub mod worker;
pub mod orchestrator;
pub mod youtube;
pub mod spotify;

#[cfg(test)]
mod testing;

pub use orchestrator::{BatchReport, Orchestrator};

use crate::config::{AudioFormat, Bitrate, Config};
use crate::errors::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Stable identity of one record for the lifetime of a batch run.
///
/// `key` names every temporary artifact of the track (artwork file, staging
/// directory), so nothing downstream depends on titles reported by the
/// media backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId {
    pub segment: usize,
    pub position: usize,
    pub key: Uuid,
}

impl TrackId {
    pub fn new(segment: usize, position: usize) -> Self {
        Self {
            segment,
            position,
            key: Uuid::new_v4(),
        }
    }

    /// Base name of the temporary artwork file
    pub fn artwork_temp_name(&self) -> String {
        format!("cover-{}", self.key.simple())
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "track {} (worker {})", self.position, self.segment)
    }
}

/// Transient per-track state threaded through resolve, fetch and tag
#[derive(Debug, Clone, Default)]
pub struct DownloadResult {
    pub locator: Option<String>,
    pub local_media_path: Option<PathBuf>,
    pub artwork_path: Option<PathBuf>,
}

/// Stage a track is in, used to annotate failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStage {
    SearchingSource,
    DownloadingAudio,
    EmbeddingArtwork,
}

impl std::fmt::Display for DownloadStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadStage::SearchingSource => write!(f, "Searching Source"),
            DownloadStage::DownloadingAudio => write!(f, "Downloading Audio"),
            DownloadStage::EmbeddingArtwork => write!(f, "Embedding Artwork"),
        }
    }
}

/// Final audio file with its cover embedded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedAsset {
    pub path: PathBuf,
}

/// How one record ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackStatus {
    Finished(PathBuf),
    /// No source found; the batch carries on without it
    Skipped(String),
    Failed { stage: DownloadStage, error: String },
    Cancelled,
}

/// Result message a worker sends for every record it owns
#[derive(Debug, Clone)]
pub struct TrackOutcome {
    pub id: TrackId,
    pub label: String,
    pub status: TrackStatus,
}

impl TrackOutcome {
    pub fn is_finished(&self) -> bool {
        matches!(self.status, TrackStatus::Finished(_))
    }
}

/// Transcode target handed to the media backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranscodeSpec {
    pub format: AudioFormat,
    pub bitrate: Bitrate,
    pub embed_metadata: bool,
}

impl Default for TranscodeSpec {
    fn default() -> Self {
        Self {
            format: AudioFormat::Mp3,
            bitrate: Bitrate::Kbps192,
            embed_metadata: true,
        }
    }
}

/// Knobs shared by every worker of a batch
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub output_dir: PathBuf,
    pub transcode: TranscodeSpec,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub search_timeout: Duration,
    pub download_timeout: Duration,
}

impl PipelineOptions {
    pub fn from_config(config: &Config, output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            transcode: TranscodeSpec {
                format: config.default_format,
                bitrate: config.default_bitrate,
                embed_metadata: true,
            },
            max_attempts: config.resolver.max_attempts,
            base_delay: config.resolver.base_delay(),
            max_delay: config.resolver.max_delay(),
            search_timeout: config.timeouts.search(),
            download_timeout: config.timeouts.download(),
        }
    }

    /// Defaults without backoff, convenient for tests and one-off runs
    pub fn immediate(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            transcode: TranscodeSpec::default(),
            max_attempts: 10,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            search_timeout: Duration::from_secs(60),
            download_timeout: Duration::from_secs(900),
        }
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub title: String,
    /// Absolute URL or a path relative to the backend's site
    pub path: String,
}

/// Free-text search over a media site
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Ordered candidates for `query`, best first; empty when nothing matched
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<Candidate>>;

    /// Base URL relative candidate paths are joined onto
    fn base_url(&self) -> &str {
        "https://www.youtube.com"
    }
}

/// Downloads and transcodes a located stream
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Fetch `locator` into `staging_dir`, transcoded per `spec`, named from
    /// the stream's own title. Returns the produced file.
    async fn fetch(&self, locator: &str, staging_dir: &Path, spec: &TranscodeSpec) -> Result<PathBuf>;
}

/// Source of cover image bytes
#[async_trait]
pub trait ArtworkSource: Send + Sync {
    async fn fetch_artwork(&self, url: &str) -> Result<Vec<u8>>;
}

/// Backends a worker composes; cloned into every worker
#[derive(Clone)]
pub struct Backends {
    pub search: Arc<dyn SearchBackend>,
    pub media: Arc<dyn MediaBackend>,
    pub artwork: Arc<dyn ArtworkSource>,
}
