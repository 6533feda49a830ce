use clap::{Args, Parser, Subcommand};
use crate::config::{AudioFormat, Bitrate, Config};
use crate::downloader::spotify::SpotifyClient;
use crate::downloader::tagger::HttpArtworkSource;
use crate::downloader::youtube::YtDlpBackend;
use crate::downloader::{Backends, BatchReport, Orchestrator, PipelineOptions};
use crate::errors::{Result, SpotifyToMp3Error};
use crate::utils::net::NetworkUtils;
use crate::utils::Utils;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SPOTIFY_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Spotify to MP3 - Download a Spotify playlist as a folder of tagged audio files
#[derive(Parser)]
#[command(name = "spotify-to-mp3")]
#[command(about = "Download Spotify playlists using YouTube as the audio source")]
#[command(version)]
pub struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Export a playlist and download every track into its own folder
    Download {
        /// Spotify playlist link or URI
        url: String,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Write a playlist's track store without downloading anything
    Export {
        /// Spotify playlist link or URI
        url: String,

        /// Directory for the store file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Download every track of an existing store file
    Fetch {
        /// Store file written by `export`
        store: PathBuf,

        #[command(flatten)]
        pipeline: PipelineArgs,
    },

    /// Configure application settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Options shared by the commands that run the download pipeline
#[derive(Args, Clone, Debug, Default)]
pub struct PipelineArgs {
    /// Output directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of parallel workers
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Output format
    #[arg(short, long, value_enum)]
    pub format: Option<AudioFormat>,

    /// Audio bitrate
    #[arg(short, long, value_enum)]
    pub bitrate: Option<Bitrate>,

    /// Searches per track before giving up on it
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

impl PipelineArgs {
    /// Pipeline options for `output_dir`, command line values over config
    pub fn options(&self, config: &Config, output_dir: PathBuf) -> PipelineOptions {
        let mut options = PipelineOptions::from_config(config, output_dir);
        if let Some(format) = self.format {
            options.transcode.format = format;
        }
        if let Some(bitrate) = self.bitrate {
            options.transcode.bitrate = bitrate;
        }
        if let Some(max_attempts) = self.max_attempts {
            options.max_attempts = max_attempts;
        }
        options
    }

    pub fn worker_count(&self, config: &Config) -> usize {
        self.workers
            .filter(|&n| n > 0)
            .unwrap_or_else(|| config.worker_count())
    }
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Set Spotify API credentials
    SetSpotify {
        /// Client ID
        client_id: String,

        /// Client secret
        client_secret: String,
    },

    /// Set download directory
    SetDir {
        /// Directory path
        path: PathBuf,
    },

    /// Reset to default settings
    Reset,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Download { url, pipeline } => handle_download(&url, &pipeline).await,
            Commands::Export { url, output } => handle_export(&url, output).await,
            Commands::Fetch { store, pipeline } => handle_fetch(&store, &pipeline).await,
            Commands::Config { command } => handle_config(command),
        }
    }
}

async fn handle_download(url: &str, pipeline: &PipelineArgs) -> Result<()> {
    let config = Config::load()?;
    let base_dir = pipeline
        .output
        .clone()
        .unwrap_or_else(|| config.download_directory.clone());

    let mut spotify = spotify_client(&config)?;
    let exported = spotify.export_playlist(url, &base_dir).await?;

    // The store moves into the playlist folder so everything stays together
    let playlist_dir = base_dir.join(Utils::sanitize_filename(&exported.name));
    tokio::fs::create_dir_all(&playlist_dir).await?;
    let store_path = match exported.store_path.file_name() {
        Some(file_name) => playlist_dir.join(file_name),
        None => {
            return Err(SpotifyToMp3Error::Config(format!(
                "Invalid store path {}",
                exported.store_path.display()
            )))
        }
    };
    tokio::fs::rename(&exported.store_path, &store_path).await?;

    let report = run_pipeline(&config, pipeline, &store_path, playlist_dir).await?;

    if report.cancelled() > 0 {
        warn!(
            "Interrupted; resume with `spotify-to-mp3 fetch \"{}\"`",
            store_path.display()
        );
        return Ok(());
    }

    tokio::fs::remove_file(&store_path).await?;
    println!("Operation complete.");
    Ok(())
}

async fn handle_export(url: &str, output: Option<PathBuf>) -> Result<()> {
    let config = Config::load()?;
    let dir = output.unwrap_or_else(|| config.download_directory.clone());

    let mut spotify = spotify_client(&config)?;
    let exported = spotify.export_playlist(url, &dir).await?;

    println!(
        "Exported {} tracks of \"{}\" to {}",
        exported.records.len(),
        exported.name,
        exported.store_path.display()
    );
    Ok(())
}

async fn handle_fetch(store: &Path, pipeline: &PipelineArgs) -> Result<()> {
    let config = Config::load()?;
    let output_dir = match &pipeline.output {
        Some(output) => output.clone(),
        None => store
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    run_pipeline(&config, pipeline, store, output_dir).await?;
    println!("Operation complete.");
    Ok(())
}

async fn run_pipeline(
    config: &Config,
    pipeline: &PipelineArgs,
    store: &Path,
    output_dir: PathBuf,
) -> Result<BatchReport> {
    let backends = build_backends(config).await?;
    let options = pipeline.options(config, output_dir);
    let orchestrator = Orchestrator::new(backends, options, pipeline.worker_count(config));
    orchestrator.cancel_on_ctrl_c();

    let report = orchestrator.run_store(store).await?;
    info!(
        "{} finished, {} skipped, {} failed, {} cancelled",
        report.finished(),
        report.skipped(),
        report.failed(),
        report.cancelled()
    );
    Ok(report)
}

async fn build_backends(config: &Config) -> Result<Backends> {
    let yt_dlp = Arc::new(YtDlpBackend::new(config.yt_dlp_path.clone()));
    let version = yt_dlp.version().await.map_err(|e| {
        SpotifyToMp3Error::Config(format!(
            "yt-dlp is required but `{}` could not be run: {}",
            config.yt_dlp_path, e
        ))
    })?;
    info!("Using yt-dlp {}", version);

    let artwork_client = NetworkUtils::client_with_timeout(config.timeouts.artwork())?;

    Ok(Backends {
        search: yt_dlp.clone(),
        media: yt_dlp,
        artwork: Arc::new(HttpArtworkSource::new(artwork_client)),
    })
}

/// Spotify client from config, asking on stdin for missing credentials
fn spotify_client(config: &Config) -> Result<SpotifyClient> {
    let client_id = match config.api_keys.spotify_client_id.clone().filter(|s| !s.is_empty()) {
        Some(client_id) => client_id,
        None => prompt("Client ID: ")?,
    };
    let client_secret = match config
        .api_keys
        .spotify_client_secret
        .clone()
        .filter(|s| !s.is_empty())
    {
        Some(client_secret) => client_secret,
        None => prompt("Client secret: ")?,
    };

    let client = NetworkUtils::client_with_timeout(SPOTIFY_REQUEST_TIMEOUT)?;
    Ok(SpotifyClient::new(client_id, client_secret, client))
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    std::io::stdout().flush()?;

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Configuration as stored on disk, without environment overrides
fn load_stored_config() -> Result<Config> {
    let settings_path = Config::settings_path()?;
    if settings_path.exists() {
        Config::load_from(&settings_path)
    } else {
        Ok(Config::default())
    }
}

fn handle_config(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = Config::load()?;

            println!("Current configuration:");
            println!("  Settings file: {}", Config::settings_path()?.display());
            println!("  Download directory: {}", config.download_directory.display());
            println!("  Default format: {}", config.default_format);
            println!("  Default bitrate: {} kbps", config.default_bitrate.as_u32());
            println!("  Workers: {}", config.worker_count());
            println!("  yt-dlp: {}", config.yt_dlp_path);
            println!(
                "  Search attempts: {} (backoff {}-{} ms)",
                config.resolver.max_attempts, config.resolver.base_delay_ms, config.resolver.max_delay_ms
            );

            if config.api_keys.spotify_client_id.is_some() && config.api_keys.spotify_client_secret.is_some() {
                println!("  Spotify credentials: Set");
            } else {
                println!("  Spotify credentials: Not set");
            }
        }
        ConfigCommands::SetSpotify { client_id, client_secret } => {
            let mut config = load_stored_config()?;
            config.api_keys.spotify_client_id = Some(client_id);
            config.api_keys.spotify_client_secret = Some(client_secret);
            config.save()?;
            println!("Spotify credentials updated");
        }
        ConfigCommands::SetDir { path } => {
            let mut config = load_stored_config()?;
            config.download_directory = path;
            config.save()?;
            println!("Download directory updated");
        }
        ConfigCommands::Reset => {
            Config::default().save()?;
            println!("Configuration reset to defaults");
        }
    }

    Ok(())
}
