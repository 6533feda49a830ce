use crate::downloader::{MediaBackend, PipelineOptions, TrackId, TranscodeSpec};
use crate::errors::{Result, SpotifyToMp3Error};
use crate::utils::fs::ScopedPath;
use crate::utils::Utils;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Directory under the output folder holding per-track staging dirs
pub const STAGING_DIR: &str = ".staging";

const STAGING_CLEANUP_ATTEMPTS: u32 = 5;
const STAGING_CLEANUP_DELAY: Duration = Duration::from_millis(50);

/// Downloads a located stream, transcodes it, and moves the result into the
/// output directory under a name no other track holds.
pub struct Fetcher {
    backend: Arc<dyn MediaBackend>,
    output_dir: PathBuf,
    spec: TranscodeSpec,
    download_timeout: Duration,
}

impl Fetcher {
    pub fn new(backend: Arc<dyn MediaBackend>, options: &PipelineOptions) -> Self {
        Self {
            backend,
            output_dir: options.output_dir.clone(),
            spec: options.transcode,
            download_timeout: options.download_timeout,
        }
    }

    pub async fn fetch_and_transcode(
        &self,
        id: &TrackId,
        locator: &str,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let staging_dir = self.output_dir.join(STAGING_DIR).join(id.key.simple().to_string());
        tokio::fs::create_dir_all(&staging_dir).await.map_err(|e| {
            SpotifyToMp3Error::Transfer(format!(
                "Failed to create staging directory {}: {}",
                staging_dir.display(),
                e
            ))
        })?;
        let staging = ScopedPath::new(&staging_dir);

        info!("Initiating download for {} ({})", locator, id);
        let fetch = tokio::time::timeout(
            self.download_timeout,
            self.backend.fetch(locator, &staging_dir, &self.spec),
        );
        let fetched = tokio::select! {
            _ = cancel.cancelled() => Err(SpotifyToMp3Error::Cancelled),
            produced = fetch => produced.unwrap_or_else(|_| {
                Err(SpotifyToMp3Error::Timeout(format!(
                    "download of {} exceeded {}s",
                    locator,
                    self.download_timeout.as_secs()
                )))
            }),
        };
        let produced = match fetched {
            Ok(produced) => produced,
            Err(e @ (SpotifyToMp3Error::Cancelled | SpotifyToMp3Error::Timeout(_))) => {
                // The killed backend may not have exited yet
                staging
                    .remove_settled(STAGING_CLEANUP_ATTEMPTS, STAGING_CLEANUP_DELAY)
                    .await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if !produced.is_file() {
            return Err(SpotifyToMp3Error::Transfer(format!(
                "Backend reported {} but no such file exists",
                produced.display()
            )));
        }

        let file_name = output_file_name(&produced, &self.spec);
        let target = claim_output_path(&self.output_dir.join(file_name))?;
        tokio::fs::rename(&produced, &target).await.map_err(|e| {
            let _ = std::fs::remove_file(&target);
            SpotifyToMp3Error::Transfer(format!(
                "Failed to move {} to {}: {}",
                produced.display(),
                target.display(),
                e
            ))
        })?;

        debug!("The downloaded file name is: {}", target.display());
        Ok(target)
    }
}

/// Sanitized name of the produced file, keeping the backend's title as stem
fn output_file_name(produced: &Path, spec: &TranscodeSpec) -> String {
    let stem = produced
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = produced
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| spec.format.extension().to_string());

    format!("{}.{}", Utils::sanitize_filename(&stem), extension)
}

/// Reserve a free path next to `desired`, creating it empty so concurrent
/// workers cannot pick the same one.
fn claim_output_path(desired: &Path) -> Result<PathBuf> {
    loop {
        let candidate = Utils::generate_unique_filename(desired);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(SpotifyToMp3Error::Io(e)),
        }
    }
}
