use crate::downloader::fetcher::{Fetcher, STAGING_DIR};
use crate::downloader::partition::Segment;
use crate::downloader::resolver::Resolver;
use crate::downloader::tagger::Tagger;
use crate::downloader::{
    Backends, DownloadResult, DownloadStage, PipelineOptions, TrackId, TrackOutcome, TrackStatus,
};
use crate::errors::{Result, SpotifyToMp3Error};
use crate::store::{TrackRecord, TrackStore};
use crate::utils::fs::ScopedPath;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Processes one segment of the store, strictly in order
pub struct Worker {
    segment: Segment,
    options: PipelineOptions,
    resolver: Resolver,
    fetcher: Fetcher,
    tagger: Tagger,
    results: mpsc::UnboundedSender<TrackOutcome>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        segment: Segment,
        backends: Backends,
        options: PipelineOptions,
        results: mpsc::UnboundedSender<TrackOutcome>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resolver: Resolver::new(backends.search, &options),
            fetcher: Fetcher::new(backends.media, &options),
            tagger: Tagger::new(backends.artwork, options.output_dir.clone()),
            segment,
            options,
            results,
            cancel,
        }
    }

    /// Run the segment to completion, sending one outcome per record.
    ///
    /// Only scratch record I/O fails the worker; per-track errors are
    /// reported through the channel.
    pub async fn run(self) -> Result<()> {
        let index = self.segment.index;
        if self.segment.is_empty() {
            debug!("Worker {} has nothing to do", index);
            return Ok(());
        }

        let scratch_path = scratch_record_path(&self.options.output_dir, index);
        let _scratch = ScopedPath::new(&scratch_path);
        let records = create_staging_dir(&self.options.output_dir)
            .and_then(|_| TrackStore::write(&scratch_path, &self.segment.records))
            .and_then(|_| TrackStore::read(&scratch_path))
            .map_err(|e| SpotifyToMp3Error::WorkerStartup {
                segment: index,
                source: Box::new(e),
            })?;

        info!("Worker {} starting on {} tracks", index, records.len());

        for (i, record) in records.iter().enumerate() {
            let id = TrackId::new(index, self.segment.offset + i);

            if self.cancel.is_cancelled() {
                self.report_cancelled(&records[i..], id);
                break;
            }

            let span = info_span!("track", worker = index, position = id.position);
            let status = self.process(&id, record).instrument(span).await;
            self.send(id, record, status);
        }

        debug!("Worker {} finished", index);
        Ok(())
    }

    async fn process(&self, id: &TrackId, record: &TrackRecord) -> TrackStatus {
        let mut result = DownloadResult::default();

        let locator = match self
            .resolver
            .resolve(&record.title, &record.artist, &self.cancel)
            .await
        {
            Ok(locator) => locator,
            Err(SpotifyToMp3Error::Cancelled) => return TrackStatus::Cancelled,
            Err(e) => {
                info!("{}", e);
                return TrackStatus::Skipped(e.to_string());
            }
        };
        result.locator = Some(locator.clone());

        let media_path = match self
            .fetcher
            .fetch_and_transcode(id, &locator, &self.cancel)
            .await
        {
            Ok(path) => path,
            Err(e) => return failed(DownloadStage::DownloadingAudio, e),
        };
        result.local_media_path = Some(media_path.clone());

        let temp_name = id.artwork_temp_name();
        result.artwork_path = Some(self.options.output_dir.join(format!("{}.jpg", temp_name)));

        match self
            .tagger
            .tag_with_artwork(&media_path, &record.artwork_url, &temp_name, &self.cancel)
            .await
        {
            Ok(asset) => {
                debug!("Finished {:?}", result);
                TrackStatus::Finished(asset.path)
            }
            Err(e) => failed(DownloadStage::EmbeddingArtwork, e),
        }
    }

    fn report_cancelled(&self, remaining: &[TrackRecord], first: TrackId) {
        info!(
            "Worker {} cancelled with {} tracks left",
            self.segment.index,
            remaining.len()
        );
        for (i, record) in remaining.iter().enumerate() {
            let id = TrackId::new(first.segment, first.position + i);
            self.send(id, record, TrackStatus::Cancelled);
        }
    }

    fn send(&self, id: TrackId, record: &TrackRecord, status: TrackStatus) {
        let _ = self.results.send(TrackOutcome {
            id,
            label: record.search_query(),
            status,
        });
    }
}

/// Scratch copy of a segment, inside the staging directory
pub fn scratch_record_path(output_dir: &Path, segment: usize) -> PathBuf {
    output_dir
        .join(STAGING_DIR)
        .join(format!("worker-{}.txt", segment))
}

fn create_staging_dir(output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir.join(STAGING_DIR))?;
    Ok(())
}

fn failed(stage: DownloadStage, error: SpotifyToMp3Error) -> TrackStatus {
    if matches!(error, SpotifyToMp3Error::Cancelled) {
        return TrackStatus::Cancelled;
    }
    warn!("{} failed: {}", stage, error);
    TrackStatus::Failed {
        stage,
        error: error.to_string(),
    }
}
