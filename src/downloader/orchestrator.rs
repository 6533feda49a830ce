use crate::downloader::fetcher::STAGING_DIR;
use crate::downloader::partition::partition;
use crate::downloader::worker::Worker;
use crate::downloader::{Backends, PipelineOptions, TrackOutcome, TrackStatus};
use crate::errors::{Result, SpotifyToMp3Error};
use crate::store::{TrackRecord, TrackStore};
use futures_util::future::join_all;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-track outcomes of a batch, ordered by position in the store
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub workers: usize,
    pub outcomes: Vec<TrackOutcome>,
}

impl BatchReport {
    pub fn finished(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_finished()).count()
    }

    pub fn skipped(&self) -> usize {
        self.count(|status| matches!(status, TrackStatus::Skipped(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|status| matches!(status, TrackStatus::Failed { .. }))
    }

    pub fn cancelled(&self) -> usize {
        self.count(|status| matches!(status, TrackStatus::Cancelled))
    }

    fn count(&self, predicate: impl Fn(&TrackStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| predicate(&o.status)).count()
    }
}

/// Fans a track store out over independent workers and waits for all of them
pub struct Orchestrator {
    backends: Backends,
    options: PipelineOptions,
    worker_count: usize,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(backends: Backends, options: PipelineOptions, worker_count: usize) -> Self {
        Self {
            backends,
            options,
            worker_count,
            cancel: CancellationToken::new(),
        }
    }

    /// Token shared by every worker of this orchestrator
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel the batch when Ctrl-C is received
    pub fn cancel_on_ctrl_c(&self) {
        let cancel = self.cancellation_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => warn!("Interrupted, stopping workers"),
                        Err(e) => warn!("Failed to listen for Ctrl-C: {}", e),
                    }
                    cancel.cancel();
                }
            }
        });
    }

    /// Read the store at `store_path` and process every record in it
    pub async fn run_store(&self, store_path: &Path) -> Result<BatchReport> {
        let records = TrackStore::read(store_path)?;
        self.run(records).await
    }

    /// Partition `records`, run one worker per segment and join them all.
    ///
    /// Returns an error only when a worker could not start.
    pub async fn run(&self, records: Vec<TrackRecord>) -> Result<BatchReport> {
        let output_dir = &self.options.output_dir;
        tokio::fs::create_dir_all(output_dir).await?;

        let segments = partition(records, self.worker_count);
        let workers = segments.len();
        info!(
            "Downloading {} tracks with {} workers into {}",
            segments.iter().map(|s| s.len()).sum::<usize>(),
            workers,
            output_dir.display()
        );

        let (results_tx, mut results_rx) = mpsc::unbounded_channel::<TrackOutcome>();
        let handles: Vec<JoinHandle<Result<()>>> = segments
            .into_iter()
            .map(|segment| {
                let worker = Worker::new(
                    segment,
                    self.backends.clone(),
                    self.options.clone(),
                    results_tx.clone(),
                    self.cancel.clone(),
                );
                tokio::spawn(worker.run())
            })
            .collect();
        drop(results_tx);

        let collect = async {
            let mut outcomes = Vec::new();
            while let Some(outcome) = results_rx.recv().await {
                debug!("{}: {:?}", outcome.id, outcome.status);
                outcomes.push(outcome);
            }
            outcomes
        };
        let (mut outcomes, joined) = tokio::join!(collect, join_all(handles));

        let mut startup_failure = None;
        for (segment, result) in joined.into_iter().enumerate() {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!("Worker {} failed: {}", segment, e);
                    startup_failure.get_or_insert(e);
                }
                Err(e) => error!(
                    "Worker {} stopped abnormally: {}",
                    segment,
                    SpotifyToMp3Error::Join(e.to_string())
                ),
            }
        }

        remove_empty_staging(output_dir);
        info!("all workers joined");

        if let Some(e) = startup_failure {
            return Err(e);
        }

        outcomes.sort_by_key(|o| o.id.position);
        Ok(BatchReport { workers, outcomes })
    }
}

fn remove_empty_staging(output_dir: &Path) {
    let staging = output_dir.join(STAGING_DIR);
    if staging.is_dir() {
        // Fails while anything is still inside, which is fine
        let _ = std::fs::remove_dir(&staging);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::testing::{audio_files, backends, record, slug, FakeMedia, FakeSearch};
    use crate::downloader::worker::scratch_record_path;
    use std::sync::Arc;

    fn orchestrator(dir: &Path, search: Arc<FakeSearch>, media: Arc<FakeMedia>, workers: usize) -> Orchestrator {
        Orchestrator::new(
            backends(search, media),
            PipelineOptions::immediate(dir.to_path_buf()),
            workers,
        )
    }

    #[tokio::test]
    async fn empty_store_finishes_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), Arc::default(), Arc::default(), 4);

        let report = orchestrator.run(Vec::new()).await.unwrap();

        assert_eq!(report.workers, 4);
        assert!(report.outcomes.is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unresolved_track_is_absent_but_later_tracks_download() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(FakeSearch {
            unresolved: ["Ghost - Missing".to_string()].into(),
            ..Default::default()
        });
        let records = vec![
            record("Missing", "Ghost"),
            record("Song 2", "Blur"),
            record("Creep", "Radiohead"),
        ];
        let orchestrator = orchestrator(dir.path(), search.clone(), Arc::default(), 1);

        let report = orchestrator.run(records).await.unwrap();

        assert_eq!(search.calls_for("Ghost - Missing"), 10);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.finished(), 2);
        assert_eq!(
            audio_files(dir.path()),
            vec!["Blur_-_Song_2.mp3", "Radiohead_-_Creep.mp3"]
        );
        assert!(!dir.path().join(STAGING_DIR).exists());
        assert!(!scratch_record_path(dir.path(), 0).exists());
    }

    #[tokio::test]
    async fn failure_in_one_segment_leaves_others_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let media = Arc::new(FakeMedia {
            failing: [slug("A - One")].into(),
            ..Default::default()
        });
        // Segments over 2 workers: [One, Two] and [Three, Four]
        let records = vec![
            record("One", "A"),
            record("Two", "A"),
            record("Three", "B"),
            record("Four", "B"),
        ];
        let orchestrator = orchestrator(dir.path(), Arc::default(), media, 2);

        let report = orchestrator.run(records).await.unwrap();

        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcomes[0].label, "A - One");
        assert!(!report.outcomes[0].is_finished());
        assert_eq!(
            audio_files(dir.path()),
            vec!["A_-_Two.mp3", "B_-_Four.mp3", "B_-_Three.mp3"]
        );
    }

    #[tokio::test]
    async fn panicking_worker_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let media = Arc::new(FakeMedia {
            panicking: [slug("A - One")].into(),
            ..Default::default()
        });
        let records = vec![record("One", "A"), record("Two", "B")];
        let orchestrator = orchestrator(dir.path(), Arc::default(), media, 2);

        let report = orchestrator.run(records).await.unwrap();

        assert_eq!(report.finished(), 1);
        assert_eq!(audio_files(dir.path()), vec!["B_-_Two.mp3"]);
    }

    #[tokio::test]
    async fn cancelled_batch_reports_every_track() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), Arc::default(), Arc::default(), 3);
        orchestrator.cancellation_token().cancel();

        let records = (0..5).map(|i| record(&format!("T{}", i), "X")).collect();
        let report = orchestrator.run(records).await.unwrap();

        assert_eq!(report.cancelled(), 5);
        assert_eq!(
            report.outcomes.iter().map(|o| o.id.position).collect::<Vec<_>>(),
            vec![0, 1, 2, 3, 4]
        );
        assert!(audio_files(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn runs_from_a_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("Playlist.txt");
        TrackStore::write(&store, &[record("Hello, Goodbye", "The Beatles")]).unwrap();
        let orchestrator = orchestrator(dir.path(), Arc::default(), Arc::default(), 2);

        let report = orchestrator.run_store(&store).await.unwrap();

        assert_eq!(report.workers, 2);
        assert_eq!(report.finished(), 1);
        assert_eq!(
            audio_files(dir.path()),
            vec!["The_Beatles_-_Hello,_Goodbye.mp3"]
        );
    }

    #[tokio::test]
    async fn store_named_like_a_segment_survives_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("0.txt");
        let records = vec![record("One", "A"), record("Two", "B")];
        TrackStore::write(&store, &records).unwrap();
        let orchestrator = orchestrator(dir.path(), Arc::default(), Arc::default(), 2);

        let report = orchestrator.run_store(&store).await.unwrap();

        assert_eq!(report.finished(), 2);
        assert_eq!(TrackStore::read(&store).unwrap(), records);
        assert!(!dir.path().join(STAGING_DIR).exists());
    }
}
