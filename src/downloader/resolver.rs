use crate::downloader::{Candidate, PipelineOptions, SearchBackend};
use crate::errors::{Result, SpotifyToMp3Error};
use crate::utils::Utils;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Turns a (title, artist) pair into a downloadable locator
pub struct Resolver {
    backend: Arc<dyn SearchBackend>,
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    search_timeout: Duration,
}

impl Resolver {
    pub fn new(backend: Arc<dyn SearchBackend>, options: &PipelineOptions) -> Self {
        Self {
            backend,
            max_attempts: options.max_attempts,
            base_delay: options.base_delay,
            max_delay: options.max_delay,
            search_timeout: options.search_timeout,
        }
    }

    /// Resolve with the configured attempt budget
    pub async fn resolve(&self, title: &str, artist: &str, cancel: &CancellationToken) -> Result<String> {
        self.resolve_with_attempts(title, artist, self.max_attempts, cancel).await
    }

    /// Query `"{artist} - {title}"` up to `max_attempts` times and return the
    /// first candidate of the first non-empty response.
    ///
    /// Empty responses, backend errors and timeouts all consume an attempt.
    pub async fn resolve_with_attempts(
        &self,
        title: &str,
        artist: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let query = format!("{} - {}", artist, title);
        let mut attempts_left = max_attempts;
        let mut attempt = 0;
        let mut last_error = None;

        while attempts_left > 0 {
            if cancel.is_cancelled() {
                return Err(SpotifyToMp3Error::Cancelled);
            }

            let search = tokio::time::timeout(self.search_timeout, self.backend.search(&query, 1));
            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(SpotifyToMp3Error::Cancelled),
                response = search => response,
            };

            match response {
                Ok(Ok(candidates)) => {
                    if let Some(best) = candidates.into_iter().next() {
                        let locator = self.locator_for(&best);
                        debug!("Resolved {} to {} ({})", query, locator, best.title);
                        return Ok(locator);
                    }
                }
                Ok(Err(e)) => {
                    warn!("Search for {} failed: {}", query, e);
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    warn!(
                        "Search for {} timed out after {}s",
                        query,
                        self.search_timeout.as_secs()
                    );
                    last_error = Some(format!(
                        "search timed out after {}s",
                        self.search_timeout.as_secs()
                    ));
                }
            }

            attempts_left -= 1;
            info!(
                "No valid URLs found for {}, trying again ({} attempts left).",
                query, attempts_left
            );

            if attempts_left > 0 {
                let delay = Utils::backoff_delay(attempt, self.base_delay, self.max_delay);
                if !delay.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(SpotifyToMp3Error::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
            attempt += 1;
        }

        Err(SpotifyToMp3Error::ResolutionExhausted {
            query,
            attempts: max_attempts,
            last_error,
        })
    }

    /// Absolute URL for a candidate; relative paths are joined onto the
    /// backend's site
    fn locator_for(&self, candidate: &Candidate) -> String {
        if candidate.path.starts_with("http://") || candidate.path.starts_with("https://") {
            return candidate.path.clone();
        }

        Url::parse(self.backend.base_url())
            .and_then(|base| base.join(&candidate.path))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| format!("{}{}", self.backend.base_url(), candidate.path))
    }
}
