//! In-memory backends for pipeline tests

use crate::downloader::{ArtworkSource, Backends, Candidate, MediaBackend, SearchBackend, TranscodeSpec};
use crate::errors::{Result, SpotifyToMp3Error};
use crate::store::TrackRecord;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const FAKE_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

pub fn slug(query: &str) -> String {
    query.replace(' ', "_")
}

pub fn record(title: &str, artist: &str) -> TrackRecord {
    TrackRecord::new(
        title,
        artist,
        format!("https://open.spotify.com/track/{}", slug(title)),
        "https://i.scdn.co/image/cover",
    )
}

/// Answers every query with `/watch?v=<slug>` unless told otherwise
#[derive(Default)]
pub struct FakeSearch {
    pub unresolved: HashSet<String>,
    pub calls: Mutex<HashMap<String, usize>>,
}

impl FakeSearch {
    pub fn calls_for(&self, query: &str) -> usize {
        self.calls.lock().unwrap().get(query).copied().unwrap_or(0)
    }
}

#[async_trait]
impl SearchBackend for FakeSearch {
    async fn search(&self, query: &str, _max_results: u32) -> Result<Vec<Candidate>> {
        *self.calls.lock().unwrap().entry(query.to_string()).or_default() += 1;
        if self.unresolved.contains(query) {
            return Ok(Vec::new());
        }
        Ok(vec![Candidate {
            title: query.to_string(),
            path: format!("/watch?v={}", slug(query)),
        }])
    }
}

/// Writes a minimal MP3 named after the locator's video id
#[derive(Default)]
pub struct FakeMedia {
    pub failing: HashSet<String>,
    pub panicking: HashSet<String>,
}

#[async_trait]
impl MediaBackend for FakeMedia {
    async fn fetch(&self, locator: &str, staging_dir: &Path, spec: &TranscodeSpec) -> Result<PathBuf> {
        let video = locator.rsplit("v=").next().unwrap_or(locator).to_string();
        if self.panicking.contains(&video) {
            panic!("media backend blew up on {}", video);
        }
        if self.failing.contains(&video) {
            return Err(SpotifyToMp3Error::YtDlp(format!("codec error for {}", video)));
        }

        let path = staging_dir.join(format!("{}.{}", video, spec.format.extension()));
        let mut bytes = vec![0xFF, 0xFB, 0x90, 0x64];
        bytes.resize(1024, 0);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

pub struct FakeArtwork;

#[async_trait]
impl ArtworkSource for FakeArtwork {
    async fn fetch_artwork(&self, _url: &str) -> Result<Vec<u8>> {
        Ok(FAKE_JPEG.to_vec())
    }
}

pub fn backends(search: Arc<FakeSearch>, media: Arc<FakeMedia>) -> Backends {
    Backends {
        search,
        media,
        artwork: Arc::new(FakeArtwork),
    }
}

/// Audio files (not scratch records or staging) left in `dir`
pub fn audio_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".mp3"))
        .collect();
    names.sort();
    names
}
