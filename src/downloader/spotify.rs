use crate::errors::{Result, SpotifyToMp3Error};
use crate::store::{TrackRecord, TrackStore};
use crate::utils::Utils;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";
const PAGE_SIZE: u32 = 100;
const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Spotify Web API client used to export playlists
pub struct SpotifyClient {
    client: Client,
    client_id: String,
    client_secret: String,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SpotifyTokenResponse {
    access_token: String,
}

/// A playlist written to a track store
#[derive(Debug, Clone)]
pub struct ExportedPlaylist {
    pub name: String,
    pub store_path: PathBuf,
    pub records: Vec<TrackRecord>,
}

impl SpotifyClient {
    /// Create a client over an existing HTTP client
    pub fn new(client_id: String, client_secret: String, client: Client) -> Self {
        Self {
            client,
            client_id,
            client_secret,
            access_token: None,
        }
    }

    /// Check if the client has both credentials
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    /// Obtain an app token through the client-credentials flow
    pub async fn authenticate(&mut self) -> Result<()> {
        if !self.is_configured() {
            return Err(SpotifyToMp3Error::Config(
                "Spotify client ID and secret are required".to_string(),
            ));
        }

        debug!("Authenticating with Spotify API");
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];

        let response = self.client.post(TOKEN_URL).form(&params).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SpotifyToMp3Error::Spotify(format!(
                "Authentication failed: {} - {}",
                status, error_text
            )));
        }

        let token_response: SpotifyTokenResponse = response.json().await?;
        self.access_token = Some(token_response.access_token);
        info!("Authenticated with Spotify");

        Ok(())
    }

    async fn get_json(&mut self, url: &str) -> Result<serde_json::Value> {
        if self.access_token.is_none() {
            self.authenticate().await?;
        }
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| SpotifyToMp3Error::Spotify("No access token".to_string()))?;

        let response = self.client.get(url).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(SpotifyToMp3Error::Spotify(format!(
                "Request to {} failed: {} - {}",
                url, status, error_text
            )));
        }

        Ok(response.json().await?)
    }

    /// Playlist name and its advertised track total
    pub async fn playlist_summary(&mut self, playlist_id: &str) -> Result<(String, u64)> {
        let url = format!("{}/playlists/{}?fields=name,tracks.total", API_BASE, playlist_id);
        let playlist = self.get_json(&url).await?;

        let name = playlist
            .get("name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(playlist_id)
            .to_string();
        let total = playlist["tracks"]["total"].as_u64().unwrap_or(0);

        Ok((name, total))
    }

    /// Every exportable track of the playlist, following `next` links
    pub async fn playlist_tracks(&mut self, playlist_id: &str) -> Result<Vec<TrackRecord>> {
        let mut records = Vec::new();
        let mut next_url = Some(format!(
            "{}/playlists/{}/tracks?limit={}",
            API_BASE, playlist_id, PAGE_SIZE
        ));
        let mut page_count = 0;

        while let Some(url) = next_url {
            page_count += 1;
            debug!("Fetching playlist tracks page {}", page_count);

            let page = self.get_json(&url).await?;
            let (mut page_records, next) = records_from_page(&page);
            records.append(&mut page_records);
            next_url = next;
        }

        Ok(records)
    }

    /// Export the playlist to `<dir>/<playlist name>.txt`
    pub async fn export_playlist(&mut self, playlist_uri: &str, dir: &Path) -> Result<ExportedPlaylist> {
        let playlist_id = extract_playlist_id(playlist_uri)?;
        let (name, total) = self.playlist_summary(&playlist_id).await?;

        tokio::fs::create_dir_all(dir).await?;
        let store_path = dir.join(format!("{}.txt", Utils::sanitize_filename(&name)));
        info!("Writing {} tracks to {}.", total, store_path.display());

        let records = self.playlist_tracks(&playlist_id).await?;
        TrackStore::write(&store_path, &records)?;

        Ok(ExportedPlaylist {
            name,
            store_path,
            records,
        })
    }
}

/// Playlist id from an `open.spotify.com` link or a `spotify:playlist:` URI
pub fn extract_playlist_id(playlist_uri: &str) -> Result<String> {
    let pattern = Regex::new(
        r"^(?:https?://open\.spotify\.com/(?:intl-[A-Za-z-]+/)?playlist/|spotify:playlist:)([A-Za-z0-9]+)(?:[/?#].*)?$",
    )
    .map_err(|e| SpotifyToMp3Error::Config(format!("Invalid playlist pattern: {}", e)))?;

    pattern
        .captures(playlist_uri.trim())
        .and_then(|caps| caps.get(1))
        .map(|id| id.as_str().to_string())
        .ok_or_else(|| {
            SpotifyToMp3Error::InvalidUrl(format!("Invalid Spotify playlist URL: {}", playlist_uri))
        })
}

/// Records of one paging object plus the URL of the next page
fn records_from_page(page: &serde_json::Value) -> (Vec<TrackRecord>, Option<String>) {
    let records = page
        .get("items")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(record_from_item).collect())
        .unwrap_or_default();

    let next = page
        .get("next")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    (records, next)
}

/// Build a record from a playlist item, or skip it when a field is missing
fn record_from_item(item: &serde_json::Value) -> Option<TrackRecord> {
    let track = item.get("track").filter(|t| !t.is_null()).unwrap_or(item);

    let name = track["name"].as_str();
    let artist = track["artists"][0]["name"]
        .as_str()
        .map(|a| if a.is_empty() { UNKNOWN_ARTIST } else { a });
    let url = track["external_urls"]["spotify"].as_str();
    let artwork = track["album"]["images"][0]["url"].as_str();

    match (name, artist, url, artwork) {
        (Some(name), Some(artist), Some(url), Some(artwork)) => {
            Some(TrackRecord::new(name, artist, url, artwork))
        }
        _ => {
            info!(
                "Skipping track {} by {} (local only?)",
                name.unwrap_or("Unknown Title"),
                artist.unwrap_or(UNKNOWN_ARTIST)
            );
            None
        }
    }
}
