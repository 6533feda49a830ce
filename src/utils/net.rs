use crate::errors::{Result, SpotifyToMp3Error};
use reqwest::Client;
use std::time::Duration;

const USER_AGENT: &str = "spotify-to-mp3/0.1";

/// Network utilities
pub struct NetworkUtils;

impl NetworkUtils {
    /// Build the shared HTTP client with a per-request timeout
    pub fn client_with_timeout(timeout: Duration) -> Result<Client> {
        Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(USER_AGENT)
            .build()
            .map_err(SpotifyToMp3Error::Network)
    }

    /// Download a URL fully into memory
    pub async fn download_bytes(client: &Client, url: &str) -> Result<Vec<u8>> {
        let response = client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpotifyToMp3Error::Transfer(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }
}
