use crate::downloader::{Candidate, MediaBackend, SearchBackend, TranscodeSpec};
use crate::errors::{Result, SpotifyToMp3Error};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

const DEFAULT_SOCKET_TIMEOUT_SECS: u32 = 30;

/// YouTube search and audio download using yt-dlp
pub struct YtDlpBackend {
    executable_path: String,
    socket_timeout: u32,
}

impl YtDlpBackend {
    /// Create a backend driving the given yt-dlp executable
    pub fn new(executable_path: impl Into<String>) -> Self {
        Self {
            executable_path: executable_path.into(),
            socket_timeout: DEFAULT_SOCKET_TIMEOUT_SECS,
        }
    }

    /// Installed yt-dlp version, or an error if it cannot be run
    pub async fn version(&self) -> Result<String> {
        let output = self.run(&["--version".to_string()]).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn search_args(&self, query: &str, max_results: u32) -> Vec<String> {
        vec![
            format!("ytsearch{}:{}", max_results.max(1), query),
            "--flat-playlist".to_string(),
            "--dump-json".to_string(),
            "--quiet".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout.to_string(),
        ]
    }

    fn download_args(&self, locator: &str, staging_dir: &Path, spec: &TranscodeSpec) -> Vec<String> {
        let mut args = vec![
            locator.to_string(),
            "-f".to_string(),
            "bestaudio/best".to_string(),
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            spec.format.to_string(),
        ];

        // Lossless targets ignore a bitrate
        if !spec.format.is_lossless() {
            args.push("--audio-quality".to_string());
            args.push(format!("{}K", spec.bitrate.as_u32()));
        }

        if spec.embed_metadata {
            args.push("--embed-metadata".to_string());
        }

        args.extend([
            "--output".to_string(),
            format!("{}/%(title)s.%(ext)s", staging_dir.display()),
            "--print".to_string(),
            "after_move:filepath".to_string(),
            "--no-simulate".to_string(),
            "--no-playlist".to_string(),
            "--quiet".to_string(),
            "--no-warnings".to_string(),
            "--socket-timeout".to_string(),
            self.socket_timeout.to_string(),
        ]);

        args
    }

    /// Run yt-dlp to completion; the child is killed if this future is dropped
    async fn run(&self, args: &[String]) -> Result<Output> {
        debug!("Running {} {}", self.executable_path, args.join(" "));

        let output = AsyncCommand::new(&self.executable_path)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SpotifyToMp3Error::YtDlp(format!("Failed to execute yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SpotifyToMp3Error::YtDlp(format!(
                "yt-dlp exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(output)
    }
}

impl Default for YtDlpBackend {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl SearchBackend for YtDlpBackend {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<Candidate>> {
        let output = self.run(&self.search_args(query, max_results)).await?;
        Ok(parse_search_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl MediaBackend for YtDlpBackend {
    async fn fetch(&self, locator: &str, staging_dir: &Path, spec: &TranscodeSpec) -> Result<PathBuf> {
        let output = self.run(&self.download_args(locator, staging_dir, spec)).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        let produced = parse_printed_path(&stdout).ok_or_else(|| {
            SpotifyToMp3Error::YtDlp(format!("yt-dlp did not report an output file for {}", locator))
        })?;

        Ok(if produced.is_absolute() {
            produced
        } else {
            staging_dir.join(produced)
        })
    }
}

/// One JSON object per line, as emitted by `--dump-json`
fn parse_search_output(stdout: &str) -> Vec<Candidate> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match serde_json::from_str::<serde_json::Value>(line) {
            Ok(json_value) => candidate_from_json(&json_value),
            Err(e) => {
                warn!("Ignoring unparsable yt-dlp line: {}", e);
                None
            }
        })
        .collect()
}

fn candidate_from_json(json_value: &serde_json::Value) -> Option<Candidate> {
    let field = |name: &str| {
        json_value
            .get(name)
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    };

    let path = field("webpage_url")
        .or_else(|| field("url"))
        .or_else(|| field("id").map(|id| format!("/watch?v={}", id)))?;

    Some(Candidate {
        title: field("title").unwrap_or_else(|| "Unknown Title".to_string()),
        path,
    })
}

/// Last non-empty line of `--print after_move:filepath` output
fn parse_printed_path(stdout: &str) -> Option<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(PathBuf::from)
}
