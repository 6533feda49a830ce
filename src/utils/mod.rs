pub mod fs;
pub mod net;
pub mod logger;

use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Utility functions for the application
pub struct Utils;

impl Utils {
    /// Sanitize filename by removing invalid characters and replacing semicolons with commas
    pub fn sanitize_filename(filename: &str) -> String {
        let sanitized = filename
            .chars()
            .map(|c| match c {
                '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
                ';' => ',',
                c if c.is_control() => '_',
                _ => c,
            })
            .collect::<String>();

        // Leading dots would hide the file on unix
        let trimmed = sanitized.trim().trim_start_matches('.').trim();
        if trimmed.is_empty() {
            "untitled".to_string()
        } else {
            trimmed.to_string()
        }
    }

    /// Generate unique filename to avoid conflicts
    pub fn generate_unique_filename(base_path: &Path) -> PathBuf {
        if !base_path.exists() {
            return base_path.to_path_buf();
        }

        let parent = base_path.parent().unwrap_or(base_path);
        let stem = base_path.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
        let extension = base_path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut counter = 1;
        loop {
            let new_name = if extension.is_empty() {
                format!("{} ({})", stem, counter)
            } else {
                format!("{} ({}).{}", stem, counter, extension)
            };

            let new_path = parent.join(new_name);
            if !new_path.exists() {
                return new_path;
            }
            counter += 1;
        }
    }

    /// Exponential backoff with full jitter for the given zero-based attempt
    pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
        if base.is_zero() {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        let ceiling = base.saturating_mul(factor).min(max);
        let millis = ceiling.as_millis() as u64;

        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }
}
