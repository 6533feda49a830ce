use crate::errors::{Result, SpotifyToMp3Error};
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Logger utility for the application
pub struct Logger;

impl Logger {
    /// Initialize the logger with specified level; `RUST_LOG` still wins when set
    pub fn init_with_level(level: Level) -> Result<()> {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .try_init()
            .map_err(|e| SpotifyToMp3Error::Config(format!("Failed to initialize logger: {}", e)))
    }
}
