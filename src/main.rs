mod cli;
mod config;
mod errors;
mod store;
mod downloader;
mod utils;

use clap::Parser;
use cli::Cli;
use errors::Result;
use tracing::Level;
use utils::logger::Logger;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    Logger::init_with_level(level)?;

    cli.execute().await?;

    Ok(())
}
