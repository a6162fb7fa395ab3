mod auth;
mod cli;
mod collect;
mod config;
mod error;
mod filter;
mod insights;
mod providers;
mod repo_stats;
mod report;
mod streaks;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::{info, LevelFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Everything passes the logger; the max level set below (and again once
    // the config file is read) does the filtering unless RUST_LOG is set.
    env_logger::Builder::new()
        .filter_level(LevelFilter::Trace)
        .parse_default_env()
        .init();
    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(cli.log_level().map_or(LevelFilter::Info, |l| l.to_filter()));
    }

    info!("Starting ci-streaks");
    cli.execute().await?;

    Ok(())
}
