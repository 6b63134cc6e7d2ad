//! Hoptix CLI entry point.

use anyhow::Result;
use clap::Parser;
use hoptix::cli::{commands, Cli, Commands};
use hoptix::config::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("hoptix={log_level}")),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(Some(&std::path::PathBuf::from(path)))?,
        None => Settings::load()?,
    };

    std::fs::create_dir_all(settings.data_dir())?;
    std::fs::create_dir_all(settings.temp_dir())?;

    match cli.command {
        Commands::Run {
            org_id,
            location_id,
            location_name,
            date,
            workers,
            source,
        } => {
            commands::run(&org_id, &location_id, &location_name, &date, workers, source, settings).await?;
        }
    }

    Ok(())
}
