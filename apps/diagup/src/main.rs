//! diagup entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "diagup", version)]
#[command(about = "Uploads a diagnostic bundle to an upload endpoint, resuming interrupted uploads")]
struct Cli {
    /// Bundle file to upload.
    bundle: PathBuf,

    /// Configuration file, created with defaults if missing.
    #[arg(long, env = "DIAGUP_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bundle = %cli.bundle.display(),
        "starting diagup"
    );

    // Load configuration.
    let config_path = cli.config.unwrap_or_else(config::default_path);
    let config = config::Config::load_from(&config_path)?;
    tracing::info!(
        path = %config_path.display(),
        endpoint_dir = %config.endpoint_dir,
        block_size = config.block_size,
        concurrency = config.concurrency,
        "configuration loaded"
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(app::run(config, &cli.bundle))?;

    tracing::info!(
        upload_id = %result.upload_id,
        path = %result.remote_path,
        sent_blocks = result.summary.sent_blocks,
        skipped_blocks = result.summary.skipped_blocks,
        "done"
    );
    Ok(())
}
