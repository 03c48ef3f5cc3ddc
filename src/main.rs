//! vrmpet - Desktop VRM pet
//!
//! Main entry point for the CLI application.

use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vrmpet::{config::Config, ui::PetApp};

/// vrmpet - an animated VRM avatar that lives on your desktop
#[derive(Parser, Debug)]
#[command(name = "vrmpet", version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// VRM model path or URL (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Start with mouse input passing through the window
    #[arg(long)]
    click_through: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(log_level.into())
                .from_env_lossy(),
        )
        .init();

    info!("Starting {} v{}", vrmpet::NAME, vrmpet::VERSION);

    let mut config = match args.config {
        Some(ref path) => Config::from_file(path)?,
        None => Config::load()?,
    };
    if let Some(model) = args.model {
        config.avatar.model = model;
    }
    if args.click_through {
        config.window.click_through = true;
    }
    config.validate()?;

    // Rig fetching and decoding run here; the main thread stays free for the
    // window event loop (winit requirement)
    let runtime = tokio::runtime::Runtime::new()?;
    let guard = runtime.enter();

    info!("Loading avatar from {}", config.avatar.model);
    if let Err(e) = PetApp::run(config, runtime.handle().clone()) {
        error!("UI error: {}", e);
    }

    info!("Window closed, shutting down");
    drop(guard);
    runtime.shutdown_timeout(std::time::Duration::from_secs(3));
    Ok(())
}
