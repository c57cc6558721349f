//! Rover remote CLI
//!
//! Keyboard teleoperation and one-shot commands for the arm + base rover.

use anyhow::Result;
use clap::Parser;
use rover_control::ControlConfig;
use tracing::info;

// CLI definitions
mod cli;
use cli::{Cli, Commands};

// Command handlers
mod commands;
use commands::TransportOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load config
    let config_path = cli.config.clone().unwrap_or_else(ControlConfig::default_path);
    info!("Loading config from {:?}", config_path);
    let config = ControlConfig::load(&config_path)?;

    let options = TransportOptions {
        simulate: cli.simulate,
        monitor: cli.monitor,
        hex: cli.hex,
        filter: cli.filter.as_deref(),
    };

    match cli.command {
        Commands::Drive { speed } => {
            let control = commands::open_control(&options, config).await?;
            commands::drive::run(&control, speed).await?;
        }
        Commands::Arm { axis, angle } => {
            let control = commands::open_control(&options, config).await?;
            commands::arm::set_axis(&control, axis, angle).await?;
        }
        Commands::Config { write } => {
            commands::config::show(&config, &config_path, write)?;
        }
    }

    Ok(())
}
