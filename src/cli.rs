// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rover-remote")]
#[command(author, version, about = "Remote control for the BLE arm + base rover")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file path (default: ~/.config/rover-remote/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Use the in-memory simulated rover instead of Bluetooth
    #[arg(long, global = true)]
    pub simulate: bool,

    /// Print every packet written to the rover
    #[arg(long, global = true)]
    pub monitor: bool,

    /// Show raw hex alongside decoded packets (with --monitor)
    #[arg(long, global = true)]
    pub hex: bool,

    /// Only print packets for one endpoint (all, arm, base)
    #[arg(long, global = true)]
    pub filter: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drive the base from the keyboard
    ///
    /// WASD / arrows translate, Q/E rotate, Space stops, +/- change speed,
    /// Esc quits.
    #[command(visible_alias = "d")]
    Drive {
        /// Initial speed byte (command+speed firmware only)
        #[arg(short, long)]
        speed: Option<u8>,
    },

    /// Set one arm servo angle and print the resulting pose
    Arm {
        /// Axis index (0-4)
        axis: usize,
        /// Target angle in degrees; clamped to the axis limits
        angle: f64,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Also write it to the config path
        #[arg(long)]
        write: bool,
    },
}
