// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand, ValueEnum};
use motion_visualizer::display::DistanceUnit;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "motion-visualizer")]
#[command(about = "Depth ranging readout and false-color depth field viewer")]
#[command(version = env!("GIT_VERSION"))]
#[command(subcommand_required = false)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum UnitArg {
    /// Meters
    M,
    /// Centimeters
    Cm,
}

impl From<UnitArg> for DistanceUnit {
    fn from(unit: UnitArg) -> Self {
        match unit {
            UnitArg::M => DistanceUnit::Meters,
            UnitArg::Cm => DistanceUnit::Centimeters,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive terminal viewer (default)
    Terminal,

    /// Range the synthetic scene and print the readout
    Simulate {
        /// Run duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,

        /// Reticle x in screen points (default: screen center)
        #[arg(short, long, requires = "y")]
        x: Option<f64>,

        /// Reticle y in screen points (default: screen center)
        #[arg(short, long, requires = "x")]
        y: Option<f64>,

        /// Readout unit (default: from config)
        #[arg(short, long, value_enum)]
        unit: Option<UnitArg>,
    },

    /// Save a false-color depth snapshot of the synthetic scene
    Snapshot {
        /// Output file path (default: ~/Pictures/Motion Visualizer/DEPTH_TIMESTAMP.png)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Scene time in seconds
        #[arg(short, long, default_value = "0")]
        time: f32,

        /// Integer upscale of the depth grid
        #[arg(short, long, default_value = "2")]
        scale: u32,

        /// Grayscale instead of the configured colormap
        #[arg(short, long)]
        grayscale: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=motion_visualizer=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Terminal) | None => motion_visualizer::terminal::run(),
        Some(Commands::Simulate {
            duration,
            x,
            y,
            unit,
        }) => cli::simulate(duration, x.zip(y), unit.map(DistanceUnit::from)),
        Some(Commands::Snapshot {
            output,
            time,
            scale,
            grayscale,
        }) => cli::snapshot(output, time, scale, grayscale),
    }
}
