// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use depthcloud::{BackendPreference, OcclusionMode};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "depthcloud")]
#[command(about = "Depth frame to point cloud reprojection")]
#[command(version = env!("GIT_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List reprojection backends usable on this machine
    Backends {
        /// Also try to open a GPU compute device
        #[arg(long)]
        probe_gpu: bool,
    },

    /// Convert a raw 16-bit depth file to a LAS point cloud
    Process {
        /// Raw native-endian u16 depth samples, row-major
        input: PathBuf,

        /// Output LAS file
        #[arg(short, long)]
        output: PathBuf,

        #[arg(long)]
        width: u32,

        #[arg(long)]
        height: u32,

        /// Meters per depth unit
        #[arg(long, default_value = "0.001")]
        depth_scale: f32,

        #[command(flatten)]
        camera: cli::CameraArgs,

        #[command(flatten)]
        processing: cli::ProcessingArgs,
    },

    /// Run a synthetic two-plane scene and report occlusion statistics
    Demo {
        #[arg(long, default_value = "640")]
        width: u32,

        #[arg(long, default_value = "480")]
        height: u32,

        /// Depth-to-color baseline in meters along X
        #[arg(long, default_value = "0.05", allow_hyphen_values = true)]
        baseline: f32,

        /// Write the result to this LAS file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Occlusion mode (off, heuristic, exhaustive)
        #[arg(long)]
        occlusion: Option<OcclusionMode>,

        /// Backend (auto, generic, sse, neon, gpu)
        #[arg(long)]
        backend: Option<BackendPreference>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=depthcloud=debug, RUST_LOG=info
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
        Commands::Backends { probe_gpu } => cli::list_backends(probe_gpu),
        Commands::Process {
            input,
            output,
            width,
            height,
            depth_scale,
            camera,
            processing,
        } => cli::process_file(
            &input,
            &output,
            width,
            height,
            depth_scale,
            &camera,
            &processing,
        ),
        Commands::Demo {
            width,
            height,
            baseline,
            output,
            occlusion,
            backend,
        } => cli::run_demo(width, height, baseline, output.as_deref(), occlusion, backend),
    }
}
