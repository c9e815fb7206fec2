//! CLI argument definitions.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "confab",
    about = "Dual-channel meeting recorder: mic + system audio, chunked durable storage",
    version
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand)]
pub enum CliCommand {
    /// Record a session (default command)
    Record(RecordArgs),
    /// List capture devices for the selected backend
    Devices,
    /// Inspect finished sessions
    Sessions(SessionsArgs),
    /// Print version information
    Version,
}

#[derive(Args, Default)]
pub struct RecordArgs {
    /// Session name shown in listings
    #[arg(long)]
    pub title: Option<String>,

    /// Stop automatically after this many seconds (default: run until
    /// Ctrl-C)
    #[arg(long)]
    pub duration: Option<f64>,

    /// Produce a combined mic+system track (overrides CONFAB_MIX_DOWN)
    #[arg(long)]
    pub mix: Option<bool>,

    /// Audio backend: cpal, ffmpeg, or synthetic
    #[arg(long)]
    pub backend: Option<String>,

    /// Device spec for the mic channel
    #[arg(long)]
    pub mic_device: Option<String>,

    /// Device spec for the system channel
    #[arg(long)]
    pub system_device: Option<String>,

    /// Target chunk duration in seconds
    #[arg(long)]
    pub chunk_seconds: Option<f64>,
}

#[derive(Args)]
pub struct SessionsArgs {
    #[command(subcommand)]
    pub command: SessionsCommand,
}

#[derive(Subcommand)]
pub enum SessionsCommand {
    /// List recent sessions
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show one session's full summary
    Show { id: String },
}
