use clap::{Args, Subcommand};
use std::path::PathBuf;

use framelink::frame::DEFAULT_CONFIDENCE;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream frames to an endpoint and print the messages it sends back.
    Send(SendArgs),
    /// Accept WebSocket peers, print received frames and acknowledge them.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// WebSocket endpoint to connect to.
    #[arg(env = "FRAMELINK_ENDPOINT")]
    pub endpoint: String,
    /// Raw string payload.
    #[arg(long, conflicts_with = "file")]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with = "data")]
    pub file: Option<PathBuf>,
    /// Number of frames to send.
    #[arg(long, default_value_t = 1)]
    pub count: usize,
    /// Delay between frames (e.g. 100ms, 1s).
    #[arg(long, default_value = "100ms")]
    pub interval: String,
    /// Confidence written into each frame header.
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE)]
    pub confidence: f64,
    /// Keep running until N inbound messages were printed.
    #[arg(long, default_value_t = 0)]
    pub wait: usize,
    /// Give up after this long (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub timeout: String,
    /// Automatic reconnect attempts before giving up.
    #[arg(long, default_value_t = 5)]
    pub retries: u32,
    /// Delay before each reconnect attempt.
    #[arg(long, default_value = "2000ms")]
    pub retry_delay: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind (e.g. 127.0.0.1:8000).
    pub addr: String,
    /// Exit after receiving N frames.
    #[arg(long)]
    pub count: Option<usize>,
    /// Exit with an error on the first malformed frame instead of skipping it.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
