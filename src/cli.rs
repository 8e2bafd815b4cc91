use crate::config::Overrides;
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fifoxfer")]
#[command(version, about = "Send a file to another local process over named pipes")]
#[command(long_about = "Send a file to another local process over named pipes.

Start `fifoxfer reader` in one terminal and `fifoxfer writer FILE` in another,
in either order. The two find each other through a shared control FIFO; the
file's bytes then flow through a private FIFO named after the reader's process
id and appear on the reader's standard output.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file (default: $XDG_CONFIG_HOME/fifoxfer/config.toml if present)
    #[arg(long, global = true, env = "FIFOXFER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path of the shared control FIFO
    #[arg(long, global = true, env = "FIFOXFER_CONTROL")]
    pub control: Option<PathBuf>,

    /// Directory for per-session data FIFOs
    #[arg(long, global = true, env = "FIFOXFER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Transfer buffer size in bytes
    #[arg(short, long, global = true, env = "FIFOXFER_BUFFER_SIZE")]
    pub buffer_size: Option<usize>,

    /// Give up waiting on the control channel after this many milliseconds
    #[arg(long, global = true, env = "FIFOXFER_CONTROL_TIMEOUT_MS")]
    pub control_timeout_ms: Option<u64>,

    /// Reader: give up waiting for the writer to connect after this many milliseconds
    #[arg(long, global = true, env = "FIFOXFER_PEER_TIMEOUT_MS")]
    pub peer_timeout_ms: Option<u64>,

    /// Writer: attempts to open the data channel before giving up
    #[arg(long, global = true)]
    pub open_attempts: Option<u32>,

    /// More logging (-v debug, -vv trace). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Publish this process's id and print whatever the writer sends
    Reader,

    /// Send FILE to the waiting reader
    Writer {
        /// File to transfer
        file: PathBuf,
    },
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            control_path: self.control.clone(),
            data_dir: self.data_dir.clone(),
            buffer_size: self.buffer_size,
            control_timeout_ms: self.control_timeout_ms,
            peer_timeout_ms: self.peer_timeout_ms,
            open_attempts: self.open_attempts,
        }
    }

    /// Default `tracing` filter when RUST_LOG is unset
    pub fn log_filter(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
