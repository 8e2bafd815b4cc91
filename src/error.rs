//! Error taxonomy for the rendezvous and transfer protocol.
//!
//! Every variant is fatal for the session that hits it. The single non-fatal
//! condition (a failed read at the tail of the reader's loop) never becomes a
//! `FifoError`; it is logged and recorded in `TransferStats` instead.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FifoError>;

#[derive(Debug, Error)]
pub enum FifoError {
    /// The process identity cannot be turned into a channel name.
    #[error("cannot derive a channel name from process id {raw}")]
    Naming { raw: i64 },

    #[error("failed to create channel {}: {source}", .path.display())]
    ChannelCreate {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to open channel {}: {source}", .path.display())]
    ChannelOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Mode switch failed, or an operation was attempted in the wrong channel state.
    #[error("failed to configure channel {}: {source}", .path.display())]
    ChannelConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Malformed or short identifier payload on the control channel.
    #[error("rendezvous failed: {reason}{}", os_detail(.source))]
    Rendezvous {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("failed to open source file {}: {source}", .path.display())]
    SourceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Short or failed read/write while streaming.
    #[error("transfer failed: {reason}{}", os_detail(.source))]
    Transfer {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("timed out after {after:?} waiting for {waiting_for}")]
    Timeout {
        waiting_for: &'static str,
        after: Duration,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("interrupted by {signal}")]
    Interrupted { signal: &'static str },
}

fn os_detail(source: &Option<io::Error>) -> String {
    match source {
        Some(e) => format!(": {}", e),
        None => String::new(),
    }
}

impl FifoError {
    pub fn rendezvous(reason: impl Into<String>) -> Self {
        FifoError::Rendezvous {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn transfer(reason: impl Into<String>, source: io::Error) -> Self {
        FifoError::Transfer {
            reason: reason.into(),
            source: Some(source),
        }
    }

    pub fn short_write(expected: usize, written: usize) -> Self {
        FifoError::Transfer {
            reason: format!("short write: {} of {} bytes", written, expected),
            source: None,
        }
    }

    /// Underlying OS error, when the failure came from a system call.
    pub fn os_error(&self) -> Option<&io::Error> {
        match self {
            FifoError::ChannelCreate { source, .. }
            | FifoError::ChannelOpen { source, .. }
            | FifoError::ChannelConfig { source, .. }
            | FifoError::SourceOpen { source, .. } => Some(source),
            FifoError::Rendezvous { source, .. } | FifoError::Transfer { source, .. } => {
                source.as_ref()
            }
            _ => None,
        }
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            FifoError::Config(_) => 2,
            FifoError::Interrupted { .. } => 130,
            _ => 1,
        }
    }
}
