//! Per-session data channel.
//!
//! One handle walks through an explicit state machine instead of re-opening
//! descriptors:
//!
//! ```text
//! Created --probe()--> ProbedNonBlocking --commit_blocking()--> BlockingReady --close()--> Closed
//! ```
//!
//! Bytes only move in `BlockingReady`, so transfer never has to poll or spin.

use crate::channel::fifo::{self, Access};
use crate::error::{FifoError, Result};
use crate::identifier::Identifier;
use crate::retry::{self, RetryConfig, RetryStats};
use std::fmt;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// FIFO exists on disk, no descriptor yet
    Created,
    /// Opened with `O_NONBLOCK`; the peer may not be there yet
    ProbedNonBlocking,
    /// `O_NONBLOCK` cleared; reads and writes block until the peer acts
    BlockingReady,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Created => "created",
            ChannelState::ProbedNonBlocking => "probed-nonblocking",
            ChannelState::BlockingReady => "blocking-ready",
            ChannelState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct DataChannel {
    id: Identifier,
    path: PathBuf,
    state: ChannelState,
    access: Option<Access>,
    file: Option<File>,
}

impl DataChannel {
    /// Location of the data channel for `id` inside `dir`.
    pub fn path_for(dir: &Path, id: Identifier) -> PathBuf {
        dir.join(id.channel_name())
    }

    /// Reader side: create the FIFO named after `id`.
    pub fn create(dir: &Path, id: Identifier) -> Result<Self> {
        let path = Self::path_for(dir, id);
        let created = fifo::make_fifo(&path).map_err(|source| FifoError::ChannelCreate {
            path: path.clone(),
            source,
        })?;
        debug!(
            "Data channel {} {}",
            path.display(),
            if created { "created" } else { "already present" }
        );
        Ok(Self::at(id, path))
    }

    /// Writer side: refer to a FIFO the reader created.
    pub fn locate(dir: &Path, id: Identifier) -> Self {
        Self::at(id, Self::path_for(dir, id))
    }

    fn at(id: Identifier, path: PathBuf) -> Self {
        Self {
            id,
            path,
            state: ChannelState::Created,
            access: None,
            file: None,
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn access(&self) -> Option<Access> {
        self.access
    }

    /// Open our end without waiting for the peer.
    pub fn probe(&mut self, access: Access) -> Result<()> {
        self.expect_state(ChannelState::Created, "probe")?;
        let file = fifo::open_nonblocking(&self.path, access).map_err(|source| {
            FifoError::ChannelOpen {
                path: self.path.clone(),
                source,
            }
        })?;
        self.enter_probed(access, file);
        Ok(())
    }

    /// `probe`, retrying while the peer end is absent or the FIFO not yet created.
    pub fn probe_with_retry(&mut self, access: Access, config: &RetryConfig) -> Result<RetryStats> {
        self.expect_state(ChannelState::Created, "probe")?;
        let path = self.path.clone();
        let (result, stats) = retry::retry_blocking(
            config,
            || fifo::open_nonblocking(&path, access),
            |e| retry::is_peer_absent(e) || e.kind() == io::ErrorKind::NotFound,
        );
        let file = result.map_err(|source| FifoError::ChannelOpen {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            "Opened {} after {} attempt(s), {:?} backoff",
            self.path.display(),
            stats.attempts,
            stats.total_delay
        );
        self.enter_probed(access, file);
        Ok(stats)
    }

    fn enter_probed(&mut self, access: Access, file: File) {
        self.file = Some(file);
        self.access = Some(access);
        self.state = ChannelState::ProbedNonBlocking;
    }

    /// Switch the descriptor to blocking mode.
    pub fn commit_blocking(&mut self) -> Result<()> {
        self.expect_state(ChannelState::ProbedNonBlocking, "commit_blocking")?;
        let file = self.file.as_ref().ok_or_else(|| self.state_error("commit_blocking"))?;
        fifo::set_blocking(file).map_err(|source| FifoError::ChannelConfig {
            path: self.path.clone(),
            source,
        })?;
        self.state = ChannelState::BlockingReady;
        debug!("Data channel {} switched to blocking", self.path.display());
        Ok(())
    }

    /// Reader side: wait until the writer has connected (or connected and left).
    ///
    /// Without this a blocking read on a FIFO that has never had a writer
    /// returns end-of-stream immediately.
    pub fn await_peer(&self, timeout: Option<Duration>) -> Result<()> {
        self.expect_state(ChannelState::BlockingReady, "await_peer")?;
        if self.access != Some(Access::Read) {
            return Err(self.state_error("await_peer on a write end"));
        }
        let file = self.file.as_ref().ok_or_else(|| self.state_error("await_peer"))?;
        let ready = fifo::wait_readable(file, timeout).map_err(|source| {
            FifoError::ChannelConfig {
                path: self.path.clone(),
                source,
            }
        })?;
        match (ready, timeout) {
            (true, _) => Ok(()),
            (false, Some(after)) => Err(FifoError::Timeout {
                waiting_for: "writer to open the data channel",
                after,
            }),
            (false, None) => Err(self.state_error("await_peer")),
        }
    }

    /// Release the descriptor. Idempotent.
    pub fn close(&mut self) {
        if self.file.take().is_some() {
            debug!("Closed data channel {}", self.path.display());
        }
        self.state = ChannelState::Closed;
    }

    fn expect_state(&self, want: ChannelState, op: &str) -> Result<()> {
        if self.state == want {
            Ok(())
        } else {
            Err(self.state_error(op))
        }
    }

    fn state_error(&self, op: &str) -> FifoError {
        FifoError::ChannelConfig {
            path: self.path.clone(),
            source: io::Error::new(
                io::ErrorKind::Other,
                format!("cannot {} in state {}", op, self.state),
            ),
        }
    }

    fn ready_file(&mut self) -> io::Result<&mut File> {
        match (self.state, self.file.as_mut()) {
            (ChannelState::BlockingReady, Some(file)) => Ok(file),
            (state, _) => Err(io::Error::new(
                io::ErrorKind::Other,
                format!("data channel not ready for transfer (state {})", state),
            )),
        }
    }
}

impl Read for DataChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ready_file()?.read(buf)
    }
}

impl Write for DataChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ready_file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ready_file()?.flush()
    }
}
