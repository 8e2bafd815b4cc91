//! Rendezvous: two unrelated processes find each other through the
//! filesystem and end up holding the two ends of a private data channel.
//!
//! Reader                                  | Writer
//! ----------------------------------------|-----------------------------------------
//! create data FIFO `<dir>/<id>`, control  | create control (either side may be first)
//! lock control (reader role)              | lock control (writer role)
//! open data for reading, non-blocking     | open control for reading, wait for a reader
//! write 4-byte id on control              | read 4-byte id
//! switch data to blocking                 | open data for writing, non-blocking, with backoff
//! wait until the writer has connected     | switch data to blocking
//!
//! Both data opens are non-blocking because a plain `open(2)` on a FIFO waits
//! for the other end, and at that point the other end may not exist yet.

use crate::channel::{Access, ControlLock, DataChannel, Role};
use crate::config::Config;
use crate::error::Result;
use crate::identifier::Identifier;
use tracing::debug;

/// Reader's end of an established session.
///
/// The data channel's filesystem entry is not removed by this type; pair it
/// with a `FifoGuard` on `DataChannel::path_for(dir, id)`.
#[derive(Debug)]
pub struct ReaderSession {
    pub channel: DataChannel,
    _lock: ControlLock,
}

impl ReaderSession {
    pub fn id(&self) -> Identifier {
        self.channel.id()
    }
}

/// Writer's end of an established session.
#[derive(Debug)]
pub struct WriterSession {
    pub channel: DataChannel,
    _lock: ControlLock,
}

impl WriterSession {
    pub fn id(&self) -> Identifier {
        self.channel.id()
    }
}

pub fn reader_rendezvous(config: &Config, id: Identifier) -> Result<ReaderSession> {
    let control = config.control_channel();

    let mut channel = DataChannel::create(&config.data_dir, id)?;
    control.ensure()?;
    let lock = control.lock(
        Role::Reader,
        config.control_timeout(),
        &config.open_retry,
    )?;

    // Read end first, so the writer's non-blocking write-open can succeed
    // as soon as it learns our name.
    channel.probe(Access::Read)?;
    debug!("reader: will read from {}", channel.path().display());

    control.publish(id, config.control_timeout(), &config.open_retry)?;

    channel.commit_blocking()?;
    channel.await_peer(config.peer_timeout())?;
    debug!("reader: writer connected to {}", channel.path().display());

    Ok(ReaderSession {
        channel,
        _lock: lock,
    })
}

pub fn writer_rendezvous(config: &Config) -> Result<WriterSession> {
    let control = config.control_channel();

    control.ensure()?;
    let lock = control.lock(
        Role::Writer,
        config.control_timeout(),
        &config.open_retry,
    )?;

    let id = control.receive(config.control_timeout())?;
    debug!("writer: data channel name {}", id.channel_name());

    let mut channel = DataChannel::locate(&config.data_dir, id);
    channel.probe_with_retry(Access::Write, &config.open_retry)?;
    channel.commit_blocking()?;

    Ok(WriterSession {
        channel,
        _lock: lock,
    })
}
