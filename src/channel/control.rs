//! The shared control channel.
//!
//! One FIFO at a fixed path carries exactly one 4-byte identifier per session
//! from reader to writer. It is created on demand by whichever side runs
//! first and never removed.
//!
//! Only one session may use it at a time. Each role takes an exclusive lock
//! on its own sidecar file (`<control>.reader.lock`, `<control>.writer.lock`)
//! for the whole handshake, so a second reader cannot publish while a first
//! one is still waiting for its writer, and two writers cannot split one
//! reader's payload. Separate files per role keep the two sides of a single
//! session from locking each other out.

use crate::channel::fifo::{self, Access};
use crate::channel::Role;
use crate::error::{FifoError, Result};
use crate::identifier::{Identifier, WIRE_LEN};
use crate::retry::{self, RetryConfig};
use bytes::Bytes;
use fs2::FileExt;
use std::fs::{File, OpenOptions, Permissions};
use std::io::{self, Read, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ControlChannel {
    path: PathBuf,
}

/// Held for the duration of one side's handshake. Unlocks on drop.
#[derive(Debug)]
pub struct ControlLock {
    file: File,
    path: PathBuf,
    role: Role,
}

impl ControlLock {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ControlLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!("Failed to release {}: {}", self.path.display(), e);
        }
    }
}

impl ControlChannel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self, role: Role) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(format!(".{}.lock", role.as_str()));
        self.path.with_file_name(name)
    }

    /// Create the FIFO if it is not there yet.
    pub fn ensure(&self) -> Result<()> {
        let created = fifo::make_fifo(&self.path).map_err(|source| FifoError::ChannelCreate {
            path: self.path.clone(),
            source,
        })?;
        if created {
            debug!("Created control channel {}", self.path.display());
        }
        Ok(())
    }

    /// Take the single-session lock for `role`, waiting for any active session.
    ///
    /// With a timeout the lock is polled with backoff until it expires.
    pub fn lock(
        &self,
        role: Role,
        timeout: Option<Duration>,
        backoff: &RetryConfig,
    ) -> Result<ControlLock> {
        let path = self.lock_path(role);
        let open_err = |source: io::Error| FifoError::ChannelOpen {
            path: path.clone(),
            source,
        };
        let file = open_lock_file(&path).map_err(open_err)?;

        if let Err(e) = file.try_lock_exclusive() {
            if !is_contended(&e) {
                return Err(open_err(e));
            }
            info!(
                "Another {} session holds {}; waiting",
                role.as_str(),
                self.path.display()
            );
            match timeout {
                None => file.lock_exclusive().map_err(open_err)?,
                Some(after) => {
                    let deadline = Instant::now() + after;
                    let mut attempt = 0u32;
                    loop {
                        match file.try_lock_exclusive() {
                            Ok(()) => break,
                            Err(e) if is_contended(&e) => {
                                let now = Instant::now();
                                if now >= deadline {
                                    return Err(FifoError::Timeout {
                                        waiting_for: RELEASE_WAIT,
                                        after,
                                    });
                                }
                                let delay = backoff.calculate_delay(attempt).min(deadline - now);
                                attempt = attempt.saturating_add(1);
                                thread::sleep(delay);
                            }
                            Err(e) => return Err(open_err(e)),
                        }
                    }
                }
            }
        }

        debug!("Acquired {} lock {}", role.as_str(), path.display());
        Ok(ControlLock { file, path, role })
    }

    /// Reader side: write our identifier for the writer to pick up.
    ///
    /// With no timeout the open blocks until a writer is listening. With a
    /// timeout the open is retried non-blocking with backoff until it expires.
    pub fn publish(
        &self,
        id: Identifier,
        timeout: Option<Duration>,
        backoff: &RetryConfig,
    ) -> Result<()> {
        let mut file = match timeout {
            None => fifo::open_blocking(&self.path, Access::Write).map_err(|source| {
                FifoError::ChannelOpen {
                    path: self.path.clone(),
                    source,
                }
            })?,
            Some(after) => self.open_writer_before(Instant::now() + after, after, backoff)?,
        };

        fifo::set_blocking(&file).map_err(|source| FifoError::ChannelConfig {
            path: self.path.clone(),
            source,
        })?;

        let payload = id.encode();
        let written = loop {
            match file.write(&payload) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FifoError::transfer("writing identifier", e)),
            }
        };
        if written != payload.len() {
            return Err(FifoError::short_write(payload.len(), written));
        }

        debug!("Published identifier {} on {}", id, self.path.display());
        Ok(())
    }

    fn open_writer_before(
        &self,
        deadline: Instant,
        after: Duration,
        backoff: &RetryConfig,
    ) -> Result<File> {
        let mut attempt = 0u32;
        loop {
            match fifo::open_nonblocking(&self.path, Access::Write) {
                Ok(file) => return Ok(file),
                Err(e) if retry::is_peer_absent(&e) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(FifoError::Timeout {
                            waiting_for: "writer to open the control channel",
                            after,
                        });
                    }
                    let delay = backoff.calculate_delay(attempt).min(deadline - now);
                    attempt = attempt.saturating_add(1);
                    thread::sleep(delay);
                }
                Err(source) => {
                    return Err(FifoError::ChannelOpen {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }
    }

    /// Writer side: wait for a reader and decode its identifier.
    pub fn receive(&self, timeout: Option<Duration>) -> Result<Identifier> {
        let open_err = |source: io::Error| FifoError::ChannelOpen {
            path: self.path.clone(),
            source,
        };

        let mut file = match timeout {
            None => fifo::open_blocking(&self.path, Access::Read).map_err(open_err)?,
            Some(after) => {
                let file = fifo::open_nonblocking(&self.path, Access::Read).map_err(open_err)?;
                let ready = fifo::wait_readable(&file, Some(after)).map_err(|source| {
                    FifoError::Rendezvous {
                        reason: "waiting on control channel".to_string(),
                        source: Some(source),
                    }
                })?;
                if !ready {
                    return Err(FifoError::Timeout {
                        waiting_for: "a reader to publish its identifier",
                        after,
                    });
                }
                fifo::set_blocking(&file).map_err(|source| FifoError::ChannelConfig {
                    path: self.path.clone(),
                    source,
                })?;
                file
            }
        };

        let payload = read_payload(&mut file).map_err(|source| FifoError::Rendezvous {
            reason: "reading identifier".to_string(),
            source: Some(source),
        })?;
        let id = Identifier::decode(payload)?;
        debug!("Received identifier {} on {}", id, self.path.display());
        Ok(id)
    }
}

/// Read up to one identifier payload, stopping early at end-of-stream.
fn read_payload(file: &mut File) -> io::Result<Bytes> {
    let mut buf = [0u8; WIRE_LEN];
    let mut filled = 0;
    while filled < WIRE_LEN {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(Bytes::copy_from_slice(&buf[..filled]))
}

/// Permission bits for the per-role lock files, so any local user can take them.
pub const LOCK_MODE: u32 = 0o666;

const RELEASE_WAIT: &str = "the active session to release the control channel";

fn is_contended(err: &io::Error) -> bool {
    err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// `flock(2)` works on a read-only descriptor, so an existing lock file owned
/// by another user only needs to be readable.
fn open_lock_file(path: &Path) -> io::Result<File> {
    match OpenOptions::new().read(true).open(path) {
        Ok(file) => return Ok(file),
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        Err(_) => {}
    }

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .mode(LOCK_MODE)
        .open(path)?;
    // mode() is filtered through the umask
    if let Err(e) = file.set_permissions(Permissions::from_mode(LOCK_MODE)) {
        debug!("Could not widen permissions on {}: {}", path.display(), e);
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fast_backoff() -> RetryConfig {
        RetryConfig::new()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
    }

    #[test]
    fn test_lock_paths_differ_per_role() {
        let control = ControlChannel::new("/tmp/fifoxfer-control");
        assert_eq!(
            control.lock_path(Role::Reader),
            PathBuf::from("/tmp/fifoxfer-control.reader.lock")
        );
        assert_eq!(
            control.lock_path(Role::Writer),
            PathBuf::from("/tmp/fifoxfer-control.writer.lock")
        );
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let control = ControlChannel::new(temp.path().join("ctl"));
        control.ensure().unwrap();
        control.ensure().unwrap();
        assert!(fifo::is_fifo(control.path()).unwrap());
    }

    #[test]
    fn test_ensure_rejects_regular_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("ctl");
        std::fs::write(&path, b"").unwrap();

        assert!(matches!(
            ControlChannel::new(&path).ensure(),
            Err(FifoError::ChannelCreate { .. })
        ));
    }

    #[test]
    fn test_reader_and_writer_locks_coexist() {
        let temp = TempDir::new().unwrap();
        let control = ControlChannel::new(temp.path().join("ctl"));
        let reader = control.lock(Role::Reader, None, &fast_backoff()).unwrap();
        let writer = control.lock(Role::Writer, None, &fast_backoff()).unwrap();
        assert_eq!(reader.role(), Role::Reader);
        assert_eq!(writer.role(), Role::Writer);
    }

    #[test]
    fn test_same_role_lock_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let control = ControlChannel::new(temp.path().join("ctl"));
        let held = control.lock(Role::Reader, None, &fast_backoff()).unwrap();

        let other = OpenOptions::new()
            .write(true)
            .open(control.lock_path(Role::Reader))
            .unwrap();
        assert!(other.try_lock_exclusive().is_err());

        drop(held);
        assert!(other.try_lock_exclusive().is_ok());
    }

    #[test]
    fn test_contended_lock_times_out() {
        let temp = TempDir::new().unwrap();
        let control = ControlChannel::new(temp.path().join("ctl"));
        let _held = control.lock(Role::Writer, None, &fast_backoff()).unwrap();

        let start = Instant::now();
        let err = control
            .lock(Role::Writer, Some(Duration::from_millis(50)), &fast_backoff())
            .unwrap_err();
        assert!(matches!(err, FifoError::Timeout { .. }), "{}", err);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_lock_acquired_once_released_within_timeout() {
        let temp = TempDir::new().unwrap();
        let control = ControlChannel::new(temp.path().join("ctl"));
        let held = control.lock(Role::Reader, None, &fast_backoff()).unwrap();

        let releaser = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            drop(held);
        });
        let lock = control
            .lock(Role::Reader, Some(Duration::from_secs(5)), &fast_backoff())
            .unwrap();
        assert_eq!(lock.role(), Role::Reader);
        releaser.join().unwrap();
    }

    #[test]
    fn test_lock_file_is_world_writable() {
        let temp = TempDir::new().unwrap();
        let control = ControlChannel::new(temp.path().join("ctl"));
        let _lock = control.lock(Role::Reader, None, &fast_backoff()).unwrap();

        let mode = std::fs::metadata(control.lock_path(Role::Reader))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, LOCK_MODE);
    }

    #[test]
    fn test_read_only_lock_file_can_be_locked() {
        let temp = TempDir::new().unwrap();
        let control = ControlChannel::new(temp.path().join("ctl"));
        let path = control.lock_path(Role::Writer);
        std::fs::write(&path, b"").unwrap();
        std::fs::set_permissions(&path, Permissions::from_mode(0o444)).unwrap();

        let lock = control.lock(Role::Writer, None, &fast_backoff()).unwrap();
        assert_eq!(lock.path(), path);
    }

    #[test]
    fn test_publish_times_out_without_writer() {
        let temp = TempDir::new().unwrap();
        let control = ControlChannel::new(temp.path().join("ctl"));
        control.ensure().unwrap();

        let id = Identifier::new(77).unwrap();
        let err = control
            .publish(id, Some(Duration::from_millis(30)), &fast_backoff())
            .unwrap_err();
        assert!(matches!(err, FifoError::Timeout { .. }));
    }

    #[test]
    fn test_receive_times_out_without_reader() {
        let temp = TempDir::new().unwrap();
        let control = ControlChannel::new(temp.path().join("ctl"));
        control.ensure().unwrap();

        let err = control.receive(Some(Duration::from_millis(30))).unwrap_err();
        assert!(matches!(err, FifoError::Timeout { .. }));
    }

    #[test]
    fn test_publish_then_receive() {
        let temp = TempDir::new().unwrap();
        let control = ControlChannel::new(temp.path().join("ctl"));
        control.ensure().unwrap();

        let writer_side = control.clone();
        let handle = thread::spawn(move || writer_side.receive(Some(Duration::from_secs(5))));

        let id = Identifier::new(4242).unwrap();
        control
            .publish(id, Some(Duration::from_secs(5)), &fast_backoff())
            .unwrap();

        assert_eq!(handle.join().unwrap().unwrap(), id);
    }

    #[test]
    fn test_receive_short_payload_is_rendezvous_error() {
        let temp = TempDir::new().unwrap();
        let control = ControlChannel::new(temp.path().join("ctl"));
        control.ensure().unwrap();

        let writer_side = control.clone();
        let handle = thread::spawn(move || writer_side.receive(Some(Duration::from_secs(5))));

        let mut file = loop {
            match fifo::open_nonblocking(control.path(), Access::Write) {
                Ok(file) => break file,
                Err(_) => thread::sleep(Duration::from_millis(1)),
            }
        };
        file.write_all(&[1, 0]).unwrap();
        drop(file);

        assert!(matches!(
            handle.join().unwrap(),
            Err(FifoError::Rendezvous { .. })
        ));
    }
}
