//! Thin wrappers over the FIFO system calls the protocol depends on.

use std::ffi::CString;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::{Duration, Instant};

/// Permission bits for every FIFO this crate creates (subject to umask)
pub const FIFO_MODE: libc::mode_t = 0o666;

/// Which end of a FIFO to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Create a FIFO at `path`. Returns `Ok(false)` if a FIFO already exists there.
///
/// An existing entry that is not a FIFO is reported as `AlreadyExists`.
pub fn make_fifo(path: &Path) -> io::Result<bool> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), FIFO_MODE) };
    if rc == 0 {
        return Ok(true);
    }

    let err = io::Error::last_os_error();
    if err.raw_os_error() != Some(libc::EEXIST) {
        return Err(err);
    }

    if is_fifo(path)? {
        Ok(false)
    } else {
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a FIFO", path.display()),
        ))
    }
}

pub fn is_fifo(path: &Path) -> io::Result<bool> {
    Ok(fs::symlink_metadata(path)?.file_type().is_fifo())
}

/// Open one end of a FIFO without blocking on the peer.
///
/// A read end opens immediately. A write end fails with `ENXIO` while no
/// reader holds the FIFO open.
pub fn open_nonblocking(path: &Path, access: Access) -> io::Result<File> {
    let mut options = OpenOptions::new();
    match access {
        Access::Read => options.read(true),
        Access::Write => options.write(true),
    };
    options.custom_flags(libc::O_NONBLOCK).open(path)
}

/// Open one end of a FIFO, waiting for the peer as `open(2)` does by default.
pub fn open_blocking(path: &Path, access: Access) -> io::Result<File> {
    let mut options = OpenOptions::new();
    match access {
        Access::Read => options.read(true),
        Access::Write => options.write(true),
    };
    options.open(path)
}

fn get_flags(file: &File) -> io::Result<libc::c_int> {
    // SAFETY: the descriptor is owned by `file` and stays open for the call
    let flags = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETFL) };
    if flags == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(flags)
}

pub fn is_nonblocking(file: &File) -> io::Result<bool> {
    Ok(get_flags(file)? & libc::O_NONBLOCK != 0)
}

/// Clear `O_NONBLOCK` on an open descriptor.
pub fn set_blocking(file: &File) -> io::Result<()> {
    let flags = get_flags(file)?;
    if flags & libc::O_NONBLOCK == 0 {
        return Ok(());
    }
    // SAFETY: as above
    let rc = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETFL, flags & !libc::O_NONBLOCK) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Wait until a read end has data or its writer hung up.
///
/// Returns `Ok(false)` when `timeout` elapses first; `None` waits forever.
/// A read end that has never seen a writer reports neither event on Linux,
/// so this is how a reader waits for its peer to connect.
pub fn wait_readable(file: &File, timeout: Option<Duration>) -> io::Result<bool> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut pfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };

    loop {
        let timeout_ms: libc::c_int = match deadline {
            None => -1,
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                left.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
            }
        };

        pfd.revents = 0;
        // SAFETY: pfd points to one valid pollfd for the duration of the call
        let rc = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        match rc {
            -1 => {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            0 => return Ok(false),
            _ if pfd.revents & libc::POLLNVAL != 0 => {
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            _ => return Ok(true),
        }
    }
}
