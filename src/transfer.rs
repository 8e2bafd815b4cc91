//! Byte pump between a source, the data channel and an output sink.
//!
//! The payload is the file's bytes and nothing else: no framing, no length
//! prefix, no trailer. End of transfer is a zero-length read.

use crate::error::{FifoError, Result};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// Default staging buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Fixed-capacity staging buffer. Any positive capacity is valid.
#[derive(Debug)]
pub struct TransferBuffer {
    buf: Box<[u8]>,
}

impl TransferBuffer {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(FifoError::Config(
                "transfer buffer size must be positive".to_string(),
            ));
        }
        Ok(Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl Default for TransferBuffer {
    fn default() -> Self {
        Self {
            buf: vec![0u8; DEFAULT_BUFFER_SIZE].into_boxed_slice(),
        }
    }
}

/// Statistics for one direction of a transfer
#[derive(Debug, Default, Clone)]
pub struct TransferStats {
    /// Payload bytes moved
    pub bytes: u64,

    /// Non-empty chunks moved
    pub chunks: u64,

    /// Zero-length writes issued to signal end of stream
    pub zero_length_writes: u64,

    /// Read error that ended the reader's loop early (non-fatal)
    pub read_error: Option<io::ErrorKind>,

    pub duration: Duration,
}

impl TransferStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completed_cleanly(&self) -> bool {
        self.read_error.is_none()
    }
}

fn read_retrying<R: Read + ?Sized>(from: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match from.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn write_once<W: Write + ?Sized>(to: &mut W, buf: &[u8]) -> io::Result<usize> {
    loop {
        match to.write(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

/// Writer role: copy `source` into `channel` chunk by chunk.
///
/// Each chunk goes out in a single write of exactly the size read; anything
/// shorter is fatal. A final zero-length write marks the end.
pub fn send<R, W>(
    source: &mut R,
    channel: &mut W,
    buffer: &mut TransferBuffer,
) -> Result<TransferStats>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let start = Instant::now();
    let mut stats = TransferStats::new();

    loop {
        let n = read_retrying(source, &mut buffer.buf)
            .map_err(|e| FifoError::transfer("reading source file", e))?;
        if n == 0 {
            break;
        }

        let written = write_once(channel, &buffer.buf[..n])
            .map_err(|e| FifoError::transfer("writing to data channel", e))?;
        if written != n {
            return Err(FifoError::short_write(n, written));
        }

        stats.bytes += n as u64;
        stats.chunks += 1;
        trace!("sent chunk of {} bytes", n);
    }

    write_once(channel, &[]).map_err(|e| FifoError::transfer("signalling end of stream", e))?;
    stats.zero_length_writes += 1;
    channel
        .flush()
        .map_err(|e| FifoError::transfer("flushing data channel", e))?;

    stats.duration = start.elapsed();
    Ok(stats)
}

/// Reader role: forward everything from `channel` to `sink` until end of stream.
///
/// A failed channel read ends the loop with a warning rather than an error;
/// bytes already forwarded stay forwarded and nothing stale is re-emitted.
pub fn receive<R, W>(
    channel: &mut R,
    sink: &mut W,
    buffer: &mut TransferBuffer,
) -> Result<TransferStats>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let start = Instant::now();
    let mut stats = TransferStats::new();

    loop {
        let n = match read_retrying(channel, &mut buffer.buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!("Data channel read failed after {} bytes: {}", stats.bytes, e);
                stats.read_error = Some(e.kind());
                break;
            }
        };

        sink.write_all(&buffer.buf[..n])
            .and_then(|_| sink.flush())
            .map_err(|e| FifoError::transfer("writing output", e))?;

        stats.bytes += n as u64;
        stats.chunks += 1;
        trace!("received chunk of {} bytes", n);
    }

    stats.duration = start.elapsed();
    Ok(stats)
}
