//! Process-level session drivers for the two roles.
//!
//! The protocol itself is blocking system calls, so each session runs on a
//! blocking thread while the async side watches for termination signals and
//! owns cleanup of the reader's data channel.

use crate::channel::{DataChannel, FifoGuard};
use crate::config::Config;
use crate::error::{FifoError, Result};
use crate::identifier::Identifier;
use crate::rendezvous::{reader_rendezvous, writer_rendezvous};
use crate::transfer::{self, TransferStats};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Reader role, blocking: rendezvous as `id`, then copy everything to `sink`.
///
/// Does not remove the data channel; see [`receive_to`].
pub fn receive_with(
    config: &Config,
    id: Identifier,
    sink: &mut dyn Write,
) -> Result<TransferStats> {
    let mut buffer = config.transfer_buffer()?;
    let mut session = reader_rendezvous(config, id)?;

    let stats = transfer::receive(&mut session.channel, sink, &mut buffer)?;
    session.channel.close();
    Ok(stats)
}

/// Reader role, blocking, with the data channel removed on every exit path.
pub fn receive_to(
    config: &Config,
    id: Identifier,
    sink: &mut dyn Write,
) -> Result<TransferStats> {
    let guard = FifoGuard::new(DataChannel::path_for(&config.data_dir, id));
    let stats = receive_with(config, id, sink)?;
    if let Err(e) = guard.remove() {
        warn!("Failed to remove data channel: {}", e);
    }
    Ok(stats)
}

/// Writer role, blocking: rendezvous, then stream `source` into the data channel.
pub fn send_from(config: &Config, source: &mut File) -> Result<TransferStats> {
    let mut buffer = config.transfer_buffer()?;
    let mut session = writer_rendezvous(config)?;

    let stats = transfer::send(source, &mut session.channel, &mut buffer)?;
    session.channel.close();
    Ok(stats)
}

/// Open the file to send. Done before any channel is touched so a bad path
/// fails without involving a reader.
pub fn open_source(path: &Path) -> Result<File> {
    File::open(path).map_err(|source| FifoError::SourceOpen {
        path: path.to_path_buf(),
        source,
    })
}

fn task_failed(role: &str, err: JoinError) -> FifoError {
    FifoError::Transfer {
        reason: format!("{} task failed: {}", role, err),
        source: None,
    }
}

/// Resolves with the name of the first termination signal received.
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}

/// Run the reader role for this process, writing received bytes to `sink`.
pub async fn run_reader<W>(config: Config, sink: W) -> Result<TransferStats>
where
    W: Write + Send + 'static,
{
    let id = Identifier::current()?;
    let guard = FifoGuard::new(DataChannel::path_for(&config.data_dir, id));
    info!("reader: data channel {}", guard.path().display());

    let task = tokio::task::spawn_blocking(move || {
        let mut sink = sink;
        receive_with(&config, id, &mut sink)
    });

    let outcome = tokio::select! {
        joined = task => joined.map_err(|e| task_failed("reader", e)).and_then(|r| r),
        signal = shutdown_signal() => {
            warn!("reader: {} received, abandoning session", signal);
            Err(FifoError::Interrupted { signal })
        }
    };

    if let Err(e) = guard.remove() {
        warn!("Failed to remove data channel: {}", e);
    }

    let stats = outcome?;
    info!(
        "reader: received {} bytes in {} chunks ({:?})",
        stats.bytes, stats.chunks, stats.duration
    );
    Ok(stats)
}

/// Run the writer role for this process, sending the file at `source`.
pub async fn run_writer(config: Config, source: &Path) -> Result<TransferStats> {
    let mut file = open_source(source)?;
    debug!("writer: file name {}", source.display());

    let stats = tokio::task::spawn_blocking(move || send_from(&config, &mut file))
        .await
        .map_err(|e| task_failed("writer", e))??;

    info!(
        "writer: sent {} bytes in {} chunks ({:?})",
        stats.bytes, stats.chunks, stats.duration
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::TempDir;

    fn test_config(temp: &TempDir) -> Config {
        Config {
            control_path: temp.path().join("ctl"),
            data_dir: temp.path().to_path_buf(),
            buffer_size: 5,
            control_timeout_ms: Some(5_000),
            peer_timeout_ms: Some(5_000),
            ..Config::default()
        }
    }

    #[test]
    fn test_open_source_missing() {
        let temp = TempDir::new().unwrap();
        let err = open_source(&temp.path().join("missing.txt")).unwrap_err();
        assert!(matches!(err, FifoError::SourceOpen { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_blocking_roundtrip_removes_channel() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let source_path = temp.path().join("source.txt");
        std::fs::write(&source_path, b"hello world").unwrap();

        let writer_config = config.clone();
        let writer = thread::spawn(move || {
            let mut file = open_source(&source_path)?;
            send_from(&writer_config, &mut file)
        });

        let id = Identifier::new(11_235).unwrap();
        let mut out = Vec::new();
        let stats = receive_to(&config, id, &mut out).unwrap();

        assert_eq!(out, b"hello world");
        assert_eq!(stats.bytes, 11);
        assert!(stats.completed_cleanly());
        assert!(!DataChannel::path_for(&config.data_dir, id).exists());

        let sent = writer.join().unwrap().unwrap();
        assert_eq!(sent.chunks, 3);
        assert_eq!(sent.zero_length_writes, 1);
    }

    #[tokio::test]
    async fn test_run_writer_missing_source_touches_nothing() {
        let temp = TempDir::new().unwrap();
        let config = test_config(&temp);
        let control = config.control_path.clone();

        let err = run_writer(config, &temp.path().join("nope.bin"))
            .await
            .unwrap_err();

        assert!(matches!(err, FifoError::SourceOpen { .. }));
        assert!(!control.exists());
    }
}
