//! Control server: accepts local writers on a Unix socket and forwards
//! their records to the event loop.
//!
//! Records from one client arrive in the order they were written. Clients
//! are independent of each other; a malformed record is logged and skipped
//! without dropping the client. A record that overflows its fixed size
//! leaves the stream unaligned, so that client is disconnected.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use irccd_config::AppConfig;

use super::record::{ControlCodec, ControlRecord, RecordError};
use crate::daemon::ShutdownSignal;

/// Default Unix socket path for the control channel.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/irccd.socket";

/// Start the control server on `socket_path`.
///
/// Removes any stale socket file before binding and removes it again on
/// shutdown. Runs until a shutdown signal arrives or the event loop drops
/// its receiver.
pub async fn serve(
    socket_path: &Path,
    record_size: usize,
    records: mpsc::Sender<ControlRecord>,
    mut shutdown_rx: broadcast::Receiver<ShutdownSignal>,
) -> Result<(), std::io::Error> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }

    let listener = UnixListener::bind(socket_path)?;
    info!(path = %socket_path.display(), record_size, "control channel listening");

    let mut client_id: u64 = 0;
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("control channel shutting down");
                break;
            }
            _ = records.closed() => {
                debug!("event loop gone; control channel closing");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    client_id += 1;
                    tokio::spawn(handle_client(client_id, stream, record_size, records.clone()));
                }
                Err(e) => warn!(error = %e, "control accept failed"),
            },
        }
    }

    std::fs::remove_file(socket_path).ok();
    Ok(())
}

/// Decode one client's stream until it hangs up.
async fn handle_client(
    client: u64,
    stream: UnixStream,
    record_size: usize,
    records: mpsc::Sender<ControlRecord>,
) {
    debug!(client, "control client connected");
    let mut framed = FramedRead::new(stream, ControlCodec::new(record_size));

    while let Some(item) = framed.next().await {
        match item {
            Ok(Ok(record)) => {
                debug!(client, code = %char::from(record.code), "control record");
                if records.send(record).await.is_err() {
                    return;
                }
            }
            Ok(Err(e @ RecordError::Unterminated { .. })) => {
                warn!(client, error = %e, "control record overflowed; dropping client");
                break;
            }
            Ok(Err(e)) => warn!(client, error = %e, "rejected control record"),
            Err(e) => {
                warn!(client, error = %e, "control client read failed");
                break;
            }
        }
    }
    debug!(client, "control client disconnected");
}

/// Resolve the socket path from config.
pub fn socket_path_from_config(config: &AppConfig) -> PathBuf {
    if config.control.socket_path.is_empty() {
        PathBuf::from(DEFAULT_SOCKET_PATH)
    } else {
        PathBuf::from(&config.control.socket_path)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::control::record::Action;
    use pretty_assertions::assert_eq;

    async fn wait_for_socket(path: &Path) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !path.exists() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_socket_path_from_config() {
        let mut config = AppConfig::default();
        assert_eq!(socket_path_from_config(&config), PathBuf::from(DEFAULT_SOCKET_PATH));
        config.control.socket_path = "/run/user/1000/irccd.socket".to_string();
        assert_eq!(
            socket_path_from_config(&config),
            PathBuf::from("/run/user/1000/irccd.socket")
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_records_are_forwarded_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.socket");
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let server = tokio::spawn({
            let path = path.clone();
            async move { serve(&path, 16, tx, shutdown_rx).await }
        });
        wait_for_socket(&path).await;

        let mut client = UnixStream::connect(&path).await.unwrap();
        for record in [
            ControlRecord::new(Action::Join, "#a"),
            ControlRecord::new(Action::Write, "hi"),
        ] {
            client.write_all(&record.encode(16).unwrap()).await.unwrap();
        }
        // Malformed: data after the padding. Skipped, the stream continues.
        client.write_all(b"J#b\0\0\0\0\0\0\0\0\0\0\0\0x").await.unwrap();
        client.write_all(b"Q").await.unwrap();
        drop(client);

        assert_eq!(rx.recv().await.unwrap(), ControlRecord::new(Action::Join, "#a"));
        assert_eq!(rx.recv().await.unwrap(), ControlRecord::new(Action::Write, "hi"));
        assert_eq!(rx.recv().await.unwrap(), ControlRecord::new(Action::Quit, ""));

        shutdown_tx.send(ShutdownSignal).unwrap();
        server.await.unwrap().unwrap();
        assert!(!path.exists());
    }

    #[test_log::test(tokio::test)]
    async fn test_overflowing_record_drops_client_without_forwarding() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.socket");
        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let server = tokio::spawn({
            let path = path.clone();
            async move { serve(&path, 4096, tx, shutdown_rx).await }
        });
        wait_for_socket(&path).await;

        // A 4095-byte message with no padding, followed by text that would
        // otherwise decode as a Quit record.
        let mut client = UnixStream::connect(&path).await.unwrap();
        let mut raw = b"W".to_vec();
        raw.extend(std::iter::repeat_n(b'a', 4095));
        raw.extend_from_slice(b"Quit-me-now\n");
        client.write_all(&raw).await.unwrap();

        let mut rest = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), client.read_to_end(&mut rest))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(rx.try_recv().is_err());

        // Other clients are unaffected.
        let mut other = UnixStream::connect(&path).await.unwrap();
        other.write_all(b"L\n").await.unwrap();
        drop(other);
        assert_eq!(rx.recv().await.unwrap(), ControlRecord::new(Action::List, ""));

        shutdown_tx.send(ShutdownSignal).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctl.socket");
        std::fs::write(&path, b"stale").unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let server = tokio::spawn({
            let path = path.clone();
            async move { serve(&path, 4096, tx, shutdown_rx).await }
        });

        // Connecting only succeeds once the real socket is bound.
        let mut client = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(c) = UnixStream::connect(&path).await {
                    break c;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        client.write_all(b"L\n").await.unwrap();
        drop(client);

        assert_eq!(rx.recv().await.unwrap(), ControlRecord::new(Action::List, ""));
        shutdown_tx.send(ShutdownSignal).unwrap();
        server.await.unwrap().unwrap();
    }
}
