//! Control client: writes records to a running daemon's control socket.

use std::path::PathBuf;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

use super::record::{ControlRecord, RecordError};

/// Errors from the control client.
#[derive(Debug, thiserror::Error)]
pub enum ControlClientError {
    #[error("daemon is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("failed to connect to daemon socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid control record: {0}")]
    Record(#[from] RecordError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client for the daemon's control socket.
pub struct ControlClient {
    socket_path: PathBuf,
    record_size: usize,
}

impl ControlClient {
    pub fn new(socket_path: impl Into<PathBuf>, record_size: usize) -> Self {
        Self {
            socket_path: socket_path.into(),
            record_size,
        }
    }

    /// Check if the daemon socket exists (daemon is likely running).
    pub fn daemon_available(&self) -> bool {
        self.socket_path.exists()
    }

    /// Send one record. The record is encoded before connecting, so an
    /// oversized payload never reaches the daemon.
    pub async fn send(&self, record: &ControlRecord) -> Result<(), ControlClientError> {
        self.send_all(std::slice::from_ref(record)).await
    }

    /// Send several records over one connection, preserving their order.
    pub async fn send_all(&self, records: &[ControlRecord]) -> Result<(), ControlClientError> {
        let encoded = records
            .iter()
            .map(|r| r.encode(self.record_size))
            .collect::<Result<Vec<_>, _>>()?;

        if !self.daemon_available() {
            return Err(ControlClientError::NotRunning(self.socket_path.clone()));
        }
        let mut stream =
            UnixStream::connect(&self.socket_path)
                .await
                .map_err(|e| ControlClientError::Connect {
                    path: self.socket_path.clone(),
                    source: e,
                })?;

        for (record, bytes) in records.iter().zip(&encoded) {
            debug!(code = %char::from(record.code), len = record.payload.len(), "sending control record");
            stream.write_all(bytes).await?;
        }
        stream.shutdown().await?;
        Ok(())
    }
}
