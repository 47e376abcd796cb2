//! Daemon test helpers.
//!
//! [`TestDaemon`] runs a [`Daemon`] on a background task against a
//! [`MockConnector`] and keeps handles to everything a test needs to drive
//! and observe it.

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use irccd_config::AppConfig;
use irccd_core::control::{Action, ControlRecord};
use irccd_core::daemon::{DaemonError, Exit, SessionStatus, ShutdownSignal};
use irccd_core::message::Envelope;
use irccd_core::Daemon;

use crate::transport::{MockConnector, MockServers, STEP_TIMEOUT};

/// A spawned daemon wired to an in-memory server.
pub struct TestDaemon {
    pub config: AppConfig,
    pub connector: Arc<MockConnector>,
    pub servers: MockServers,
    pub control: mpsc::Sender<ControlRecord>,
    pub status: watch::Receiver<SessionStatus>,
    pub messages: broadcast::Receiver<Envelope>,
    pub shutdown: broadcast::Sender<ShutdownSignal>,
    handle: JoinHandle<Result<Exit, DaemonError>>,
    _temp_dir: Option<TempDir>,
}

impl TestDaemon {
    /// Spawn a daemon running `config`.
    pub fn spawn(config: AppConfig) -> Self {
        let (connector, servers) = MockConnector::new();
        let daemon = Daemon::with_connector(config.clone(), connector.clone());
        let control = daemon.control_sender();
        let status = daemon.status();
        let messages = daemon.message_subscriber();
        let shutdown = daemon.shutdown_sender();
        let handle = tokio::spawn(daemon.run());

        Self {
            config,
            connector,
            servers,
            control,
            status,
            messages,
            shutdown,
            handle,
            _temp_dir: None,
        }
    }

    /// Spawn a daemon from a TOML file written to a temp directory.
    pub async fn with_toml(toml_content: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let config_path: PathBuf = temp_dir.path().join("irccd.toml");
        tokio::fs::write(&config_path, toml_content)
            .await
            .expect("failed to write test config");
        let config = AppConfig::load(&config_path)
            .await
            .expect("failed to parse test config");

        let mut daemon = Self::spawn(config);
        daemon._temp_dir = Some(temp_dir);
        daemon
    }

    /// Queue one control record.
    pub async fn send(&self, action: Action, payload: &str) {
        self.control
            .send(ControlRecord::new(action, payload))
            .await
            .expect("daemon event loop gone");
    }

    /// Wait until the published status satisfies `pred`.
    pub async fn wait_status(&mut self, pred: impl FnMut(&SessionStatus) -> bool) -> SessionStatus {
        tokio::time::timeout(STEP_TIMEOUT, self.status.wait_for(pred))
            .await
            .expect("status condition not reached in time")
            .expect("daemon dropped its status channel")
            .clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the event loop to end.
    pub async fn join(self) -> Result<Exit, DaemonError> {
        tokio::time::timeout(STEP_TIMEOUT, self.handle)
            .await
            .expect("daemon did not exit in time")
            .expect("daemon task panicked")
    }
}
