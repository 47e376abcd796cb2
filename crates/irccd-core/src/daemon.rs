//! Core daemon process: startup, shutdown, and main event loop.
//!
//! The event loop is the single owner of the session and the channel
//! registry. It waits on three sources at once: reader events, control
//! records and shutdown. Reader events come first so keepalive replies are
//! never queued behind control traffic.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use irccd_config::AppConfig;

use crate::connection::{Connector, ConnectionManager, SessionState, TcpConnector};
use crate::control::record::ControlRecord;
use crate::dispatch::{Dispatcher, Flow};
use crate::message::Envelope;
use crate::reader::{ReaderEvent, ReaderMessage, ReaderSettings};
use crate::registry::ChannelRegistry;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// Why the event loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// A `Quit` control record.
    Quit,
    /// A shutdown signal or Ctrl-C.
    Shutdown,
}

/// Snapshot of the session published after every loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub host: String,
    pub port: u16,
    pub nick: String,
    pub channels: Vec<String>,
    pub active: Option<String>,
}

impl SessionStatus {
    fn capture(conn: &ConnectionManager, registry: &ChannelRegistry) -> Self {
        Self {
            state: conn.state(),
            host: conn.host().to_string(),
            port: conn.port(),
            nick: conn.nick().to_string(),
            channels: registry.names(),
            active: registry.active().map(str::to_string),
        }
    }
}

/// The irccd daemon.
pub struct Daemon {
    config: AppConfig,
    connector: Arc<dyn Connector>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    _shutdown_rx: broadcast::Receiver<ShutdownSignal>,
    message_tx: broadcast::Sender<Envelope>,
    _message_rx: broadcast::Receiver<Envelope>,
    control_tx: mpsc::Sender<ControlRecord>,
    control_rx: mpsc::Receiver<ControlRecord>,
    status_tx: watch::Sender<SessionStatus>,
}

impl Daemon {
    /// Create a daemon that reaches the server over TCP.
    pub fn new(config: AppConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    /// Create a daemon with a custom transport.
    pub fn with_connector(config: AppConfig, connector: Arc<dyn Connector>) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);
        let (message_tx, _message_rx) = broadcast::channel(256);
        let (control_tx, control_rx) = mpsc::channel(64);
        let (status_tx, _) = watch::channel(SessionStatus {
            state: SessionState::Disconnected,
            host: config.server.host.clone(),
            port: config.server.port,
            nick: config.server.nick.clone(),
            channels: Vec::new(),
            active: None,
        });

        Self {
            config,
            connector,
            shutdown_tx,
            _shutdown_rx,
            message_tx,
            _message_rx,
            control_tx,
            control_rx,
            status_tx,
        }
    }

    /// Run the event loop until `Quit`, a shutdown signal or Ctrl-C.
    ///
    /// With `connect_on_start`, a failed initial connection is fatal and
    /// reported as [`DaemonError::Startup`].
    pub async fn run(self) -> Result<Exit, DaemonError> {
        let Daemon {
            config,
            connector,
            shutdown_tx,
            _shutdown_rx: shutdown_rx,
            message_tx,
            _message_rx,
            control_tx: _control_tx,
            control_rx,
            status_tx,
        } = self;

        info!(
            server = %config.server_addr(),
            nick = %config.server.nick,
            version = %crate::build_info::version_string(),
            "irccd daemon starting"
        );

        let (events_tx, events_rx) = mpsc::channel::<ReaderMessage>(256);
        let mut conn = ConnectionManager::new(&config.server, connector).with_bus(message_tx.clone());
        let mut registry = ChannelRegistry::new();
        let mut dispatcher = Dispatcher::new(
            config.server.port,
            ReaderSettings::from(&config.reader),
            events_tx,
        );

        if config.server.connect_on_start {
            let (host, port) = (config.server.host.clone(), config.server.port);
            dispatcher
                .connect(&host, port, &mut conn, &mut registry)
                .await
                .map_err(|e| DaemonError::Startup(format!("cannot connect to {host}:{port}: {e}")))?;
        }
        status_tx.send_replace(SessionStatus::capture(&conn, &registry));

        let period = Duration::from_secs(config.daemon.tick_secs);
        let mut tick = tokio::time::interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inputs = Inputs {
            events: events_rx,
            shutdown: shutdown_rx,
            control: control_rx,
            tick,
        };

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        let exit = loop {
            match inputs.next(ctrl_c.as_mut()).await {
                Input::Reader(msg) => {
                    handle_reader_message(msg, &mut dispatcher, &mut conn, &mut registry, &message_tx).await;
                }
                Input::Shutdown => {
                    info!("Shutdown signal received, stopping daemon");
                    break Exit::Shutdown;
                }
                Input::Control(record) => {
                    match dispatcher.dispatch(record, &mut conn, &mut registry).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break Exit::Quit,
                        Err(e) => warn!(error = %e, "control command failed"),
                    }
                }
                Input::Interrupt => {
                    warn!("Ctrl-C received, initiating graceful shutdown");
                    let _ = shutdown_tx.send(ShutdownSignal);
                    break Exit::Shutdown;
                }
                Input::Tick => {
                    debug!(
                        state = %conn.state(),
                        host = %conn.host(),
                        channels = registry.len(),
                        reader_alive = !dispatcher.reader_finished(),
                        "tick"
                    );
                }
            }
            status_tx.send_replace(SessionStatus::capture(&conn, &registry));
        };

        if exit == Exit::Shutdown {
            dispatcher.stop_reader();
            registry.clear();
            if conn.is_connected()
                && let Err(e) = conn.disconnect().await
            {
                warn!(error = %e, "disconnect during shutdown failed");
            }
        } else {
            // Let the control server and other subscribers wind down too.
            let _ = shutdown_tx.send(ShutdownSignal);
        }
        status_tx.send_replace(SessionStatus::capture(&conn, &registry));

        info!(?exit, "Daemon stopped");
        Ok(exit)
    }

    /// Request a graceful shutdown of the daemon.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    /// Get a sender for shutdown signals that outlives [`run`](Self::run).
    pub fn shutdown_sender(&self) -> broadcast::Sender<ShutdownSignal> {
        self.shutdown_tx.clone()
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Where control records enter the event loop.
    pub fn control_sender(&self) -> mpsc::Sender<ControlRecord> {
        self.control_tx.clone()
    }

    /// Subscribe to the server traffic bus.
    pub fn message_subscriber(&self) -> broadcast::Receiver<Envelope> {
        self.message_tx.subscribe()
    }

    /// Watch the session as the event loop sees it.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Get a reference to the daemon's configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// One unit of work for the event loop.
#[derive(Debug)]
enum Input {
    Reader(ReaderMessage),
    Shutdown,
    Control(ControlRecord),
    Interrupt,
    Tick,
}

/// The event loop's sources, polled in priority order.
struct Inputs {
    events: mpsc::Receiver<ReaderMessage>,
    shutdown: broadcast::Receiver<ShutdownSignal>,
    control: mpsc::Receiver<ControlRecord>,
    tick: Interval,
}

impl Inputs {
    /// Wait for the next input. When several are ready, reader events win,
    /// then shutdown, then control records.
    async fn next<F>(&mut self, interrupt: Pin<&mut F>) -> Input
    where
        F: Future<Output = std::io::Result<()>>,
    {
        tokio::select! {
            biased;

            Some(msg) = self.events.recv() => Input::Reader(msg),
            _ = self.shutdown.recv() => Input::Shutdown,
            Some(record) = self.control.recv() => Input::Control(record),
            _ = interrupt => Input::Interrupt,
            _ = self.tick.tick() => Input::Tick,
        }
    }
}

async fn handle_reader_message(
    msg: ReaderMessage,
    dispatcher: &mut Dispatcher,
    conn: &mut ConnectionManager,
    registry: &mut ChannelRegistry,
    bus: &broadcast::Sender<Envelope>,
) {
    if dispatcher.current_generation() != Some(msg.generation) {
        debug!(generation = msg.generation, "dropping event from a replaced connection");
        return;
    }

    match msg.event {
        ReaderEvent::Keepalive { args } => {
            if let Err(e) = conn.reply_keepalive(&args).await {
                warn!(error = %e, "keepalive reply failed");
            }
        }
        ReaderEvent::Line(line) => {
            let text = line.text();
            info!(target: "irccd::server", host = %conn.host(), "{text}");
            let _ = bus.send(Envelope::inbound(conn.host(), &text));
        }
        ReaderEvent::Exhausted { failures } => {
            error!(
                host = %conn.host(),
                port = conn.port(),
                failures,
                "server unreachable; session ended"
            );
            dispatcher.stop_reader();
            conn.abandon();
            registry.clear();
        }
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("daemon startup failed: {0}")]
    Startup(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
