//! Connection manager: owns the single TCP session to the IRC server.
//!
//! The manager keeps the write half of the connection and is the only
//! writer of session state. [`ConnectionManager::connect`] hands the read
//! half back to the caller so a [`ReaderTask`](crate::reader::ReaderTask)
//! can own it exclusively.

use std::fmt;
use std::sync::Arc;

use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_util::codec::FramedWrite;
use tracing::{debug, info, warn};

use irccd_config::ServerConfig;

use crate::BoxFuture;
use crate::codec::{Frame, LineCodec, ProtocolError, frame};
use crate::message::Envelope;

/// Read half of a server connection.
pub type ServerRead = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a server connection.
pub type ServerWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Both halves of a freshly opened server connection.
pub struct Transport {
    pub reader: ServerRead,
    pub writer: ServerWrite,
}

impl Transport {
    /// Split any bidirectional stream into a transport.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }
}

/// Opens transports to a server. TCP in production, in-memory in tests.
pub trait Connector: Send + Sync {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Transport, ConnError>>;
}

/// Plain TCP connector.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Transport, ConnError>> {
        Box::pin(async move {
            let addrs: Vec<_> = tokio::net::lookup_host((host, port))
                .await
                .map_err(|e| ConnError::ResolutionFailed {
                    host: host.to_string(),
                    reason: e.to_string(),
                })?
                .collect();
            if addrs.is_empty() {
                return Err(ConnError::ResolutionFailed {
                    host: host.to_string(),
                    reason: "no addresses found".to_string(),
                });
            }

            let mut last_err = None;
            for addr in addrs {
                debug!(%addr, "connecting");
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        stream.set_nodelay(true)?;
                        let (reader, writer) = stream.into_split();
                        return Ok(Transport {
                            reader: Box::new(reader),
                            writer: Box::new(writer),
                        });
                    }
                    Err(e) => {
                        debug!(%addr, error = %e, "connect attempt failed");
                        last_err = Some(e);
                    }
                }
            }

            match last_err {
                Some(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                    Err(ConnError::Refused {
                        addr: format!("{host}:{port}"),
                    })
                }
                Some(e) => Err(ConnError::Io(e)),
                None => Err(ConnError::ResolutionFailed {
                    host: host.to_string(),
                    reason: "no addresses found".to_string(),
                }),
            }
        })
    }
}

/// Errors from the connection manager.
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    #[error("connection refused by {addr}")]
    Refused { addr: String },

    #[error("failed to resolve {host}: {reason}")]
    ResolutionFailed { host: String, reason: String },

    #[error("not connected to a server")]
    NotConnected,

    #[error("already connected to {addr}")]
    AlreadyConnected { addr: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Lifecycle of the server session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Connected => "connected",
        })
    }
}

/// Owner of the server connection handle.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    host: String,
    port: u16,
    nick: String,
    realname: String,
    state: SessionState,
    writer: Option<FramedWrite<ServerWrite, LineCodec>>,
    bus: Option<broadcast::Sender<Envelope>>,
}

impl ConnectionManager {
    /// Create a disconnected manager with the identity from `server`.
    pub fn new(server: &ServerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            host: server.host.clone(),
            port: server.port,
            nick: server.nick.clone(),
            realname: server.realname.clone(),
            state: SessionState::Disconnected,
            writer: None,
            bus: None,
        }
    }

    /// Publish every outbound frame on `bus`.
    pub fn with_bus(mut self, bus: broadcast::Sender<Envelope>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    /// Record a nickname change. The server is not consulted.
    pub fn set_nick(&mut self, nick: &str) {
        self.nick = nick.to_string();
    }

    /// Open a connection and log in with `NICK` then `USER`.
    ///
    /// Fails with [`ConnError::AlreadyConnected`] while a handle is live;
    /// callers must [`disconnect`](Self::disconnect) first. On success the
    /// read half is returned for the reader task.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<ServerRead, ConnError> {
        if self.is_connected() {
            return Err(ConnError::AlreadyConnected {
                addr: format!("{}:{}", self.host, self.port),
            });
        }

        self.host = host.to_string();
        self.port = port;
        self.state = SessionState::Connecting;
        info!(host, port, "connecting to server");

        let transport = match self.connector.connect(host, port).await {
            Ok(transport) => transport,
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(e);
            }
        };

        self.writer = Some(FramedWrite::new(transport.writer, LineCodec::new()));
        self.state = SessionState::Authenticating;

        if let Err(e) = self.login().await {
            warn!(error = %e, "login failed");
            self.abandon();
            return Err(e);
        }

        self.state = SessionState::Connected;
        info!(host, port, nick = %self.nick, "logged in");
        Ok(transport.reader)
    }

    async fn login(&mut self) -> Result<(), ConnError> {
        let nick = frame("NICK", &[&self.nick])?;
        let realname = format!(":{}", self.realname);
        let user = frame("USER", &[&self.nick, "8", "*", &realname])?;
        self.send_line(nick).await?;
        self.send_line(user).await?;
        Ok(())
    }

    /// Send `QUIT` (best effort) and shut the connection down.
    ///
    /// The session always ends `Disconnected`, even when the quit line or
    /// the shutdown fails.
    pub async fn disconnect(&mut self) -> Result<(), ConnError> {
        if !self.is_connected() {
            self.state = SessionState::Disconnected;
            return Err(ConnError::NotConnected);
        }

        if let Err(e) = self.send_line(frame("QUIT", &[])?).await {
            warn!(error = %e, "failed to send QUIT");
        }
        if let Some(mut writer) = self.writer.take()
            && let Err(e) = writer.get_mut().shutdown().await
        {
            debug!(error = %e, "shutdown after QUIT failed");
        }

        self.state = SessionState::Disconnected;
        info!(host = %self.host, port = self.port, "disconnected");
        Ok(())
    }

    /// Drop the connection without saying goodbye, e.g. after the reader gave up.
    pub fn abandon(&mut self) {
        if self.writer.take().is_some() {
            info!(host = %self.host, port = self.port, "connection abandoned");
        }
        self.state = SessionState::Disconnected;
    }

    /// Write one framed line to the server.
    pub async fn send_line(&mut self, line: Frame) -> Result<usize, ConnError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(ConnError::NotConnected);
        };
        let len = line.len();
        let text = line.text().into_owned();
        writer.send(line).await?;

        debug!(out = %text, "sent");
        if let Some(bus) = &self.bus {
            let _ = bus.send(Envelope::outbound(&self.host, &text));
        }
        Ok(len)
    }

    /// Answer a server keepalive by echoing its argument text.
    pub async fn reply_keepalive(&mut self, args: &str) -> Result<usize, ConnError> {
        let reply = if args.is_empty() {
            frame("PONG", &[])?
        } else {
            frame("PONG", &[args])?
        };
        self.send_line(reply).await
    }

    /// Cheap liveness check: true when a `PING` can still be written.
    pub async fn probe(&mut self) -> bool {
        if !self.is_connected() {
            return false;
        }
        let host = self.host.clone();
        match frame("PING", &[&host]) {
            Ok(ping) => self.send_line(ping).await.is_ok(),
            Err(_) => false,
        }
    }
}
