//! In-memory IRC server transport.
//!
//! [`MockConnector`] plugs into the daemon in place of TCP. Every connect
//! opens a duplex pipe and hands the server end to the test as a
//! [`MockServer`], which reads what the daemon wrote line by line and can
//! write server lines back.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;

use irccd_core::BoxFuture;
use irccd_core::codec::LineCodec;
use irccd_core::connection::{ConnError, Connector, Transport};

/// How long helpers wait before declaring a test stuck.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// Connector that produces in-memory server sessions.
pub struct MockConnector {
    servers: mpsc::UnboundedSender<MockServer>,
    refuse: AtomicBool,
    attempts: AtomicUsize,
    targets: Mutex<Vec<(String, u16)>>,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, MockServers) {
        let (servers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            servers,
            refuse: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        });
        (connector, MockServers(rx))
    }

    /// Make subsequent connects fail with `ConnError::Refused`.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Connect attempts so far, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// `(host, port)` of every connect attempt, in order.
    pub fn targets(&self) -> Vec<(String, u16)> {
        self.targets.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

impl Connector for MockConnector {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Transport, ConnError>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut targets) = self.targets.lock() {
                targets.push((host.to_string(), port));
            }
            if self.refuse.load(Ordering::SeqCst) {
                return Err(ConnError::Refused {
                    addr: format!("{host}:{port}"),
                });
            }

            let (client, server) = tokio::io::duplex(64 * 1024);
            let (read, write) = tokio::io::split(server);
            let _ = self.servers.send(MockServer {
                host: host.to_string(),
                port,
                lines: FramedRead::new(read, LineCodec::new()),
                writer: Some(write),
            });
            Ok(Transport::from_stream(client))
        })
    }
}

/// Server ends of accepted connections, in connect order.
pub struct MockServers(mpsc::UnboundedReceiver<MockServer>);

impl MockServers {
    /// The next accepted connection. Panics if none arrives in time.
    pub async fn next(&mut self) -> MockServer {
        tokio::time::timeout(STEP_TIMEOUT, self.0.recv())
            .await
            .expect("no connection within timeout")
            .expect("connector dropped")
    }

    /// An already accepted connection, without waiting.
    pub fn try_next(&mut self) -> Option<MockServer> {
        self.0.try_recv().ok()
    }
}

/// The server side of one mock connection.
pub struct MockServer {
    pub host: String,
    pub port: u16,
    lines: FramedRead<ReadHalf<DuplexStream>, LineCodec>,
    writer: Option<WriteHalf<DuplexStream>>,
}

impl MockServer {
    /// Next line the daemon wrote, without its terminator. `None` on EOF or
    /// timeout.
    pub async fn next_line(&mut self) -> Option<String> {
        match tokio::time::timeout(STEP_TIMEOUT, self.lines.next()).await {
            Ok(Some(Ok(line))) => Some(line.text().into_owned()),
            _ => None,
        }
    }

    /// Assert the next line the daemon wrote.
    pub async fn expect_line(&mut self, expected: &str) {
        let got = self.next_line().await;
        assert_eq!(got.as_deref(), Some(expected), "unexpected line from daemon");
    }

    /// Consume the `NICK`/`USER` login pair.
    pub async fn expect_login(&mut self, nick: &str, realname: &str) {
        self.expect_line(&format!("NICK {nick}")).await;
        self.expect_line(&format!("USER {nick} 8 * :{realname}")).await;
    }

    /// Assert the daemon writes nothing for `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        if let Ok(Some(Ok(line))) = tokio::time::timeout(window, self.lines.next()).await {
            panic!("expected silence, got {:?}", line.text());
        }
    }

    /// True once the daemon has closed its side.
    pub async fn is_closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(STEP_TIMEOUT, self.lines.next()).await,
            Ok(None) | Ok(Some(Err(_)))
        )
    }

    /// Write one server line; CRLF is appended.
    pub async fn send(&mut self, line: &str) {
        let writer = self.writer.as_mut().expect("server already hung up");
        writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("daemon side closed");
    }

    /// Close the server's write side. The daemon's reader then sees EOF.
    pub async fn hang_up(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.shutdown().await;
        }
    }
}
