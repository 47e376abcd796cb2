//! Reader task: drains the server connection on its own tokio task.
//!
//! The task owns the read half exclusively and never touches session
//! state. Everything it learns flows one way to the event loop as
//! [`ReaderMessage`]s tagged with the session generation.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use irccd_config::ReaderConfig;

use crate::codec::{Line, MAX_LINE_LEN, extract_line};
use crate::connection::ServerRead;

/// Failure policy for the reader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderSettings {
    /// Consecutive failed reads before giving up.
    pub ping_timeout: u32,
    /// Sleep between failed reads.
    pub retry_interval: Duration,
}

impl Default for ReaderSettings {
    fn default() -> Self {
        Self::from(&ReaderConfig::default())
    }
}

impl From<&ReaderConfig> for ReaderSettings {
    fn from(config: &ReaderConfig) -> Self {
        Self {
            ping_timeout: config.ping_timeout,
            retry_interval: Duration::from_millis(config.retry_interval_ms),
        }
    }
}

/// What the reader observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// The server asked for a keepalive reply; `args` is echoed verbatim.
    Keepalive { args: String },
    /// Any other line, for the application boundary.
    Line(Line),
    /// The failure budget ran out; the task has stopped.
    Exhausted { failures: u32 },
}

/// A [`ReaderEvent`] tagged with the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderMessage {
    pub generation: u64,
    pub event: ReaderEvent,
}

/// The reader loop, not yet running.
pub struct ReaderTask {
    generation: u64,
    source: ServerRead,
    settings: ReaderSettings,
    events: mpsc::Sender<ReaderMessage>,
    buf: BytesMut,
}

impl ReaderTask {
    pub fn new(
        generation: u64,
        source: ServerRead,
        settings: ReaderSettings,
        events: mpsc::Sender<ReaderMessage>,
    ) -> Self {
        Self {
            generation,
            source,
            settings,
            events,
            buf: BytesMut::with_capacity(MAX_LINE_LEN * 4),
        }
    }

    /// Start the loop on a tokio task.
    pub fn spawn(self) -> ReaderHandle {
        let generation = self.generation;
        ReaderHandle {
            generation,
            join: tokio::spawn(self.run()),
        }
    }

    /// Read until the failure budget is spent or the event loop goes away.
    ///
    /// EOF counts as a failed read: a closed socket keeps failing until the
    /// budget runs out.
    pub async fn run(mut self) {
        let mut failures: u32 = 0;
        loop {
            self.buf.reserve(MAX_LINE_LEN);
            match self.source.read_buf(&mut self.buf).await {
                Ok(n) if n > 0 => {
                    failures = 0;
                    if !self.drain_lines().await {
                        debug!(generation = self.generation, "event loop gone; reader stopping");
                        return;
                    }
                    continue;
                }
                Ok(_) => {
                    failures += 1;
                    warn!(generation = self.generation, failures, "server connection closed");
                }
                Err(e) => {
                    failures += 1;
                    warn!(generation = self.generation, failures, error = %e, "read failed");
                }
            }

            if failures >= self.settings.ping_timeout {
                error!(
                    generation = self.generation,
                    failures, "reader giving up after consecutive failures"
                );
                self.emit(ReaderEvent::Exhausted { failures }).await;
                return;
            }
            tokio::time::sleep(self.settings.retry_interval).await;
        }
    }

    /// Forward every complete line in the buffer. False if the loop is gone.
    async fn drain_lines(&mut self) -> bool {
        while let Some(line) = extract_line(&mut self.buf) {
            let event = match line.keepalive_args() {
                Some(args) => ReaderEvent::Keepalive { args },
                None => ReaderEvent::Line(line),
            };
            if !self.emit(event).await {
                return false;
            }
        }
        true
    }

    // `&mut self` keeps the future `Send`: the boxed read half is not `Sync`.
    async fn emit(&mut self, event: ReaderEvent) -> bool {
        self.events
            .send(ReaderMessage {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }
}

/// Handle to a running reader.
#[derive(Debug)]
pub struct ReaderHandle {
    generation: u64,
    join: JoinHandle<()>,
}

impl ReaderHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the reader. The read half is dropped with the task.
    pub fn stop(self) {
        debug!(generation = self.generation, "stopping reader");
        self.join.abort();
    }
}
