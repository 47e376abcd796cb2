//! Server traffic envelopes published on the daemon's message bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// One protocol line exchanged with the server, as seen by bus subscribers.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Unique message identifier.
    pub id: u64,

    /// When the line was read or written.
    pub timestamp: SystemTime,

    /// Server host the line was exchanged with.
    pub server: String,

    /// The line text without its terminator.
    pub body: String,

    /// Direction of the line.
    pub direction: Direction,
}

/// Whether a line came from the server or went to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Envelope {
    /// A line received from `server`.
    pub fn inbound(server: &str, body: &str) -> Self {
        Self::new(server, body, Direction::Inbound)
    }

    /// A line sent to `server`.
    pub fn outbound(server: &str, body: &str) -> Self {
        Self::new(server, body, Direction::Outbound)
    }

    fn new(server: &str, body: &str, direction: Direction) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            timestamp: SystemTime::now(),
            server: server.to_string(),
            body: body.to_string(),
            direction,
        }
    }
}
