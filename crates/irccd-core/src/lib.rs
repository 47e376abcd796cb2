#![deny(unsafe_code)]

//! irccd core daemon runtime.
//!
//! Holds one persistent IRC server session on behalf of a local user and
//! turns records from the local control channel into protocol actions. The
//! CLI embeds the daemon and talks to running instances through
//! [`control::ControlClient`].

use std::future::Future;
use std::pin::Pin;

/// A type-erased, `Send`-safe, boxed future for trait methods that need
/// dynamic dispatch (`dyn Trait`).
///
/// `async fn` in traits is not object-safe, so traits used as
/// `Arc<dyn Trait>` return this instead.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Line framing for the IRC wire protocol.
pub mod codec;
/// Server session ownership: connect, login, disconnect, keepalive.
pub mod connection;
/// Local control channel: record format, Unix socket server and client.
pub mod control;
/// Async daemon runtime and event loop.
pub mod daemon;
/// Control command decoding and application.
pub mod dispatch;
/// Server traffic envelopes for the message bus.
pub mod message;
/// Task that drains the server connection.
pub mod reader;
/// Joined-channel registry.
pub mod registry;

pub use codec::{Frame, Line, LineCodec, ProtocolError, frame};
pub use connection::{ConnError, Connector, ConnectionManager, SessionState, TcpConnector, Transport};
pub use control::{Action, ControlClient, ControlRecord};
pub use daemon::{Daemon, DaemonError, Exit, SessionStatus, ShutdownSignal};
pub use dispatch::{Command, DispatchError, Dispatcher, Flow};
pub use message::Envelope;
pub use registry::ChannelRegistry;
