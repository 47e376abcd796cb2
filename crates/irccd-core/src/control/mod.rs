//! Control channel: Unix domain socket through which local processes
//! issue IRC actions to the daemon.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐      Unix socket       ┌────────────────┐
//! │   CLI    │───────────────────────▶│ Control server │
//! │  shell   │  fixed-size records    │                │
//! └──────────┘                        └───────┬────────┘
//!                                             │ mpsc
//!                                      ┌──────▼───────┐
//!                                      │  Event loop  │
//!                                      │ (dispatcher) │
//!                                      └──────────────┘
//! ```

pub mod client;
pub mod record;
pub mod server;

pub use client::{ControlClient, ControlClientError};
pub use record::{Action, ControlCodec, ControlRecord, RecordError};
pub use server::{DEFAULT_SOCKET_PATH, serve, socket_path_from_config};
