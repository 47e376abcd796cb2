#![deny(unsafe_code)]

//! Shared test utilities for the irccd workspace.
//!
//! Provides config builders, an in-memory IRC server
//! transport and a spawned-daemon fixture so integration tests stay short.
//!
//! Add this crate as a `[dev-dependency]` in any workspace member:
//!
//! ```toml
//! [dev-dependencies]
//! irccd-test-utils = { workspace = true }
//! ```

pub mod config;
pub mod daemon;
pub mod transport;

pub use config::TestConfigBuilder;
pub use daemon::TestDaemon;
pub use transport::{MockConnector, MockServer, MockServers};
