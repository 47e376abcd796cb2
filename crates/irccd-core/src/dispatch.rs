//! Command dispatcher: turns control records into protocol actions and
//! registry mutations.
//!
//! The dispatcher borrows the session and registry for the duration of one
//! call; the event loop owns both. It also owns the reader task handle,
//! because every command that replaces or ends the connection must stop the
//! old reader first.

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use irccd_config::MAX_NICK_LEN;

use crate::codec::{ProtocolError, frame};
use crate::connection::{ConnError, ConnectionManager};
use crate::control::record::{Action, ControlRecord, RecordError};
use crate::reader::{ReaderHandle, ReaderMessage, ReaderSettings, ReaderTask};
use crate::registry::{AddOutcome, ChannelRegistry, RemoveOutcome, is_valid_channel_name};

/// A decoded control command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Join(String),
    Part(String),
    List(String),
    Write(String),
    Nick(String),
    Connect(String),
    Ping(String),
    Disconnect,
    Quit,
}

impl Command {
    pub fn action(&self) -> Action {
        match self {
            Command::Join(_) => Action::Join,
            Command::Part(_) => Action::Part,
            Command::List(_) => Action::List,
            Command::Write(_) => Action::Write,
            Command::Nick(_) => Action::Nick,
            Command::Connect(_) => Action::Connect,
            Command::Ping(_) => Action::Ping,
            Command::Disconnect => Action::Disconnect,
            Command::Quit => Action::Quit,
        }
    }

    /// The record a client writes to issue this command.
    pub fn to_record(&self) -> ControlRecord {
        let payload = match self {
            Command::Join(p)
            | Command::Part(p)
            | Command::List(p)
            | Command::Write(p)
            | Command::Nick(p)
            | Command::Connect(p)
            | Command::Ping(p) => p.as_str(),
            Command::Disconnect | Command::Quit => "",
        };
        ControlRecord::new(self.action(), payload)
    }
}

impl TryFrom<ControlRecord> for Command {
    type Error = DispatchError;

    fn try_from(record: ControlRecord) -> Result<Self, Self::Error> {
        let Some(action) = record.action() else {
            return Err(DispatchError::UnknownAction(record.code));
        };
        let p = record.payload;
        Ok(match action {
            Action::Join => Command::Join(p),
            Action::Part => Command::Part(p),
            Action::List => Command::List(p),
            Action::Write => Command::Write(p),
            Action::Nick => Command::Nick(p),
            Action::Connect => Command::Connect(p),
            Action::Ping => Command::Ping(p),
            Action::Disconnect => Command::Disconnect,
            Action::Quit => Command::Quit,
        })
    }
}

impl Command {
    /// Decode a raw control record straight into a command.
    pub fn decode(raw: &[u8]) -> Result<Self, DispatchError> {
        Command::try_from(ControlRecord::parse(raw)?)
    }
}

/// Errors from dispatching a control command. None of them end the daemon.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid channel name {0:?}")]
    InvalidChannelName(String),

    #[error("unknown control action {:?}", char::from(*.0))]
    UnknownAction(u8),

    #[error("already connected to {0}")]
    AlreadyConnected(String),

    #[error("nickname is already {0:?}")]
    NicknameUnchanged(String),

    #[error("invalid nickname {0:?}")]
    InvalidNickname(String),

    #[error("no active channel to write to")]
    NoActiveChannel,

    #[error("invalid server address {0:?}")]
    InvalidHostSpec(String),

    #[error("malformed control record: {0}")]
    MalformedRecord(#[from] RecordError),

    #[error(transparent)]
    Connection(#[from] ConnError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Whether the event loop keeps running after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub fn validate_channel_name(name: &str) -> Result<(), DispatchError> {
    if is_valid_channel_name(name) {
        Ok(())
    } else {
        Err(DispatchError::InvalidChannelName(name.to_string()))
    }
}

fn validate_nick(nick: &str) -> Result<(), DispatchError> {
    if nick.is_empty()
        || nick.len() > MAX_NICK_LEN
        || nick.starts_with([':', '#'])
        || nick.chars().any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(DispatchError::InvalidNickname(nick.to_string()));
    }
    Ok(())
}

/// Parse `host[:port]`. IPv6 literals need brackets to carry a port
/// (`[::1]:6697`); an unbracketed literal is taken whole.
pub fn parse_host_spec(spec: &str, default_port: u16) -> Result<(String, u16), DispatchError> {
    let invalid = || DispatchError::InvalidHostSpec(spec.to_string());
    let spec = spec.trim();

    let (host, port) = if let Some(rest) = spec.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail {
            "" => (host, None),
            _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match spec.split_once(':') {
            Some((host, port)) if !port.contains(':') => (host, Some(port)),
            _ => (spec, None),
        }
    };

    if host.is_empty() || host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid());
    }
    let port = match port {
        None => default_port,
        Some(p) => match p.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => return Err(invalid()),
        },
    };
    Ok((host.to_string(), port))
}

/// Applies commands to a session and its registry.
pub struct Dispatcher {
    default_port: u16,
    reader_settings: ReaderSettings,
    events: mpsc::Sender<ReaderMessage>,
    reader: Option<ReaderHandle>,
    next_generation: u64,
}

impl Dispatcher {
    /// `events` is where readers spawned by this dispatcher report.
    pub fn new(
        default_port: u16,
        reader_settings: ReaderSettings,
        events: mpsc::Sender<ReaderMessage>,
    ) -> Self {
        Self {
            default_port,
            reader_settings,
            events,
            reader: None,
            next_generation: 1,
        }
    }

    /// Generation of the live reader, if one is running.
    pub fn current_generation(&self) -> Option<u64> {
        self.reader.as_ref().map(ReaderHandle::generation)
    }

    pub fn reader_finished(&self) -> bool {
        self.reader.as_ref().is_none_or(ReaderHandle::is_finished)
    }

    /// Abort the live reader, if any. Its pending events become stale.
    pub fn stop_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }
    }

    /// Decode and apply one control record.
    pub async fn dispatch(
        &mut self,
        record: ControlRecord,
        conn: &mut ConnectionManager,
        registry: &mut ChannelRegistry,
    ) -> Result<Flow, DispatchError> {
        let command = Command::try_from(record)?;
        debug!(action = %command.action(), "dispatching");
        self.apply(command, conn, registry).await
    }

    pub async fn apply(
        &mut self,
        command: Command,
        conn: &mut ConnectionManager,
        registry: &mut ChannelRegistry,
    ) -> Result<Flow, DispatchError> {
        match command {
            Command::Join(channel) => {
                validate_channel_name(&channel)?;
                if registry.contains(&channel) {
                    debug!(%channel, "already joined; selecting");
                } else {
                    conn.send_line(frame("JOIN", &[&channel])?).await?;
                    if registry.add(&channel) == AddOutcome::Added {
                        info!(%channel, "joined");
                    }
                }
                registry.select(&channel);
            }

            Command::Part(channel) => {
                validate_channel_name(&channel)?;
                conn.send_line(frame("PART", &[&channel])?).await?;
                if registry.remove(&channel) == RemoveOutcome::NotFound {
                    debug!(%channel, "parted a channel that was not joined");
                } else {
                    info!(%channel, "parted");
                }
            }

            Command::List(filter) => {
                let line = if filter.is_empty() {
                    frame("LIST", &[])?
                } else {
                    frame("LIST", &[&filter])?
                };
                conn.send_line(line).await?;
            }

            Command::Write(text) => {
                let target = registry.active().ok_or(DispatchError::NoActiveChannel)?;
                let text = format!(":{text}");
                conn.send_line(frame("PRIVMSG", &[target, &text])?).await?;
            }

            Command::Nick(nick) => {
                if nick == conn.nick() {
                    return Err(DispatchError::NicknameUnchanged(nick));
                }
                validate_nick(&nick)?;
                if conn.is_connected() {
                    conn.send_line(frame("NICK", &[&nick])?).await?;
                } else {
                    debug!(%nick, "not connected; nickname applies at next login");
                }
                info!(old = %conn.nick(), new = %nick, "nickname changed");
                conn.set_nick(&nick);
            }

            Command::Connect(spec) => {
                let (host, port) = if spec.trim().is_empty() {
                    (conn.host().to_string(), conn.port())
                } else {
                    parse_host_spec(&spec, self.default_port)?
                };
                let same_server = conn.is_connected() && conn.host() == host && conn.port() == port;
                if same_server && conn.probe().await {
                    return Err(DispatchError::AlreadyConnected(format!("{host}:{port}")));
                }
                self.connect(&host, port, conn, registry).await?;
            }

            Command::Ping(token) => {
                let token = if token.is_empty() {
                    conn.host().to_string()
                } else {
                    token
                };
                conn.send_line(frame("PING", &[&token])?).await?;
            }

            Command::Disconnect => {
                self.stop_reader();
                registry.clear();
                conn.disconnect().await?;
            }

            Command::Quit => {
                self.stop_reader();
                registry.clear();
                if conn.is_connected()
                    && let Err(e) = conn.disconnect().await
                {
                    warn!(error = %e, "disconnect during quit failed");
                }
                info!("quit requested");
                return Ok(Flow::Quit);
            }
        }
        Ok(Flow::Continue)
    }

    /// Replace the session with a fresh one to `host:port` and start its
    /// reader. Any live session is torn down first.
    pub async fn connect(
        &mut self,
        host: &str,
        port: u16,
        conn: &mut ConnectionManager,
        registry: &mut ChannelRegistry,
    ) -> Result<(), DispatchError> {
        self.stop_reader();
        if conn.is_connected()
            && let Err(e) = conn.disconnect().await
        {
            warn!(error = %e, "disconnect before reconnect failed");
        }
        registry.clear();

        let source = conn.connect(host, port).await?;
        let generation = self.next_generation;
        self.next_generation += 1;
        self.reader = Some(
            ReaderTask::new(generation, source, self.reader_settings, self.events.clone()).spawn(),
        );
        debug!(generation, "reader started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::io::DuplexStream;
    use tokio::sync::mpsc::UnboundedReceiver;

    use irccd_config::ServerConfig;

    use super::*;
    use crate::connection::SessionState;
    use crate::connection::testing::{PipeConnector, drain};
    use pretty_assertions::assert_eq;

    struct Harness {
        dispatcher: Dispatcher,
        conn: ConnectionManager,
        registry: ChannelRegistry,
        connector: Arc<PipeConnector>,
        servers: UnboundedReceiver<DuplexStream>,
        _events: mpsc::Receiver<ReaderMessage>,
    }

    impl Harness {
        fn new() -> Self {
            let (connector, servers) = PipeConnector::new();
            let (tx, rx) = mpsc::channel(64);
            let settings = ReaderSettings {
                ping_timeout: 3,
                retry_interval: Duration::from_millis(1),
            };
            Self {
                dispatcher: Dispatcher::new(6667, settings, tx),
                conn: ConnectionManager::new(&ServerConfig::default(), connector.clone()),
                registry: ChannelRegistry::new(),
                connector,
                servers,
                _events: rx,
            }
        }

        async fn run(&mut self, command: Command) -> Result<Flow, DispatchError> {
            self.dispatcher
                .apply(command, &mut self.conn, &mut self.registry)
                .await
        }

        /// Connect and return the server end with the login already drained.
        async fn connected(&mut self) -> DuplexStream {
            self.run(Command::Connect("irc.example.net".into())).await.unwrap();
            let mut server = self.servers.recv().await.unwrap();
            drain(&mut server).await;
            server
        }
    }

    #[test]
    fn test_record_to_command() {
        let record = ControlRecord::new(Action::Join, "#test");
        assert_eq!(Command::try_from(record.clone()).unwrap(), Command::Join("#test".into()));
        assert_eq!(Command::Join("#test".into()).to_record(), record);
        assert_eq!(
            Command::try_from(ControlRecord::new(Action::Quit, "ignored")).unwrap(),
            Command::Quit
        );

        let unknown = ControlRecord {
            code: b'X',
            payload: String::new(),
        };
        assert!(matches!(
            Command::try_from(unknown),
            Err(DispatchError::UnknownAction(b'X'))
        ));
    }

    #[test]
    fn test_decode_raw_record() {
        assert_eq!(Command::decode(b"P#test\0\0").unwrap(), Command::Part("#test".into()));
        assert!(matches!(
            Command::decode(b"W\xff"),
            Err(DispatchError::MalformedRecord(RecordError::InvalidUtf8))
        ));
    }

    #[test]
    fn test_parse_host_spec() {
        assert_eq!(parse_host_spec("irc.libera.chat", 6667).unwrap(), ("irc.libera.chat".into(), 6667));
        assert_eq!(parse_host_spec("irc.libera.chat:7000", 6667).unwrap(), ("irc.libera.chat".into(), 7000));
        assert_eq!(parse_host_spec("[::1]:6697", 6667).unwrap(), ("::1".into(), 6697));
        assert_eq!(parse_host_spec("[::1]", 6667).unwrap(), ("::1".into(), 6667));
        assert_eq!(parse_host_spec("fe80::1", 6667).unwrap(), ("fe80::1".into(), 6667));

        for bad in [":6667", "host:", "host:0", "host:99999", "host:abc", "[::1", "[::1]x", "two words"] {
            assert!(
                matches!(parse_host_spec(bad, 6667), Err(DispatchError::InvalidHostSpec(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_join_sends_and_registers() {
        let mut h = Harness::new();
        let mut server = h.connected().await;

        h.run(Command::Join("#test".into())).await.unwrap();
        assert_eq!(drain(&mut server).await, "JOIN #test\r\n");
        assert_eq!(h.registry.names(), vec!["#test"]);
        assert_eq!(h.registry.active(), Some("#test"));
    }

    #[tokio::test]
    async fn test_rejoin_sends_nothing() {
        let mut h = Harness::new();
        let mut server = h.connected().await;

        h.run(Command::Join("#test".into())).await.unwrap();
        h.run(Command::Join("#other".into())).await.unwrap();
        drain(&mut server).await;

        h.run(Command::Join("#test".into())).await.unwrap();
        assert_eq!(drain(&mut server).await, "");
        assert_eq!(h.registry.len(), 2);
        assert_eq!(h.registry.active(), Some("#test"));
    }

    #[tokio::test]
    async fn test_join_rejects_bad_name_without_sending() {
        let mut h = Harness::new();
        let mut server = h.connected().await;

        let err = h.run(Command::Join("test".into())).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidChannelName(_)));
        assert_eq!(drain(&mut server).await, "");
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_join_while_disconnected_leaves_registry_empty() {
        let mut h = Harness::new();
        let err = h.run(Command::Join("#test".into())).await.unwrap_err();
        assert!(matches!(err, DispatchError::Connection(ConnError::NotConnected)));
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_part_removes_and_tolerates_absent() {
        let mut h = Harness::new();
        let mut server = h.connected().await;

        h.run(Command::Join("#x".into())).await.unwrap();
        h.run(Command::Part("#x".into())).await.unwrap();
        h.run(Command::Part("#never".into())).await.unwrap();
        assert_eq!(drain(&mut server).await, "JOIN #x\r\nPART #x\r\nPART #never\r\n");
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_part_rejects_bad_name_without_sending() {
        let mut h = Harness::new();
        let mut server = h.connected().await;
        h.run(Command::Join("#x".into())).await.unwrap();
        drain(&mut server).await;

        for bad in ["x", "#a,#x", "#x extra"] {
            let err = h.run(Command::Part(bad.into())).await.unwrap_err();
            assert!(matches!(err, DispatchError::InvalidChannelName(_)), "{bad:?}");
        }
        assert_eq!(drain(&mut server).await, "");
        assert_eq!(h.registry.names(), vec!["#x"]);
    }

    #[tokio::test]
    async fn test_write_targets_active_channel() {
        let mut h = Harness::new();
        let mut server = h.connected().await;

        let err = h.run(Command::Write("hello".into())).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoActiveChannel));

        h.run(Command::Join("#a".into())).await.unwrap();
        h.run(Command::Join("#b".into())).await.unwrap();
        drain(&mut server).await;

        h.run(Command::Write("hello there".into())).await.unwrap();
        assert_eq!(drain(&mut server).await, "PRIVMSG #b :hello there\r\n");

        h.run(Command::Join("#a".into())).await.unwrap();
        h.run(Command::Write("back".into())).await.unwrap();
        assert_eq!(drain(&mut server).await, "PRIVMSG #a :back\r\n");
    }

    #[tokio::test]
    async fn test_list_and_ping() {
        let mut h = Harness::new();
        let mut server = h.connected().await;

        h.run(Command::List(String::new())).await.unwrap();
        h.run(Command::List("#rust".into())).await.unwrap();
        h.run(Command::Ping("tok".into())).await.unwrap();
        h.run(Command::Ping(String::new())).await.unwrap();
        assert_eq!(
            drain(&mut server).await,
            "LIST\r\nLIST #rust\r\nPING tok\r\nPING irc.example.net\r\n"
        );
    }

    #[tokio::test]
    async fn test_nick_change() {
        let mut h = Harness::new();
        let mut server = h.connected().await;

        let err = h.run(Command::Nick("user".into())).await.unwrap_err();
        assert!(matches!(err, DispatchError::NicknameUnchanged(_)));
        let err = h.run(Command::Nick("two words".into())).await.unwrap_err();
        assert!(matches!(err, DispatchError::InvalidNickname(_)));
        assert_eq!(drain(&mut server).await, "");

        h.run(Command::Nick("lain".into())).await.unwrap();
        assert_eq!(drain(&mut server).await, "NICK lain\r\n");
        assert_eq!(h.conn.nick(), "lain");
    }

    #[tokio::test]
    async fn test_nick_while_disconnected_applies_at_next_login() {
        let mut h = Harness::new();
        h.run(Command::Nick("lain".into())).await.unwrap();
        assert_eq!(h.connector.attempts.load(Ordering::SeqCst), 0);

        h.run(Command::Connect(String::new())).await.unwrap();
        let mut server = h.servers.recv().await.unwrap();
        assert_eq!(drain(&mut server).await, "NICK lain\r\nUSER lain 8 * :user\r\n");
    }

    #[tokio::test]
    async fn test_connect_to_live_session_is_rejected() {
        let mut h = Harness::new();
        let mut server = h.connected().await;

        let err = h
            .run(Command::Connect("irc.example.net:6667".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::AlreadyConnected(_)));
        assert_eq!(drain(&mut server).await, "PING irc.example.net\r\n");
        assert_eq!(h.connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_elsewhere_replaces_session() {
        let mut h = Harness::new();
        let mut first = h.connected().await;
        h.run(Command::Join("#a".into())).await.unwrap();
        drain(&mut first).await;
        let old_generation = h.dispatcher.current_generation().unwrap();

        h.run(Command::Connect("irc.other.net:7000".into())).await.unwrap();
        assert_eq!(drain(&mut first).await, "QUIT\r\n");
        assert_eq!(h.conn.host(), "irc.other.net");
        assert_eq!(h.conn.port(), 7000);
        assert!(h.registry.is_empty());
        assert!(h.dispatcher.current_generation().unwrap() > old_generation);

        let mut second = h.servers.recv().await.unwrap();
        assert_eq!(drain(&mut second).await, "NICK user\r\nUSER user 8 * :user\r\n");
    }

    #[tokio::test]
    async fn test_refused_connect_keeps_dispatcher_usable() {
        let mut h = Harness::new();
        h.connector.refuse.store(true, Ordering::SeqCst);
        let err = h.run(Command::Connect("irc.example.net".into())).await.unwrap_err();
        assert!(matches!(err, DispatchError::Connection(ConnError::Refused { .. })));
        assert_eq!(h.conn.state(), SessionState::Disconnected);
        assert!(h.dispatcher.reader_finished());
    }

    #[tokio::test]
    async fn test_disconnect() {
        let mut h = Harness::new();
        let mut server = h.connected().await;
        h.run(Command::Join("#a".into())).await.unwrap();
        drain(&mut server).await;

        assert_eq!(h.run(Command::Disconnect).await.unwrap(), Flow::Continue);
        assert_eq!(drain(&mut server).await, "QUIT\r\n");
        assert!(h.registry.is_empty());
        assert_eq!(h.dispatcher.current_generation(), None);

        let err = h.run(Command::Disconnect).await.unwrap_err();
        assert!(matches!(err, DispatchError::Connection(ConnError::NotConnected)));
    }

    #[tokio::test]
    async fn test_quit_stops_everything() {
        let mut h = Harness::new();
        let mut server = h.connected().await;

        assert_eq!(h.run(Command::Quit).await.unwrap(), Flow::Quit);
        assert_eq!(drain(&mut server).await, "QUIT\r\n");
        assert!(!h.conn.is_connected());
        assert!(h.dispatcher.reader_finished());

        // Quit without a session still exits.
        let mut idle = Harness::new();
        assert_eq!(idle.run(Command::Quit).await.unwrap(), Flow::Quit);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_record() {
        let mut h = Harness::new();
        let record = ControlRecord {
            code: b'Z',
            payload: "x".into(),
        };
        let err = h
            .dispatcher
            .dispatch(record, &mut h.conn, &mut h.registry)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::UnknownAction(b'Z')));
    }
}
