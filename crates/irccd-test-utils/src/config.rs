//! Configuration builders for tests.

use irccd_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// Starts from defaults tuned for tests: a 1ms reader retry interval and a
/// small failure budget, so exhaustion paths finish quickly.
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .host("irc.example.net")
///     .nick("lain")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = AppConfig::default();
        config.reader.retry_interval_ms = 1;
        config.reader.ping_timeout = 5;
        Self { config }
    }

    pub fn host(mut self, host: &str) -> Self {
        self.config.server.host = host.to_string();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    pub fn nick(mut self, nick: &str) -> Self {
        self.config.server.nick = nick.to_string();
        self
    }

    pub fn realname(mut self, realname: &str) -> Self {
        self.config.server.realname = realname.to_string();
        self
    }

    pub fn connect_on_start(mut self, enabled: bool) -> Self {
        self.config.server.connect_on_start = enabled;
        self
    }

    pub fn ping_timeout(mut self, failures: u32) -> Self {
        self.config.reader.ping_timeout = failures;
        self
    }

    pub fn retry_interval_ms(mut self, ms: u64) -> Self {
        self.config.reader.retry_interval_ms = ms;
        self
    }

    pub fn tick_secs(mut self, secs: u64) -> Self {
        self.config.daemon.tick_secs = secs;
        self
    }

    pub fn socket_path(mut self, path: &str) -> Self {
        self.config.control.socket_path = path.to_string();
        self
    }

    pub fn record_size(mut self, size: usize) -> Self {
        self.config.control.record_size = size;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
