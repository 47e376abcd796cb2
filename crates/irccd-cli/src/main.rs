#![deny(unsafe_code)]

//! irccd CLI: runs the daemon and submits control records to it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use irccd_config::AppConfig;
use irccd_core::control::{self, ControlClient};
use irccd_core::daemon::{Daemon, Exit};
use irccd_core::dispatch::Command;

/// irccd, a small IRC client daemon driven through a local control socket.
#[derive(Parser, Debug)]
#[command(name = "irccd", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "irccd.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the daemon in the foreground.
    Start(StartArgs),

    /// Join a channel and make it the target of `write`.
    Join { channel: String },

    /// Leave a channel.
    Part { channel: String },

    /// Ask the server for its channel list.
    List { filter: Option<String> },

    /// Send a message to the active channel.
    Write {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Change nickname.
    Nick { nick: String },

    /// Connect to `host[:port]`, or reconnect to the current server.
    Connect { server: Option<String> },

    /// Send a PING to the server.
    Ping { token: Option<String> },

    /// Close the server connection but keep the daemon running.
    Disconnect,

    /// Disconnect and stop the daemon.
    Quit,

    /// Validate and display configuration.
    Config {
        /// Show the resolved configuration.
        #[arg(long)]
        show: bool,
    },
}

/// Overrides for the `[server]` section.
#[derive(Args, Debug, Default)]
struct StartArgs {
    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    nick: Option<String>,

    #[arg(long)]
    realname: Option<String>,

    /// Start without connecting; use `irccd connect` later.
    #[arg(long)]
    no_connect: bool,
}

impl StartArgs {
    fn apply(&self, config: &mut AppConfig) -> Result<()> {
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(nick) = &self.nick {
            config.server.nick = nick.clone();
        }
        if let Some(realname) = &self.realname {
            config.server.realname = realname.clone();
        }
        if self.no_connect {
            config.server.connect_on_start = false;
        }
        config.validate().context("invalid command-line override")?;
        Ok(())
    }
}

impl Commands {
    /// The control command this subcommand submits, if any.
    fn control_command(&self) -> Option<Command> {
        Some(match self {
            Commands::Join { channel } => Command::Join(channel.clone()),
            Commands::Part { channel } => Command::Part(channel.clone()),
            Commands::List { filter } => Command::List(filter.clone().unwrap_or_default()),
            Commands::Write { text } => Command::Write(text.join(" ")),
            Commands::Nick { nick } => Command::Nick(nick.clone()),
            Commands::Connect { server } => Command::Connect(server.clone().unwrap_or_default()),
            Commands::Ping { token } => Command::Ping(token.clone().unwrap_or_default()),
            Commands::Disconnect => Command::Disconnect,
            Commands::Quit => Command::Quit,
            Commands::Start(_) | Commands::Config { .. } => return None,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    let filter = match cli.verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    match &cli.command {
        Commands::Start(args) => cmd_start(config, args).await,
        Commands::Config { show } => cmd_config(&cli.config, &config, *show),
        other => match other.control_command() {
            Some(command) => cmd_control(&config, command).await,
            None => Ok(()),
        },
    }
}

async fn cmd_start(mut config: AppConfig, args: &StartArgs) -> Result<()> {
    args.apply(&mut config)?;
    let socket_path = control::socket_path_from_config(&config);
    let record_size = config.control.record_size;

    let daemon = Daemon::new(config);
    let shutdown = daemon.shutdown_sender();
    let control_server = tokio::spawn({
        let records = daemon.control_sender();
        let shutdown_rx = daemon.subscribe_shutdown();
        let path = socket_path.clone();
        async move { control::serve(&path, record_size, records, shutdown_rx).await }
    });

    info!(socket = %socket_path.display(), "Starting irccd daemon");
    let result = daemon.run().await;
    if result.is_err() {
        let _ = shutdown.send(irccd_core::ShutdownSignal);
    }

    match control_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "control channel failed"),
        Err(e) => warn!(error = %e, "control channel task panicked"),
    }

    match result? {
        Exit::Quit => info!("quit"),
        Exit::Shutdown => info!("shut down"),
    }
    Ok(())
}

async fn cmd_control(config: &AppConfig, command: Command) -> Result<()> {
    let client = ControlClient::new(
        control::socket_path_from_config(config),
        config.control.record_size,
    );
    client
        .send(&command.to_record())
        .await
        .with_context(|| format!("failed to submit {}", command.action()))?;
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(config).context("TOML error")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}
