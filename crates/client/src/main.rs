//! MiniTel Client
//!
//! Command-line front end for MiniTel-Lite v3.0 servers.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use minitel_client::config::{default_config_path, Config};
use minitel_client::{ClientEvent, MiniTelClient};
use minitel_protocol::{Command, Frame};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

/// How long to wait for buffered events to flush after the client is dropped.
const EVENT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// MiniTel Client - talk to a MiniTel-Lite v3.0 server.
#[derive(Parser, Debug)]
#[command(name = "minitel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Server host (overrides config and MINITEL_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Server port (overrides config and MINITEL_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Stream client events to stdout as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a full session: HELLO, DUMP until it succeeds, STOP
    Session {
        /// Maximum number of DUMP requests (defaults to the configured value)
        #[arg(long, value_name = "N")]
        max_dumps: Option<u32>,
    },

    /// Connect, send HELLO and report the acknowledgement
    Hello,

    /// Show the effective configuration
    Config {
        /// Write the effective configuration to the config file
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => Config::load(config_path)?,
        None => Config::load_default()?,
    };

    // Apply environment variable overrides, then command-line flags
    config.apply_env_overrides();
    if let Some(host) = &cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    // Validate configuration
    config.validate()?;

    // Initialize tracing; stdout is reserved for command output
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.log_level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config { write } => {
            if write {
                let path = cli.config.clone().unwrap_or_else(default_config_path);
                config.save(&path)?;
                println!("Configuration written to {}", path.display());
            } else {
                print!("{}", config.to_toml()?);
            }
            Ok(())
        }
        Commands::Hello => {
            let client = config.build_client();
            let printer = spawn_event_printer(client.subscribe(), cli.json);

            let result = run_hello(&client, &config).await;
            client.disconnect().await;
            finish(client, printer).await;

            let ack = result?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "type": "Result", "hello_ack_nonce": ack.nonce })
                );
            } else {
                println!("HELLO_ACK received (nonce {})", ack.nonce);
            }
            Ok(())
        }
        Commands::Session { max_dumps } => {
            let max_dumps = max_dumps.unwrap_or(config.session.max_dump_attempts);
            if max_dumps == 0 {
                anyhow::bail!("--max-dumps must be at least 1");
            }

            let client = config.build_client();
            let printer = spawn_event_printer(client.subscribe(), cli.json);

            let result = run_session(&client, &config, max_dumps).await;
            client.disconnect().await;
            finish(client, printer).await;

            let secret = result?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "type": "Result", "secret": secret })
                );
            } else {
                println!("{}", secret);
            }
            Ok(())
        }
    }
}

async fn connect(client: &MiniTelClient, config: &Config) -> anyhow::Result<()> {
    let server = &config.server;
    client
        .connect(&server.host, server.port, server.connect_timeout())
        .await
        .with_context(|| format!("Failed to connect to {}:{}", server.host, server.port))
}

async fn run_hello(client: &MiniTelClient, config: &Config) -> anyhow::Result<Frame> {
    connect(client, config).await?;
    client.send_hello().await.context("HELLO failed")
}

/// Connects, authenticates and dumps until the server hands over its payload.
async fn run_session(
    client: &MiniTelClient,
    config: &Config,
    max_dumps: u32,
) -> anyhow::Result<String> {
    connect(client, config).await?;
    client.send_hello().await.context("HELLO failed")?;

    let mut secret = None;
    for attempt in 1..=max_dumps {
        let response = client
            .send_dump()
            .await
            .with_context(|| format!("DUMP attempt {} failed", attempt))?;

        if response.known_command() == Some(Command::DumpOk) {
            tracing::info!("DUMP succeeded on attempt {}", attempt);
            secret = Some(response.payload_text().into_owned());
            break;
        }
        tracing::info!("DUMP attempt {}/{} refused", attempt, max_dumps);
    }

    client.send_stop().await.context("STOP failed")?;

    secret.with_context(|| format!("No DUMP_OK after {} attempts", max_dumps))
}

fn spawn_event_printer(mut events: broadcast::Receiver<ClientEvent>, json: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if json => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::warn!("Failed to serialize event: {}", e),
                },
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event printer lagged, skipped {} events", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::Connected => tracing::debug!("event: connected"),
        ClientEvent::Disconnected => tracing::debug!("event: disconnected"),
        ClientEvent::Error(err) => tracing::warn!("event: error ({:?}): {}", err.kind(), err),
        ClientEvent::FrameTransmitted {
            direction,
            command,
            nonce,
            payload_size,
            ..
        } => tracing::debug!(
            "event: {:?} {} nonce={} payload={}B",
            direction,
            command,
            nonce,
            payload_size
        ),
        ClientEvent::FrameReceived(frame) => tracing::trace!(
            "event: frame {} nonce={} ({} bytes)",
            minitel_protocol::command_name(frame.command),
            frame.nonce,
            frame.payload.len()
        ),
    }
}

/// Drops the client so the event channel closes, then lets the printer drain.
async fn finish(client: MiniTelClient, printer: JoinHandle<()>) {
    drop(client);
    if tokio::time::timeout(EVENT_DRAIN_TIMEOUT, printer).await.is_err() {
        tracing::debug!("Event printer did not finish in time");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_session_with_globals() {
        let cli = Cli::try_parse_from([
            "minitel",
            "--host",
            "10.0.0.1",
            "--port",
            "9000",
            "--json",
            "session",
            "--max-dumps",
            "3",
        ])
        .unwrap();

        assert_eq!(cli.host.as_deref(), Some("10.0.0.1"));
        assert_eq!(cli.port, Some(9000));
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Session { max_dumps: Some(3) }
        ));
    }

    #[test]
    fn test_parse_global_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["minitel", "hello", "--verbose"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Hello));
    }

    #[test]
    fn test_parse_config_write() {
        let cli = Cli::try_parse_from(["minitel", "config", "--write"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { write: true }));
    }

    #[test]
    fn test_parse_rejects_invalid_port() {
        assert!(Cli::try_parse_from(["minitel", "--port", "70000", "hello"]).is_err());
    }
}
