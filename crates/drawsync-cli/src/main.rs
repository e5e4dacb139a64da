use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};

use drawsync_canvas::{protocol, History, Message, PolylineAssembler, Stroke};
use drawsync_client::{ConnectionManager, ConnectionState, Inbound, ManagerOptions};
use drawsync_core::config::Config;
use drawsync_core::RoomId;
use drawsync_relay::RelayState;

mod logging;

#[derive(Parser)]
#[command(
    name = "drawsync",
    about = "Room-scoped relay and client for collaborative drawing",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Relay {
        /// Port to listen on (default: 8765)
        #[arg(long)]
        port: Option<u16>,

        /// Address to bind (default: 0.0.0.0)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Join a room and print everything peers send, one JSON line each
    Watch {
        /// Relay WebSocket URL
        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        room: Option<String>,
    },

    /// Send a prompt to a room
    Prompt {
        text: String,

        /// Relay WebSocket URL
        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        room: Option<String>,

        /// Give up if the relay can't be reached in time
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },

    /// Show relay status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Check the configuration for problems
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(Config::config_path);

    // Logging needs the config, so a load failure is reported after a
    // fallback subscriber is installed.
    let loaded = Config::load(&config_path);
    let logging_config = loaded.as_ref().ok().and_then(|c| c.logging.clone());
    logging::init(logging_config.as_ref(), cli.verbose);
    let config = loaded.with_context(|| format!("loading {}", config_path.display()))?;

    match cli.command {
        Commands::Relay { port, bind } => {
            let mut relay = config.relay();
            if let Some(port) = port {
                relay.port = port;
            }
            if let Some(bind) = bind {
                relay.bind = bind;
            }
            info!("Starting drawsync relay on {}:{}", relay.bind, relay.port);
            drawsync_relay::start_relay(Arc::new(RelayState::new(relay))).await?;
        }
        Commands::Watch { url, room } => {
            let options = client_options(&config, url, room);
            watch(options, config.history_capacity()).await?;
        }
        Commands::Prompt {
            text,
            url,
            room,
            timeout_secs,
        } => {
            let options = client_options(&config, url, room);
            prompt(options, text, Duration::from_secs(timeout_secs)).await?;
        }
        Commands::Status => {
            let relay = config.relay();
            let client = config.client();
            println!("drawsync v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Relay address: {}:{}", relay.bind, relay.port);
            println!("Client URL: {}", client.url);
            println!("Client room: {}", client.room_id());
            match relay_health(&relay.bind, relay.port).await {
                Ok(health) => println!(
                    "Status: running ({} rooms, {} connections)",
                    health["rooms"], health["connections"]
                ),
                Err(e) => {
                    debug!(%e, "Health probe failed");
                    println!("Status: not running");
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Get { key } => match config.get_path(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                None => bail!("{key} is not set"),
            },
            ConfigAction::Validate => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if !errors.is_empty() {
                    bail!("{} invalid setting(s) in {}", errors.len(), config_path.display());
                }
                println!("Config OK: {}", config_path.display());
            }
        },
    }

    Ok(())
}

fn client_options(config: &Config, url: Option<String>, room: Option<String>) -> ManagerOptions {
    let mut options = ManagerOptions::from(&config.client());
    if let Some(url) = url {
        options.url = url;
    }
    if let Some(room) = room {
        options.room = RoomId::parse(Some(&room));
    }
    options
}

async fn watch(options: ManagerOptions, history_capacity: usize) -> anyhow::Result<()> {
    let manager = ConnectionManager::new(options);
    let mut inbound = manager.subscribe();

    let mut status_rx = manager.watch_status();
    let status_log = tokio::spawn(async move {
        while status_rx.changed().await.is_ok() {
            let status = *status_rx.borrow_and_update();
            info!(state = ?status.state, retries = status.retries, "Connection status");
        }
    });

    info!(room = %manager.room(), "Watching room");
    manager.connect();

    // Completed strokes seen so far, newest state last.
    let mut strokes: History<Vec<Stroke>> = History::new(Vec::new(), history_capacity);
    let mut polyline = PolylineAssembler::new();

    loop {
        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = inbound.recv() => next,
        };
        let Some(next) = next else { break };

        match next {
            Inbound::Message(message) => {
                match &message {
                    Message::Draw(event) => {
                        if let Some(segment) = polyline.feed(event) {
                            debug!(?segment.from, ?segment.to, "Segment");
                        }
                    }
                    Message::Stroke { payload } => {
                        let mut next_state = strokes.current().clone();
                        next_state.push(payload.clone());
                        strokes.push(next_state);
                        debug!(id = %payload.id, strokes = strokes.current().len(), "Stroke completed");
                    }
                    Message::Canvas { .. } => {
                        polyline.reset();
                        strokes.push(Vec::new());
                    }
                    Message::Prompt { .. } => {}
                }
                println!("{}", protocol::encode(&message)?);
            }
            Inbound::Binary(data) => {
                println!(
                    "{}",
                    serde_json::json!({ "type": "binary", "bytes": data.len() })
                );
            }
        }
    }

    manager.teardown().await;
    status_log.abort();
    Ok(())
}

async fn prompt(options: ManagerOptions, text: String, timeout: Duration) -> anyhow::Result<()> {
    let manager = ConnectionManager::new(options);
    let mut status_rx = manager.watch_status();
    manager.connect();

    let opened = matches!(
        tokio::time::timeout(
            timeout,
            status_rx.wait_for(|s| s.state == ConnectionState::Open),
        )
        .await,
        Ok(Ok(_))
    );
    if !opened {
        manager.teardown().await;
        bail!("relay unreachable after {}s", timeout.as_secs());
    }

    let sent = manager.send(&Message::Prompt { payload: text });
    manager.teardown().await;
    match sent {
        Ok(()) => {
            info!(room = %manager.room(), "Prompt sent");
            Ok(())
        }
        Err(e) => {
            warn!(%e, "Prompt not sent");
            Err(e.into())
        }
    }
}

async fn relay_health(bind: &str, port: u16) -> anyhow::Result<serde_json::Value> {
    let host = match bind {
        "0.0.0.0" | "::" | "[::]" => "127.0.0.1",
        other => other,
    };
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;
    let health = client
        .get(format!("http://{host}:{port}/health"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(health)
}
