//! # herald
//!
//! Terminal chat front-end for the news assistant backend. Wires settings,
//! telemetry, the socket transport and the HTTP gateway into a session
//! coordinator and drives it from stdin.

#![deny(unsafe_code)]

mod render;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use herald_client::{CoordinatorConfig, ProtocolClient, SessionCoordinator, SessionHandle};
use herald_gateway::{GatewayConfig, HttpSessionGateway, SessionGateway};
use herald_settings::HeraldSettings;
use herald_telemetry::{init_telemetry, TelemetryConfig};
use herald_transport::{SocketTransport, Transport, TransportConfig};

use crate::render::{Input, Printer, HELP};

/// Chat with the news assistant from the terminal.
#[derive(Parser, Debug)]
#[command(name = "herald", about = "News assistant chat client", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Backend base URL (overrides settings and HERALD_BACKEND_URL).
    #[arg(long, global = true)]
    backend_url: Option<String>,

    /// Default log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Settings file (defaults to ~/.herald/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Interactive chat session (default).
    Chat,
    /// Probe backend health and exit non-zero on failure.
    Health,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut HeraldSettings) {
        if let Some(url) = &self.backend_url {
            settings.backend.url.clone_from(url);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn gateway_config(settings: &HeraldSettings) -> GatewayConfig {
    GatewayConfig::new(settings.backend.url.clone())
        .with_api_prefix(settings.backend.api_prefix.clone())
        .with_timeout(settings.backend.request_timeout())
}

fn transport_config(settings: &HeraldSettings) -> TransportConfig {
    let t = &settings.transport;
    let mut config = TransportConfig::new(settings.backend.url.clone())
        .with_reconnection(
            t.reconnection_attempts,
            std::time::Duration::from_millis(t.reconnection_delay_ms),
        )
        .with_connect_timeout(std::time::Duration::from_millis(t.connect_timeout_ms));
    config.socket_path.clone_from(&t.socket_path);
    config
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli
        .settings
        .clone()
        .unwrap_or_else(herald_settings::settings_path);
    let mut settings = herald_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    cli.apply_overrides(&mut settings);

    let telemetry = TelemetryConfig::from_names(
        &settings.logging.level,
        settings
            .logging
            .module_levels
            .iter()
            .map(|(module, level)| (module.as_str(), level.as_str())),
        settings.logging.json,
    );
    if let Err(e) = init_telemetry(&telemetry) {
        eprintln!("warning: {e}");
    }

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(&settings).await,
        Command::Health => run_health(&settings).await,
    }
}

async fn run_health(settings: &HeraldSettings) -> Result<()> {
    let gateway = HttpSessionGateway::new(gateway_config(settings))?;
    let health = gateway
        .health()
        .await
        .with_context(|| format!("Backend at {} is not healthy", settings.backend.url))?;
    println!(
        "{} is up ({}{})",
        settings.backend.url,
        health.http_status,
        health.label().map(|l| format!(", {l}")).unwrap_or_default()
    );
    Ok(())
}

async fn run_chat(settings: &HeraldSettings) -> Result<()> {
    let transport: Arc<dyn Transport> =
        Arc::new(SocketTransport::new(transport_config(settings)));
    let gateway: Arc<dyn SessionGateway> = Arc::new(
        HttpSessionGateway::new(gateway_config(settings)).context("Invalid backend URL")?,
    );
    let protocol = ProtocolClient::new(Arc::clone(&transport));
    let handle = SessionCoordinator::spawn(
        transport,
        gateway,
        protocol,
        CoordinatorConfig {
            chat: settings.chat.clone(),
        },
    );
    info!(backend = %settings.backend.url, "chat started");

    let result = chat_loop(&handle).await;
    handle.shutdown().await;
    result
}

async fn chat_loop(handle: &SessionHandle) -> Result<()> {
    let mut updates = handle.watch();
    let mut printer = Printer::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("{HELP}");
    let initial = updates.borrow_and_update().clone();
    print_lines(printer.render(&initial));

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("coordinator stopped");
                    return Ok(());
                }
                let snapshot = updates.borrow_and_update().clone();
                print_lines(printer.render(&snapshot));
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    return Ok(());
                };
                match Input::parse(&line) {
                    Input::Blank => {}
                    Input::Quit => return Ok(()),
                    Input::Help => println!("{HELP}"),
                    Input::Unknown(command) => println!("unknown command /{command}. {HELP}"),
                    Input::Status => println!("{}", render::status_line(&handle.snapshot())),
                    Input::Reset => {
                        let _ = spawn_reset(handle);
                    }
                    Input::Message(text) => {
                        if let Err(e) = handle.send(text).await {
                            println!("! {e}");
                        }
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

/// Reset in the background; the loop keeps printing and handling Ctrl-C
/// while the session request is pending.
fn spawn_reset(handle: &SessionHandle) -> tokio::task::JoinHandle<()> {
    let handle = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = handle.reset().await {
            println!("! {e}");
        }
    })
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{line}");
    }
}
