//! nkips-cli - Command-line interface for NK routers
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use nkips_client::{Config, DeviceSession, Notification};
use nkips_core::{LabelStore, LabelUpdate, PortKind};
use nkips_protocol::Level;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nkips-cli")]
#[command(about = "Command-line interface for NK routers behind an NK-IPS gateway")]
#[command(version)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "NKIPS_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway host name or address
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Gateway TCP port
    #[arg(short, long)]
    port: Option<u16>,

    /// TBUS address of the router
    #[arg(short, long)]
    address: Option<u8>,

    /// Number of router inputs
    #[arg(long)]
    inputs: Option<u16>,

    /// Number of router outputs
    #[arg(long)]
    outputs: Option<u16>,

    /// Number of levels tracked
    #[arg(long)]
    levels: Option<u8>,

    /// Label file (.lbl)
    #[arg(short, long)]
    labels: Option<PathBuf>,

    /// Seconds to wait for the routing table
    #[arg(long, default_value_t = 15)]
    wait: u64,

    /// Print JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl,

    /// List the configured levels
    Levels,

    /// Show the sources routed to destinations
    Get {
        /// Destination ids (all destinations when empty)
        destinations: Vec<u16>,
    },

    /// Route a source to a destination
    Set {
        /// Level: name, short name, 1-based position or 0x mask
        level: Level,
        /// Destination id
        destination: u16,
        /// Source id
        source: u16,
    },

    /// Print notifications as JSON lines until interrupted
    Watch,

    /// Print the label file
    Labels,

    /// Update the label of a port in the label file
    Label {
        /// input or output
        kind: PortKind,
        /// Port id
        id: u16,
        /// New label
        label: String,
        /// New description
        #[arg(short, long)]
        description: Option<String>,
    },
}

impl Cli {
    /// Layers the command line over the file and environment configuration.
    fn load_config(&self) -> Result<Config, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => {
                let mut config = Config::from_file(path)?;
                config.apply_env_overrides();
                config
            }
            None => Config::from_env(),
        };

        if let Some(host) = &self.host {
            config.device.host = host.clone();
        }
        if let Some(port) = self.port {
            config.device.port = port;
        }
        if let Some(address) = self.address {
            config.device.address = address;
        }
        if let Some(inputs) = self.inputs {
            config.device.inputs = inputs;
        }
        if let Some(outputs) = self.outputs {
            config.device.outputs = outputs;
        }
        if let Some(levels) = self.levels {
            config.device.levels = levels;
        }
        if let Some(labels) = &self.labels {
            config.labels.path = Some(labels.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn load_labels(config: &Config) -> Result<LabelStore, Box<dyn std::error::Error>> {
    match &config.labels.path {
        Some(path) if path.exists() => Ok(LabelStore::load(path)?),
        _ => Ok(LabelStore::new()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Configuration error".red(), e);
            std::process::exit(1);
        }
    };
    let mut labels = load_labels(&config)?;

    // Commands that never touch the router
    match &cli.command {
        Some(Commands::Levels) => {
            let levels = Level::first(config.device.levels as usize);
            println!("{}", commands::format_levels(levels, cli.json)?);
            return Ok(());
        }
        Some(Commands::Labels) => {
            let count = config.device.inputs.max(config.device.outputs);
            println!("{}", labels.to_lbl(count));
            return Ok(());
        }
        Some(Commands::Label {
            kind,
            id,
            label,
            description,
        }) => {
            let Some(path) = config.labels.path.clone() else {
                eprintln!("{}: no label file configured (--labels)", "Error".red());
                std::process::exit(1);
            };
            let mut update = LabelUpdate::label(label.clone());
            if let Some(description) = description {
                update = update.with_description(description.clone());
            }
            let updated = labels.set(*kind, *id, update)?;
            labels.save(&path, config.device.inputs.max(config.device.outputs))?;
            println!(
                "{} {} {} = {}",
                "Updated".green(),
                kind,
                id.to_string().cyan(),
                updated.label.yellow()
            );
            return Ok(());
        }
        _ => {}
    }

    let wait = Duration::from_secs(cli.wait);
    let session = DeviceSession::spawn(config.session_config(), labels);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(&session, &config, wait).await?;
        }
        Some(Commands::Watch) => {
            let mut notifications = session.subscribe();
            eprintln!(
                "{} {}",
                "Watching".green(),
                config.session_config().endpoint().cyan()
            );
            eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

            // Stream notifications until interrupted
            loop {
                tokio::select! {
                    notification = notifications.recv() => {
                        match notification {
                            Ok(n) => println!("{}", serde_json::to_string(&n)?),
                            Err(RecvError::Lagged(n)) => {
                                eprintln!("{}: lagged {} notifications", "Warning".yellow(), n);
                            }
                            Err(RecvError::Closed) => {
                                eprintln!("{}", "Session closed".red());
                                break;
                            }
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        eprintln!("\n{}", "Stopping watch...".dimmed());
                        break;
                    }
                }
            }
        }
        Some(cmd) => {
            // One-shot commands need the routing table first
            if let Err(e) = wait_for_table(&session, wait).await {
                eprintln!("{}: {}", "Connection failed".red(), e);
                session.destroy().await;
                std::process::exit(1);
            }

            match commands::execute(&session, cmd, cli.json).await {
                Ok(output) => println!("{}", output),
                Err(e) => {
                    eprintln!("{}: {}", "Error".red(), e);
                    session.destroy().await;
                    std::process::exit(1);
                }
            }
        }
    }

    session.destroy().await;
    Ok(())
}

/// Waits for the routing table, surfacing the session's last socket error
/// instead of a bare timeout when the gateway is unreachable.
async fn wait_for_table(
    session: &DeviceSession,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut notifications = session.subscribe();
    let ready = session.wait_ready(wait);
    tokio::pin!(ready);

    let mut last_error: Option<String> = None;
    loop {
        tokio::select! {
            result = &mut ready => {
                return match (result, last_error) {
                    (Ok(()), _) => Ok(()),
                    (Err(_), Some(error)) => Err(error.into()),
                    (Err(e), None) => Err(e.into()),
                };
            }
            Ok(Notification::Error(error)) = notifications.recv() => {
                tracing::debug!("session error while waiting: {}", error);
                last_error = Some(error);
            }
        }
    }
}
