//! nkips - NK router monitor
//!
//! Keeps a session open to an NK-IPS gateway and logs every routing change.

use nkips_client::{Config, DeviceSession, Notification};
use nkips_core::{CrossPointState, LabelStore};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if NKIPS_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(c) => {
            if let Ok(path) = std::env::var("NKIPS_CONFIG") {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    let labels = match &config.labels.path {
        Some(path) if path.exists() => {
            let labels = LabelStore::load(path)?;
            tracing::info!("  Labels: {}", path.display());
            labels
        }
        Some(path) => {
            tracing::warn!("Label file {} not found, starting empty", path.display());
            LabelStore::new()
        }
        None => LabelStore::new(),
    };

    let session_config = config.session_config();
    tracing::info!("Starting nkips monitor");
    tracing::info!("  Gateway: {}", session_config.endpoint());
    tracing::info!("  Router address: {}", session_config.address);
    tracing::info!(
        "  Matrix: {} inputs x {} outputs, {} level(s)",
        session_config.inputs,
        session_config.outputs,
        session_config.levels
    );

    let session = DeviceSession::spawn(session_config, labels);
    let mut notifications = session.subscribe();

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                match notification {
                    Ok(n) => log_notification(&n),
                    Err(RecvError::Lagged(n)) => tracing::warn!("Dropped {} notifications", n),
                    Err(RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, closing session...");
                break;
            }
        }
    }

    session.destroy().await;

    if config.labels.save_on_exit {
        if let Some(path) = &config.labels.path {
            let count = config.device.inputs.max(config.device.outputs);
            match session.labels().save(path, count) {
                Ok(()) => tracing::info!("Labels written to {}", path.display()),
                Err(e) => tracing::error!("Failed to write labels: {}", e),
            }
        }
    }

    tracing::info!("Monitor stopped");
    Ok(())
}

fn log_notification(notification: &Notification) {
    match notification {
        Notification::Ready => tracing::info!("Routing table loaded"),
        Notification::Crosspoint(view) => tracing::info!(
            destination = view.id,
            "{} changed: {}",
            view.label,
            describe_routes(view)
        ),
        Notification::Closed => tracing::info!("Connection closed"),
        Notification::Error(e) => tracing::warn!("Connection error: {}", e),
    }
}

/// One `level=source` pair per tracked level.
fn describe_routes(view: &CrossPointState) -> String {
    view.sources
        .iter()
        .map(|source| match source.id {
            Some(id) => format!("{}={}", source.level.short_name(), id),
            None => format!("{}=-", source.level.short_name()),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
