//! # nkips-client
//!
//! Session client for an NK router behind an NK-IPS gateway.
//!
//! This crate provides:
//! - A pure session state machine (handshake, keepalive, reconnect)
//! - The tokio task that drives it over TCP
//! - The [`DeviceSession`] API: cached crosspoint reads, confirmed writes,
//!   typed notifications and status updates
//! - Layered configuration (defaults, YAML file, environment)

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod notification;
pub mod pending;
pub mod session;

#[cfg(test)]
mod mock;

pub use client::{DeviceSession, SetResult};
pub use config::{Config, ConfigError};
pub use connection::SessionConfig;
pub use error::ClientError;
pub use notification::Notification;
pub use session::{ConnectionStatus, Effect, Phase, SessionState};
