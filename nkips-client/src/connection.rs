//! Connection management.
//!
//! One task per session owns the socket. It runs [`SessionState`]
//! transitions for every socket event, timer tick and queued command, and
//! carries out the returned effects in order.

use crate::error::ClientError;
use crate::notification::Notification;
use crate::pending::PendingTable;
use crate::session::{ConnectionStatus, Effect, Phase, SessionState};
use bytes::BytesMut;
use nkips_protocol::message::KEEPALIVE;
use nkips_protocol::{SetCrosspoint, DEFAULT_ADDRESS, DEFAULT_INPUTS, DEFAULT_LEVELS, DEFAULT_OUTPUTS};
use parking_lot::RwLock;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use std::pin::Pin;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};

/// Default read buffer size (4 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 4 * 1024;

/// Minimum read buffer size (256 bytes).
pub const MIN_READ_BUFFER_SIZE: usize = 256;

/// Maximum read buffer size (64 KiB).
pub const MAX_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Capacity of the notification channel.
const NOTIFICATION_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the command queue.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Gateway host name or address.
    pub host: String,
    /// Gateway TCP port.
    pub port: u16,
    /// TBUS address of the router.
    pub address: u8,
    /// Number of router inputs (sources).
    pub inputs: u16,
    /// Number of router outputs (destinations).
    pub outputs: u16,
    /// Number of levels tracked, from the start of the level list.
    pub levels: u8,
    /// Delay between a close and the next connection attempt.
    pub reconnect_delay: Duration,
    /// Interval between keepalive pings.
    pub keepalive_interval: Duration,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// How long `set_crosspoint` waits for the router to confirm.
    pub confirm_timeout: Duration,
    /// How long a partial table dump waits for more bytes before it is
    /// applied as it is.
    pub partial_timeout: Duration,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            address: DEFAULT_ADDRESS,
            inputs: DEFAULT_INPUTS,
            outputs: DEFAULT_OUTPUTS,
            levels: DEFAULT_LEVELS,
            reconnect_delay: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            confirm_timeout: Duration::from_millis(500),
            partial_timeout: Duration::from_millis(200),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    pub fn with_ports(mut self, inputs: u16, outputs: u16) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }

    pub fn with_levels(mut self, levels: u8) -> Self {
        self.levels = levels;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn with_partial_timeout(mut self, timeout: Duration) -> Self {
        self.partial_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    /// `host:port` of the gateway.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// State shared between the session task and its handle.
pub(crate) struct Shared {
    pub(crate) state: RwLock<SessionState>,
    pub(crate) pending: PendingTable,
    pub(crate) notifications: broadcast::Sender<Notification>,
    pub(crate) status: watch::Sender<ConnectionStatus>,
}

impl Shared {
    pub(crate) fn new(state: SessionState) -> Self {
        let (notifications, _) = broadcast::channel(NOTIFICATION_CHANNEL_CAPACITY);
        let (status, _) = watch::channel(state.status());
        Self {
            state: RwLock::new(state),
            pending: PendingTable::new(),
            notifications,
            status,
        }
    }

    /// Publishes the current status if it changed.
    fn publish_status(&self) {
        let current = self.state.read().status();
        self.status.send_if_modified(|status| {
            if *status == current {
                return false;
            }
            tracing::debug!("status {} -> {}", status, current);
            *status = current;
            true
        });
    }
}

/// Request queued for the session task.
pub(crate) enum Command {
    SetCrosspoint {
        request: SetCrosspoint,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
}

impl Command {
    fn reject(self, error: ClientError) {
        match self {
            Command::SetCrosspoint { reply, .. } => {
                let _ = reply.send(Err(error));
            }
        }
    }
}

/// Creates the command queue of a session.
pub(crate) fn command_channel() -> (mpsc::Sender<Command>, mpsc::Receiver<Command>) {
    mpsc::channel(COMMAND_CHANNEL_CAPACITY)
}

/// An open socket and its keepalive timer.
struct Link {
    writer: OwnedWriteHalf,
    keepalive: Option<Interval>,
    closing: bool,
}

impl Link {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        tracing::trace!("tx {} bytes: {}", bytes.len(), hex::encode(bytes));
        self.writer.write_all(bytes).await
    }
}

/// The session task.
pub(crate) struct Driver {
    config: SessionConfig,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
    reconnect: Option<Duration>,
}

impl Driver {
    pub(crate) fn new(
        config: SessionConfig,
        shared: Arc<Shared>,
        commands: mpsc::Receiver<Command>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            shared,
            commands,
            shutdown,
            reconnect: None,
        }
    }

    /// Connects, serves and reconnects until shutdown.
    pub(crate) async fn run(mut self) {
        let endpoint = self.config.endpoint();
        tracing::debug!("session task started for {}", endpoint);

        while !self.shutdown_requested() {
            let effects = self.shared.state.write().begin_connect();
            let _ = self.apply(effects, None).await;
            self.shared.publish_status();

            tracing::debug!("connecting to {}...", endpoint);
            let connected = tokio::select! {
                result = connect(&self.config) => Some(result),
                _ = shutdown_signal(&mut self.shutdown) => None,
            };

            match connected {
                Some(Ok(stream)) => self.serve(stream).await,
                Some(Err(e)) => {
                    tracing::debug!("connection to {} failed: {}", endpoint, e);
                    self.fail(&e.to_string()).await;
                    self.closed().await;
                }
                None => break,
            }

            let Some(delay) = self.reconnect.take() else {
                break;
            };
            if !self.wait_reconnect(delay).await {
                break;
            }
        }

        self.finish().await;
    }

    /// Runs one connection until it closes.
    async fn serve(&mut self, stream: TcpStream) {
        let (mut reader, writer) = stream.into_split();
        let mut link = Link {
            writer,
            keepalive: None,
            closing: false,
        };
        let mut buf = BytesMut::with_capacity(self.config.read_buffer_size);
        let mut settle: Option<Pin<Box<Sleep>>> = None;

        tracing::info!("connected to {}", self.config.endpoint());
        let effects = self.shared.state.write().socket_connected();
        let mut result = self.apply(effects, Some(&mut link)).await;
        self.shared.publish_status();

        while result.is_ok() && !link.closing {
            buf.reserve(self.config.read_buffer_size);
            tokio::select! {
                read = reader.read_buf(&mut buf) => match read {
                    Ok(0) => {
                        tracing::debug!("router closed the connection");
                        break;
                    }
                    Ok(n) => {
                        let chunk = buf.split().freeze();
                        tracing::trace!("rx {} bytes: {}", n, hex::encode(&chunk));
                        let (effects, pending) = {
                            let mut state = self.shared.state.write();
                            (state.received(&chunk), state.inbound_pending())
                        };
                        settle = pending
                            .then(|| Box::pin(tokio::time::sleep(self.config.partial_timeout)));
                        result = self.apply(effects, Some(&mut link)).await;
                    }
                    Err(e) => result = Err(e),
                },
                _ = deadline(&mut settle) => {
                    settle = None;
                    let effects = self.shared.state.write().flush_inbound();
                    result = self.apply(effects, Some(&mut link)).await;
                }
                _ = keepalive_tick(&mut link.keepalive) => {
                    result = link.write(KEEPALIVE).await;
                }
                command = self.commands.recv() => match command {
                    Some(command) => result = self.handle_command(command, &mut link).await,
                    None => {
                        let effects = self.shared.state.write().destroy();
                        result = self.apply(effects, Some(&mut link)).await;
                        link.closing = true;
                    }
                },
                _ = shutdown_signal(&mut self.shutdown) => {
                    let effects = self.shared.state.write().destroy();
                    result = self.apply(effects, Some(&mut link)).await;
                    link.closing = true;
                }
            }
            self.shared.publish_status();
        }

        if let Err(e) = result {
            tracing::debug!("socket error: {}", e);
            self.fail(&e.to_string()).await;
        }
        let _ = link.writer.shutdown().await;
        self.closed().await;
    }

    async fn handle_command(&mut self, command: Command, link: &mut Link) -> io::Result<()> {
        match command {
            Command::SetCrosspoint { request, reply } => {
                let frame = self.shared.state.read().set_crosspoint(&request);
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = reply.send(Err(e));
                        return Ok(());
                    }
                };

                tracing::debug!(
                    "set {} destination {} <- source {}",
                    request.level,
                    request.destination,
                    request.source
                );
                match link.write(&frame).await {
                    Ok(()) => {
                        self.shared.state.write().crosspoint_written(&request);
                        let _ = reply.send(Ok(()));
                        Ok(())
                    }
                    Err(e) => {
                        let _ = reply.send(Err(ClientError::ConnectionClosed));
                        Err(e)
                    }
                }
            }
        }
    }

    /// Carries out effects in order.
    async fn apply(&mut self, effects: Vec<Effect>, mut link: Option<&mut Link>) -> io::Result<()> {
        for effect in effects {
            match effect {
                Effect::Write(bytes) => match link.as_deref_mut() {
                    Some(link) => link.write(&bytes).await?,
                    None => tracing::debug!("dropping {} byte write: no socket", bytes.len()),
                },
                Effect::Emit(notification) => {
                    // No subscribers is not an error.
                    let _ = self.shared.notifications.send(notification);
                }
                Effect::StartKeepalive => {
                    if let Some(link) = link.as_deref_mut() {
                        link.keepalive = Some(keepalive_timer(self.config.keepalive_interval));
                    }
                }
                Effect::StopKeepalive => {
                    if let Some(link) = link.as_deref_mut() {
                        link.keepalive = None;
                    }
                }
                Effect::ScheduleReconnect(delay) => self.reconnect = Some(delay),
                Effect::CloseSocket => {
                    if let Some(link) = link.as_deref_mut() {
                        link.closing = true;
                    }
                }
                Effect::Confirmed {
                    level,
                    destination,
                    state,
                } => {
                    let resolved = self.shared.pending.resolve(level, destination, &state);
                    if resolved > 0 {
                        tracing::debug!(
                            "confirmed {} destination {} for {} waiter(s)",
                            level,
                            destination,
                            resolved
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn fail(&mut self, cause: &str) {
        let effects = self.shared.state.write().socket_error(cause);
        let _ = self.apply(effects, None).await;
        self.shared.publish_status();
    }

    async fn closed(&mut self) {
        let effects = self.shared.state.write().socket_closed();
        let _ = self.apply(effects, None).await;
        self.shared.publish_status();
    }

    /// Sleeps out the reconnect delay. Returns `false` on shutdown.
    async fn wait_reconnect(&mut self, delay: Duration) -> bool {
        tracing::debug!("reconnecting in {:?}", delay);
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                _ = shutdown_signal(&mut self.shutdown) => return false,
                command = self.commands.recv() => match command {
                    Some(command) => command.reject(ClientError::NotConnected),
                    None => return false,
                },
            }
        }
    }

    async fn finish(&mut self) {
        let effects = self.shared.state.write().destroy();
        let _ = self.apply(effects, None).await;
        if self.shared.state.read().phase() != Phase::Disconnected {
            self.closed().await;
        }
        self.shared.pending.clear();

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            command.reject(ClientError::ShutDown);
        }

        self.shared.publish_status();
        tracing::debug!("session task stopped");
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }
}

/// Resolves an endpoint and opens a TCP connection with OS keepalive on.
async fn connect(config: &SessionConfig) -> Result<TcpStream, ClientError> {
    let endpoint = config.endpoint();
    let addrs = lookup_host(&endpoint)
        .await
        .map_err(|e| ClientError::Resolve {
            host: config.host.clone(),
            reason: e.to_string(),
        })?;

    let mut last_error = None;
    for addr in addrs {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(true)?;

        match tokio::time::timeout(config.connect_timeout, socket.connect(addr)).await {
            Ok(Ok(stream)) => {
                stream.set_nodelay(true).ok();
                return Ok(stream);
            }
            Ok(Err(e)) => last_error = Some(ClientError::Io(e)),
            Err(_) => last_error = Some(ClientError::Timeout),
        }
    }

    Err(last_error.unwrap_or_else(|| ClientError::Resolve {
        host: config.host.clone(),
        reason: "no addresses".to_string(),
    }))
}

/// Resolves once shutdown is requested or the session handle is gone.
async fn shutdown_signal(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn keepalive_timer(period: Duration) -> Interval {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

async fn deadline(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn keepalive_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::new("nk-ips.local", 5000);
        assert_eq!(config.address, 254);
        assert_eq!(config.inputs, 255);
        assert_eq!(config.outputs, 255);
        assert_eq!(config.levels, 8);
        assert_eq!(config.reconnect_delay, Duration::from_secs(10));
        assert_eq!(config.keepalive_interval, Duration::from_secs(10));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.confirm_timeout, Duration::from_millis(500));
        assert_eq!(config.partial_timeout, Duration::from_millis(200));
        assert_eq!(config.endpoint(), "nk-ips.local:5000");
    }

    #[test]
    fn test_config_clamping() {
        let config = SessionConfig::new("h", 1).with_read_buffer_size(10);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = SessionConfig::new("h", 1).with_read_buffer_size(1 << 30);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);

        let config = SessionConfig::new("h", 1).with_keepalive_interval(Duration::ZERO);
        assert!(config.keepalive_interval > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = SessionConfig::new("127.0.0.1", port);
        assert!(matches!(connect(&config).await, Err(ClientError::Io(_))));
    }

    #[tokio::test]
    async fn test_keepalive_tick_without_timer_never_fires() {
        let mut timer = None;
        let result =
            tokio::time::timeout(Duration::from_millis(20), keepalive_tick(&mut timer)).await;
        assert!(result.is_err());
    }
}
