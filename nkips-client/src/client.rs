//! High-level session API.

use crate::connection::{command_channel, Command, Driver, SessionConfig, Shared};
use crate::error::ClientError;
use crate::notification::Notification;
use crate::session::{ConnectionStatus, SessionState};
use nkips_core::{CrossPointState, Label, LabelStore, LabelUpdate, PortKind};
use nkips_protocol::{Level, SetCrosspoint};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Outcome of a crosspoint change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SetResult {
    /// The destination after the change.
    pub state: CrossPointState,
    /// Whether the router reported the change before the confirmation
    /// timeout. When `false`, `state` is the cached (optimistic) view.
    pub confirmed: bool,
}

/// A live session with one router.
///
/// The session connects in the background and reconnects on its own until
/// [`destroy`](Self::destroy) is called or the handle is dropped.
pub struct DeviceSession {
    config: SessionConfig,
    shared: Arc<Shared>,
    commands: mpsc::Sender<Command>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceSession {
    /// Starts a session. Must be called from within a tokio runtime.
    pub fn spawn(config: SessionConfig, labels: LabelStore) -> Self {
        let shared = Arc::new(Shared::new(SessionState::new(&config, labels)));
        let (commands, command_rx) = command_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let driver = Driver::new(config.clone(), shared.clone(), command_rx, shutdown_rx);
        let task = tokio::spawn(driver.run());

        Self {
            config,
            shared,
            commands,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribes to notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.shared.notifications.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    /// Subscribes to status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Whether the handshake completed on the current connection.
    pub fn is_ready(&self) -> bool {
        self.shared.state.read().is_ready()
    }

    /// Configured levels, in list order.
    pub fn levels(&self) -> Vec<Level> {
        self.shared.state.read().matrix().levels().to_vec()
    }

    /// Waits until a routing table was received on the current connection.
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut notifications = self.subscribe();
        if self.shared.state.read().table_loaded() {
            return Ok(());
        }

        tokio::time::timeout(timeout, async {
            loop {
                match notifications.recv().await {
                    Ok(Notification::Ready) => return Ok(()),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        if self.shared.state.read().table_loaded() {
                            return Ok(());
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return Err(ClientError::ShutDown),
                }
            }
        })
        .await
        .map_err(|_| ClientError::Timeout)?
    }

    /// Returns the cached view of a destination.
    pub fn get_crosspoint(&self, destination: u16) -> CrossPointState {
        self.shared.state.read().crosspoint(destination)
    }

    /// Returns the cached views of several destinations, in order.
    pub fn get_crosspoints(&self, destinations: &[u16]) -> Vec<CrossPointState> {
        let state = self.shared.state.read();
        destinations
            .iter()
            .map(|&destination| state.crosspoint(destination))
            .collect()
    }

    /// Routes `source` to `destination` on `level`.
    ///
    /// Resolves once the router reports the change, or after the
    /// confirmation timeout with the cached view.
    pub async fn set_crosspoint(
        &self,
        level: Level,
        destination: u16,
        source: u16,
    ) -> Result<SetResult, ClientError> {
        {
            let state = self.shared.state.read();
            if state.is_shutdown() {
                return Err(ClientError::ShutDown);
            }
            if !state.is_ready() {
                return Err(ClientError::NotConnected);
            }
        }

        let request = SetCrosspoint::new(level, destination, source);
        // Unregisters itself on every early return below.
        let mut confirmation = self.shared.pending.register(level, destination);

        let (reply, written) = oneshot::channel();
        self.commands
            .send(Command::SetCrosspoint { request, reply })
            .await
            .map_err(|_| ClientError::ShutDown)?;
        written.await.map_err(|_| ClientError::ShutDown)??;

        match tokio::time::timeout(self.config.confirm_timeout, confirmation.wait()).await {
            Ok(Ok(state)) => {
                return Ok(SetResult {
                    state,
                    confirmed: true,
                })
            }
            Ok(Err(_)) => tracing::debug!("confirmation dropped for destination {}", destination),
            Err(_) => tracing::debug!(
                "no confirmation for {} destination {} within {:?}",
                level,
                destination,
                self.config.confirm_timeout
            ),
        }

        Ok(SetResult {
            state: self.get_crosspoint(destination),
            confirmed: false,
        })
    }

    pub fn label(&self, kind: PortKind, id: u16) -> Label {
        self.shared.state.read().label(kind, id)
    }

    /// Updates a label; views composed afterwards carry it.
    pub fn set_label(
        &self,
        kind: PortKind,
        id: u16,
        update: LabelUpdate,
    ) -> Result<Label, ClientError> {
        self.shared.state.write().set_label(kind, id, update)
    }

    /// Snapshot of the label store.
    pub fn labels(&self) -> LabelStore {
        self.shared.state.read().labels().clone()
    }

    /// Labels of every port in `.lbl` format.
    pub fn labels_lbl(&self) -> String {
        self.shared.state.read().labels_lbl()
    }

    /// Stops the session: no further reconnects, socket closed, timers
    /// cancelled. Idempotent.
    pub async fn destroy(&self) {
        self.shutdown.send_replace(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!("session task failed: {}", e);
            }
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
