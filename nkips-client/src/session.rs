//! Session state machine.
//!
//! [`SessionState`] holds everything a session knows (phase, status,
//! routing matrix, labels) and never touches a socket. Each transition
//! returns the [`Effect`]s the driver must carry out, in order. Tests feed
//! it synthetic byte sequences directly.
//!
//! ```text
//! Disconnected -> Connecting -> Handshaking -> Ready
//!       ^                                        |
//!       +---------- socket closed / error -------+
//! ```

use crate::connection::SessionConfig;
use crate::error::ClientError;
use crate::notification::Notification;
use bytes::Bytes;
use nkips_core::{CrossPointState, Label, LabelStore, LabelUpdate, PortKind, RoutingMatrix};
use nkips_protocol::message::TABLE_LEVEL;
use nkips_protocol::{Decoded, Decoder, Encoder, Inbound, Level, SetCrosspoint};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Connection health as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Shut down with `destroy()`.
    Disabled,
    /// Never connected.
    Unknown,
    Disconnected,
    Connecting,
    Ok,
    Error,
    /// Connected, but the last frame could not be decoded.
    Warning,
}

impl ConnectionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Disabled => "Disabled",
            ConnectionStatus::Unknown => "Unknown",
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting",
            ConnectionStatus::Ok => "OK",
            ConnectionStatus::Error => "Error",
            ConnectionStatus::Warning => "Warning",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol phase of the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Disconnected,
    Connecting,
    /// Socket open, waiting for `Welcome`.
    Handshaking,
    /// Handshake sent; frames are interpreted.
    Ready,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write bytes to the socket.
    Write(Bytes),
    /// Publish a notification.
    Emit(Notification),
    /// Start the keepalive timer of this connection.
    StartKeepalive,
    /// Stop the keepalive timer.
    StopKeepalive,
    /// Connect again after the delay.
    ScheduleReconnect(Duration),
    /// Close the socket.
    CloseSocket,
    /// The router reported this crosspoint; resolves waiting commands.
    Confirmed {
        level: Level,
        destination: u16,
        state: CrossPointState,
    },
}

/// State of one device session.
#[derive(Debug)]
pub struct SessionState {
    encoder: Encoder,
    decoder: Decoder,
    matrix: RoutingMatrix,
    labels: LabelStore,
    reconnect_delay: Duration,
    status: ConnectionStatus,
    phase: Phase,
    handshake_complete: bool,
    table_loaded: bool,
    shutdown: bool,
}

impl SessionState {
    pub fn new(config: &SessionConfig, labels: LabelStore) -> Self {
        Self {
            encoder: Encoder::new(config.address),
            decoder: Decoder::new(config.outputs),
            matrix: RoutingMatrix::new(config.inputs, config.outputs, config.levels as usize),
            labels,
            reconnect_delay: config.reconnect_delay,
            status: ConnectionStatus::Unknown,
            phase: Phase::Disconnected,
            handshake_complete: false,
            table_loaded: false,
            shutdown: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_ready(&self) -> bool {
        self.handshake_complete
    }

    /// Whether a full table arrived on the current connection.
    pub fn table_loaded(&self) -> bool {
        self.table_loaded
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown
    }

    pub fn matrix(&self) -> &RoutingMatrix {
        &self.matrix
    }

    pub fn labels(&self) -> &LabelStore {
        &self.labels
    }

    /// A connection attempt starts.
    pub fn begin_connect(&mut self) -> Vec<Effect> {
        if self.shutdown {
            return Vec::new();
        }
        self.phase = Phase::Connecting;
        self.status = ConnectionStatus::Connecting;
        Vec::new()
    }

    /// The socket connected.
    pub fn socket_connected(&mut self) -> Vec<Effect> {
        self.phase = Phase::Handshaking;
        self.status = ConnectionStatus::Ok;
        self.handshake_complete = false;
        self.decoder.clear();
        vec![
            Effect::Write(self.encoder.identification()),
            Effect::StartKeepalive,
        ]
    }

    /// A chunk of bytes arrived.
    pub fn received(&mut self, chunk: &[u8]) -> Vec<Effect> {
        if !self.handshake_complete {
            return self.received_before_handshake(chunk);
        }

        let mut effects = Vec::new();
        for decoded in self.decoder.decode(chunk) {
            self.apply_message(decoded, &mut effects);
        }
        effects
    }

    /// Whether part of a table dump is waiting for more bytes.
    pub fn inbound_pending(&self) -> bool {
        self.decoder.has_partial()
    }

    /// No more bytes arrived for a held dump; applies it as it is.
    pub fn flush_inbound(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(decoded) = self.decoder.flush() {
            tracing::debug!("flushing {} held bytes", decoded.len);
            self.apply_message(decoded, &mut effects);
        }
        effects
    }

    fn apply_message(&mut self, decoded: Decoded, effects: &mut Vec<Effect>) {
        match decoded.message {
            Ok(Inbound::Welcome) => {
                tracing::debug!("ignoring repeated welcome banner");
            }
            Ok(Inbound::Crosspoint(change)) => {
                self.recover();
                if let Err(e) = self
                    .matrix
                    .set(change.level, change.destination, change.source)
                {
                    tracing::warn!("discarding crosspoint change: {}", e);
                    return;
                }
                let state = self.crosspoint(change.destination);
                tracing::debug!(
                    "{} destination {} <- source {}",
                    change.level,
                    change.destination,
                    change.source
                );
                effects.push(Effect::Emit(Notification::Crosspoint(state.clone())));
                effects.push(Effect::Confirmed {
                    level: change.level,
                    destination: change.destination,
                    state,
                });
            }
            Ok(Inbound::Table(dump)) => {
                self.recover();
                match self.matrix.apply_table(TABLE_LEVEL, dump.entries()) {
                    Ok(applied) => {
                        tracing::info!(
                            "routing table received: {} of {} destinations on {}",
                            applied,
                            dump.len(),
                            TABLE_LEVEL
                        );
                        self.table_loaded = true;
                        effects.push(Effect::Emit(Notification::Ready));
                    }
                    Err(e) => tracing::warn!("discarding routing table: {}", e),
                }
            }
            Err(e) => {
                tracing::warn!("discarding frame ({} bytes): {}", decoded.len, e);
                self.status = ConnectionStatus::Warning;
            }
        }
    }

    fn received_before_handshake(&mut self, chunk: &[u8]) -> Vec<Effect> {
        if !matches!(Inbound::parse(chunk), Ok(Inbound::Welcome)) {
            tracing::debug!("ignoring {} bytes before welcome", chunk.len());
            return Vec::new();
        }

        match self.encoder.handshake() {
            Ok(frame) => {
                self.handshake_complete = true;
                self.phase = Phase::Ready;
                tracing::debug!("welcome received, sending handshake");
                vec![Effect::Write(frame.freeze())]
            }
            Err(e) => {
                tracing::warn!("cannot encode handshake: {}", e);
                self.status = ConnectionStatus::Warning;
                Vec::new()
            }
        }
    }

    /// A well-formed frame clears a previous warning.
    fn recover(&mut self) {
        if self.status == ConnectionStatus::Warning {
            self.status = ConnectionStatus::Ok;
        }
    }

    /// The socket failed. Reconnect is driven by the close that follows.
    pub fn socket_error(&mut self, cause: &str) -> Vec<Effect> {
        if !self.shutdown {
            self.status = ConnectionStatus::Error;
        }
        vec![Effect::Emit(Notification::Error(cause.to_string()))]
    }

    /// The socket closed.
    pub fn socket_closed(&mut self) -> Vec<Effect> {
        self.phase = Phase::Disconnected;
        self.decoder.clear();
        self.handshake_complete = false;
        self.table_loaded = false;
        if matches!(
            self.status,
            ConnectionStatus::Ok | ConnectionStatus::Warning | ConnectionStatus::Connecting
        ) {
            self.status = ConnectionStatus::Disconnected;
        }

        let mut effects = vec![Effect::StopKeepalive, Effect::Emit(Notification::Closed)];
        if !self.shutdown {
            effects.push(Effect::ScheduleReconnect(self.reconnect_delay));
        }
        effects
    }

    /// Stops the session for good. Idempotent.
    pub fn destroy(&mut self) -> Vec<Effect> {
        if self.shutdown {
            return Vec::new();
        }
        self.shutdown = true;
        self.status = ConnectionStatus::Disabled;

        if self.phase == Phase::Disconnected {
            Vec::new()
        } else {
            vec![Effect::StopKeepalive, Effect::CloseSocket]
        }
    }

    /// Validates and encodes a crosspoint command.
    pub fn set_crosspoint(&self, request: &SetCrosspoint) -> Result<Bytes, ClientError> {
        if self.shutdown {
            return Err(ClientError::ShutDown);
        }
        if !self.handshake_complete {
            return Err(ClientError::NotConnected);
        }
        self.matrix
            .validate(request.level, request.destination, request.source)?;

        Ok(self.encoder.set_crosspoint(request)?.freeze())
    }

    /// Applies a command optimistically once it was written.
    pub fn crosspoint_written(&mut self, request: &SetCrosspoint) {
        if let Err(e) = self
            .matrix
            .set(request.level, request.destination, request.source)
        {
            tracing::debug!("optimistic update skipped: {}", e);
        }
    }

    /// Composes the view of one destination.
    pub fn crosspoint(&self, destination: u16) -> CrossPointState {
        CrossPointState::compose(&self.matrix, &self.labels, destination)
    }

    pub fn label(&self, kind: PortKind, id: u16) -> Label {
        self.labels.get(kind, id)
    }

    pub fn set_label(
        &mut self,
        kind: PortKind,
        id: u16,
        update: LabelUpdate,
    ) -> Result<Label, ClientError> {
        Ok(self.labels.set(kind, id, update)?)
    }

    /// Renders labels of every port in `.lbl` format.
    pub fn labels_lbl(&self) -> String {
        let count = self.matrix.inputs().max(self.matrix.outputs());
        self.labels.to_lbl(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nkips_protocol::{CrosspointChange, TableDump};

    fn config() -> SessionConfig {
        SessionConfig::new("127.0.0.1", 5000)
            .with_ports(16, 16)
            .with_reconnect_delay(Duration::from_secs(10))
    }

    fn session() -> SessionState {
        SessionState::new(&config(), LabelStore::parse("2,PGM,,CAM 2,,,").unwrap())
    }

    fn ready_session() -> SessionState {
        let mut state = session();
        state.begin_connect();
        state.socket_connected();
        state.received(b"Welcome");
        state
    }

    fn change(level: Level, destination: u16, source: u16) -> Bytes {
        CrosspointChange {
            level,
            destination,
            source,
        }
        .encode(254)
        .unwrap()
    }

    fn writes(effects: &[Effect]) -> Vec<Bytes> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_connect_sends_identification() {
        let mut state = session();
        assert_eq!(state.status(), ConnectionStatus::Unknown);

        state.begin_connect();
        assert_eq!(state.status(), ConnectionStatus::Connecting);
        assert_eq!(state.phase(), Phase::Connecting);

        let effects = state.socket_connected();
        assert_eq!(
            effects,
            vec![
                Effect::Write(Bytes::from_static(b"PHOENIX-DB N\n")),
                Effect::StartKeepalive
            ]
        );
        assert_eq!(state.status(), ConnectionStatus::Ok);
        assert_eq!(state.phase(), Phase::Handshaking);
        assert!(!state.is_ready());
    }

    #[test]
    fn test_welcome_triggers_handshake() {
        let mut state = session();
        state.begin_connect();
        state.socket_connected();

        let effects = state.received(b"Welcome to NK-IPS");
        let written = writes(&effects);
        assert_eq!(written.len(), 1);
        assert_eq!(
            &written[0][..],
            b"PAS2\0\x11NK2\0\xfe\x02\x08\x00\x00\x00\x47\xff\xff\xff\xff\xc7\x08"
        );
        assert!(state.is_ready());
        assert_eq!(state.phase(), Phase::Ready);
    }

    #[test]
    fn test_frames_ignored_before_handshake() {
        let mut state = session();
        state.begin_connect();
        state.socket_connected();

        let effects = state.received(&change(Level::MdVideo, 2, 3));
        assert!(effects.is_empty());
        assert_eq!(state.matrix().get(Level::MdVideo, 2), None);
        assert_eq!(state.status(), ConnectionStatus::Ok);
    }

    #[test]
    fn test_change_updates_matrix_and_confirms() {
        let mut state = ready_session();
        let effects = state.received(&change(Level::MdVideo, 2, 2));

        assert_eq!(state.matrix().get(Level::MdVideo, 2), Some(2));
        match &effects[..] {
            [Effect::Emit(Notification::Crosspoint(view)), Effect::Confirmed {
                level,
                destination,
                state: confirmed,
            }] => {
                assert_eq!(view.id, 2);
                assert_eq!(view.label, "PGM");
                assert_eq!(view.sources[0].label, "CAM 2");
                assert_eq!(*level, Level::MdVideo);
                assert_eq!(*destination, 2);
                assert_eq!(confirmed, view);
            }
            other => panic!("unexpected effects {other:?}"),
        }
    }

    #[test]
    fn test_table_dump_emits_ready() {
        let mut state = ready_session();
        let mut sources = vec![None; 16];
        sources[0] = Some(3);
        sources[2] = Some(16);
        let dump = TableDump { sources };

        let effects = state.received(&dump.encode(254));
        assert_eq!(effects, vec![Effect::Emit(Notification::Ready)]);
        assert!(state.table_loaded());
        assert!(!state.inbound_pending());
        assert_eq!(state.matrix().get(Level::MdVideo, 1), Some(3));
        assert_eq!(state.matrix().get(Level::MdVideo, 2), None);
        assert_eq!(state.matrix().get(Level::MdVideo, 3), Some(16));
    }

    #[test]
    fn test_table_dump_split_across_reads() {
        let config = config().with_ports(2000, 2000);
        let mut state = SessionState::new(&config, LabelStore::new());
        state.begin_connect();
        state.socket_connected();
        state.received(b"Welcome");

        let dump = TableDump {
            sources: (1..=2000).map(Some).collect(),
        };
        let encoded = dump.encode(254);
        assert_eq!(encoded.len(), 6018);

        assert!(state.received(&encoded[..4096]).is_empty());
        assert!(state.inbound_pending());
        assert!(!state.table_loaded());

        let effects = state.received(&encoded[4096..]);
        assert_eq!(effects, vec![Effect::Emit(Notification::Ready)]);
        assert_eq!(state.status(), ConnectionStatus::Ok);
        assert_eq!(state.matrix().routed(Level::MdVideo), 2000);
        assert_eq!(state.matrix().get(Level::MdVideo, 2000), Some(2000));
    }

    #[test]
    fn test_short_dump_applied_on_flush() {
        let mut state = ready_session();
        let dump = TableDump {
            sources: vec![Some(5), None, Some(7)],
        };

        assert!(state.received(&dump.encode(254)).is_empty());
        assert!(state.inbound_pending());

        assert_eq!(
            state.flush_inbound(),
            vec![Effect::Emit(Notification::Ready)]
        );
        assert!(!state.inbound_pending());
        assert_eq!(state.matrix().get(Level::MdVideo, 3), Some(7));
        assert!(state.flush_inbound().is_empty());
    }

    #[test]
    fn test_close_drops_held_bytes() {
        let mut state = ready_session();
        let dump = TableDump {
            sources: vec![Some(1); 4],
        };
        state.received(&dump.encode(254));
        assert!(state.inbound_pending());

        state.socket_closed();
        assert!(!state.inbound_pending());
    }

    #[test]
    fn test_malformed_frame_sets_warning_until_next_good_frame() {
        let mut state = ready_session();

        let effects = state.received(b"GARBAGE");
        assert!(effects.is_empty());
        assert_eq!(state.status(), ConnectionStatus::Warning);
        assert!(state.is_ready());

        let mut bad_mask = change(Level::MdVideo, 1, 1).to_vec();
        bad_mask[13] = 0x03;
        state.received(&bad_mask);
        assert_eq!(state.status(), ConnectionStatus::Warning);

        state.received(&change(Level::SdiVideo, 1, 1));
        assert_eq!(state.status(), ConnectionStatus::Ok);
    }

    #[test]
    fn test_close_schedules_reconnect_after_delay() {
        let mut state = ready_session();
        let effects = state.socket_closed();

        assert_eq!(
            effects,
            vec![
                Effect::StopKeepalive,
                Effect::Emit(Notification::Closed),
                Effect::ScheduleReconnect(Duration::from_secs(10)),
            ]
        );
        assert_eq!(state.status(), ConnectionStatus::Disconnected);
        assert_eq!(state.phase(), Phase::Disconnected);
        assert!(!state.is_ready());
    }

    #[test]
    fn test_error_then_close_keeps_error_status() {
        let mut state = ready_session();
        let effects = state.socket_error("connection reset");
        assert_eq!(
            effects,
            vec![Effect::Emit(Notification::Error("connection reset".to_string()))]
        );
        assert_eq!(state.status(), ConnectionStatus::Error);

        let effects = state.socket_closed();
        assert!(effects.contains(&Effect::ScheduleReconnect(Duration::from_secs(10))));
        assert_eq!(state.status(), ConnectionStatus::Error);
    }

    #[test]
    fn test_destroy_is_idempotent_and_stops_reconnect() {
        let mut state = ready_session();

        assert_eq!(
            state.destroy(),
            vec![Effect::StopKeepalive, Effect::CloseSocket]
        );
        assert!(state.destroy().is_empty());
        assert_eq!(state.status(), ConnectionStatus::Disabled);

        let effects = state.socket_closed();
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::ScheduleReconnect(_))));
        assert!(effects.contains(&Effect::Emit(Notification::Closed)));
        assert_eq!(state.status(), ConnectionStatus::Disabled);
        assert!(state.begin_connect().is_empty());
        assert_eq!(state.phase(), Phase::Disconnected);
    }

    #[test]
    fn test_matrix_survives_reconnect_until_next_dump() {
        let mut state = ready_session();
        state.received(&change(Level::MdVideo, 4, 5));
        state.socket_closed();

        assert_eq!(state.matrix().get(Level::MdVideo, 4), Some(5));
        assert!(!state.table_loaded());
    }

    #[test]
    fn test_set_crosspoint_requires_handshake() {
        let mut state = session();
        let request = SetCrosspoint::new(Level::MdVideo, 1, 1);
        assert!(matches!(
            state.set_crosspoint(&request),
            Err(ClientError::NotConnected)
        ));

        state.begin_connect();
        state.socket_connected();
        state.received(b"Welcome");
        let frame = state.set_crosspoint(&request).unwrap();
        assert_eq!(&frame[..5], b"PAS2\0");

        state.destroy();
        assert!(matches!(
            state.set_crosspoint(&request),
            Err(ClientError::ShutDown)
        ));
    }

    #[test]
    fn test_set_crosspoint_validates_before_writing() {
        let mut state = ready_session();
        assert!(matches!(
            state.set_crosspoint(&SetCrosspoint::new(Level::MdVideo, 17, 1)),
            Err(ClientError::Core(_))
        ));
        assert!(matches!(
            state.set_crosspoint(&SetCrosspoint::new(Level::MdVideo, 0, 1)),
            Err(ClientError::Core(_))
        ));

        let request = SetCrosspoint::new(Level::AesAudio1, 3, 9);
        state.set_crosspoint(&request).unwrap();
        assert_eq!(state.matrix().get(Level::AesAudio1, 3), None);

        state.crosspoint_written(&request);
        assert_eq!(state.matrix().get(Level::AesAudio1, 3), Some(9));
    }

    #[test]
    fn test_label_updates_show_in_views() {
        let mut state = ready_session();
        state.received(&change(Level::MdVideo, 1, 2));
        state
            .set_label(PortKind::Output, 1, LabelUpdate::label("AUX"))
            .unwrap();

        let view = state.crosspoint(1);
        assert_eq!(view.label, "AUX");
        assert_eq!(view.sources[0].label, "CAM 2");
        assert!(state.labels_lbl().starts_with("1,AUX,,,,,"));
    }
}
