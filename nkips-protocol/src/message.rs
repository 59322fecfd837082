//! `NK2` messages exchanged with the gateway.
//!
//! Outbound messages are `PAS2`-enveloped payloads (see [`crate::frame`]).
//! Inbound messages arrive bare, starting with the `NK2` tag:
//!
//! ```text
//! crosspoint change (20 bytes)
//! +-------+----+------+---------+------+--------+------+----------+-------+
//! | "NK2" | 00 | addr | type(3) | dst  |  src   | mask | reserved | crc16 |
//! |   0   | 3  |  4   |   5..8  | 8..10| 10..12 |12..14|  14..18  | 18..20|
//! +-------+----+------+---------+------+--------+------+----------+-------+
//!
//! table dump (any other length)
//! +-------------+---------------------------------+-------+
//! | header (16) | entries, 3 bytes each: src(2) ? | crc16 |
//! +-------------+---------------------------------+-------+
//! ```
//!
//! Ids and sources are 0-based on the wire and 1-based everywhere else.

use crate::crc::crc16;
use crate::error::ProtocolError;
use crate::level::Level;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Tag opening every `NK2` message.
pub const TAG: [u8; 3] = *b"NK2";

/// Banner the gateway sends once it is ready for the handshake.
pub const WELCOME: &[u8] = b"Welcome";

/// Identification banner sent as soon as the socket connects.
pub const IDENTIFICATION: &[u8] = b"PHOENIX-DB N\n";

/// Keepalive ping.
pub const KEEPALIVE: &[u8] = b"HI";

/// Total length of a single crosspoint change message.
pub const CROSSPOINT_MESSAGE_LEN: usize = 20;

/// Header length of a table dump.
pub const TABLE_HEADER_LEN: usize = 16;

/// Length of one table dump entry.
pub const TABLE_ENTRY_LEN: usize = 3;

/// Length of the checksum trailing inbound messages.
pub const TRAILER_LEN: usize = 2;

/// Length of an outbound command payload.
pub const COMMAND_PAYLOAD_LEN: usize = 16;

/// Level whose rows a table dump carries.
pub const TABLE_LEVEL: Level = Level::MdVideo;

const CMD_HANDSHAKE: [u8; 2] = [0x02, 0x08];
const CMD_SET_CROSSPOINT: [u8; 2] = [0x04, 0x09];
const HANDSHAKE_TAIL: [u8; 8] = [0x00, 0x00, 0x00, 0x47, 0xff, 0xff, 0xff, 0xff];
const CHANGE_TYPE: [u8; 3] = [0x04, 0x09, 0x00];

/// Converts a 1-based id to its wire value.
fn to_wire(field: &'static str, id: u16) -> Result<u16, ProtocolError> {
    id.checked_sub(1)
        .ok_or(ProtocolError::InvalidId { field, value: id })
}

/// Converts a wire value to its 1-based id.
fn from_wire(field: &'static str, raw: u16) -> Result<u16, ProtocolError> {
    raw.checked_add(1)
        .ok_or(ProtocolError::WireIdOutOfRange { field, raw })
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

/// Writes the four-byte `NK2\0` prefix and the TBUS address.
fn put_prefix(buf: &mut BytesMut, address: u8) {
    buf.put_slice(&TAG);
    buf.put_u8(0x00);
    buf.put_u8(address);
}

/// Request to route `source` to `destination` on `level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetCrosspoint {
    pub level: Level,
    pub destination: u16,
    pub source: u16,
}

impl SetCrosspoint {
    pub fn new(level: Level, destination: u16, source: u16) -> Self {
        Self {
            level,
            destination,
            source,
        }
    }

    /// Builds the command payload for the router at `address`.
    pub fn to_payload(&self, address: u8) -> Result<Bytes, ProtocolError> {
        let destination = to_wire("destination", self.destination)?;
        let source = to_wire("source", self.source)?;

        let mut buf = BytesMut::with_capacity(COMMAND_PAYLOAD_LEN);
        put_prefix(&mut buf, address);
        buf.put_slice(&CMD_SET_CROSSPOINT);
        buf.put_u16(destination);
        buf.put_u16(source);
        buf.put_u32(self.level.mask());
        buf.put_u8(0x00);

        Ok(buf.freeze())
    }
}

/// Builds the handshake payload for the router at `address`.
pub fn handshake_payload(address: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(15);
    put_prefix(&mut buf, address);
    buf.put_slice(&CMD_HANDSHAKE);
    buf.put_slice(&HANDSHAKE_TAIL);
    buf.freeze()
}

/// An outbound command, as parsed back from a `PAS2` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Protocol initialization sent after the `Welcome` banner.
    Handshake { address: u8 },
    /// Crosspoint change request.
    SetCrosspoint { address: u8, request: SetCrosspoint },
}

impl Command {
    /// Parses an outbound payload (without envelope and checksum).
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        if payload.len() < 7 {
            return Err(ProtocolError::Truncated {
                len: payload.len(),
                min: 7,
            });
        }
        if payload[..3] != TAG {
            return Err(ProtocolError::UnknownTag(payload[..3].to_vec()));
        }

        let address = payload[4];
        let command = [payload[5], payload[6]];

        match command {
            CMD_HANDSHAKE => Ok(Command::Handshake { address }),
            CMD_SET_CROSSPOINT => {
                if payload.len() < COMMAND_PAYLOAD_LEN {
                    return Err(ProtocolError::Truncated {
                        len: payload.len(),
                        min: COMMAND_PAYLOAD_LEN,
                    });
                }
                let destination = from_wire("destination", read_u16(payload, 7))?;
                let source = from_wire("source", read_u16(payload, 9))?;
                let mask = u32::from_be_bytes([payload[11], payload[12], payload[13], payload[14]]);
                let level = Level::from_mask(mask)?;
                Ok(Command::SetCrosspoint {
                    address,
                    request: SetCrosspoint::new(level, destination, source),
                })
            }
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// Notification that a single crosspoint changed on the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrosspointChange {
    pub level: Level,
    pub destination: u16,
    pub source: u16,
}

impl CrosspointChange {
    /// Decodes a 20-byte change message.
    pub fn decode(message: &[u8]) -> Result<Self, ProtocolError> {
        if message.len() != CROSSPOINT_MESSAGE_LEN {
            return Err(ProtocolError::Truncated {
                len: message.len(),
                min: CROSSPOINT_MESSAGE_LEN,
            });
        }
        if message[..3] != TAG {
            return Err(ProtocolError::UnknownTag(message[..3].to_vec()));
        }

        let destination = from_wire("destination", read_u16(message, 8))?;
        let source = from_wire("source", read_u16(message, 10))?;
        let level = Level::from_mask(read_u16(message, 12) as u32)?;

        Ok(Self {
            level,
            destination,
            source,
        })
    }

    /// Encodes the change as the router would report it.
    pub fn encode(&self, address: u8) -> Result<Bytes, ProtocolError> {
        let destination = to_wire("destination", self.destination)?;
        let source = to_wire("source", self.source)?;

        let mut buf = BytesMut::with_capacity(CROSSPOINT_MESSAGE_LEN);
        put_prefix(&mut buf, address);
        buf.put_slice(&CHANGE_TYPE);
        buf.put_u16(destination);
        buf.put_u16(source);
        buf.put_u16(self.level.mask() as u16);
        buf.put_bytes(0, 4);
        let crc = crc16(&buf);
        buf.put_u16(crc);

        Ok(buf.freeze())
    }
}

impl From<SetCrosspoint> for CrosspointChange {
    fn from(request: SetCrosspoint) -> Self {
        Self {
            level: request.level,
            destination: request.destination,
            source: request.source,
        }
    }
}

/// Full routing table of [`TABLE_LEVEL`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableDump {
    /// Source per destination; index 0 is destination 1. `None` where the
    /// wire value has no 1-based equivalent.
    pub sources: Vec<Option<u16>>,
}

impl TableDump {
    /// Smallest message that can be a dump: header and checksum.
    pub const MIN_LEN: usize = TABLE_HEADER_LEN + TRAILER_LEN;

    /// Length of a dump carrying `destinations` entries.
    pub const fn wire_len(destinations: usize) -> usize {
        Self::MIN_LEN + destinations * TABLE_ENTRY_LEN
    }

    /// Decodes a table dump. A trailing partial entry is ignored.
    pub fn decode(message: &[u8]) -> Result<Self, ProtocolError> {
        if message.len() < Self::MIN_LEN {
            return Err(ProtocolError::Truncated {
                len: message.len(),
                min: Self::MIN_LEN,
            });
        }
        if message[..3] != TAG {
            return Err(ProtocolError::UnknownTag(message[..3].to_vec()));
        }

        let body = &message[TABLE_HEADER_LEN..message.len() - TRAILER_LEN];
        let sources = body
            .chunks_exact(TABLE_ENTRY_LEN)
            .map(|entry| read_u16(entry, 0).checked_add(1))
            .collect();

        Ok(Self { sources })
    }

    /// Encodes the dump as the router would send it. Unset entries are
    /// written as 0xFFFF.
    pub fn encode(&self, address: u8) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::wire_len(self.sources.len()));
        put_prefix(&mut buf, address);
        buf.put_bytes(0, TABLE_HEADER_LEN - 5);
        for source in &self.sources {
            buf.put_u16(source.map_or(u16::MAX, |s| s.saturating_sub(1)));
            buf.put_u8(0x00);
        }
        let crc = crc16(&buf);
        buf.put_u16(crc);
        buf.freeze()
    }

    /// Iterates `(destination, source)` pairs of the set entries.
    pub fn entries(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.sources
            .iter()
            .enumerate()
            .filter_map(|(index, source)| source.map(|s| (index as u16 + 1, s)))
    }

    /// Number of destinations carried, set or not.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// The `Welcome` banner.
    Welcome,
    /// A single crosspoint changed.
    Crosspoint(CrosspointChange),
    /// The full table of [`TABLE_LEVEL`].
    Table(TableDump),
}

impl Inbound {
    /// Parses one inbound message.
    pub fn parse(message: &[u8]) -> Result<Self, ProtocolError> {
        if message.starts_with(WELCOME) {
            return Ok(Inbound::Welcome);
        }
        if message.len() < TAG.len() || message[..TAG.len()] != TAG {
            return Err(ProtocolError::UnknownTag(
                message[..message.len().min(TAG.len())].to_vec(),
            ));
        }

        if message.len() == CROSSPOINT_MESSAGE_LEN {
            CrosspointChange::decode(message).map(Inbound::Crosspoint)
        } else {
            TableDump::decode(message).map(Inbound::Table)
        }
    }
}
