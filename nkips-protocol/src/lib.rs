//! # nkips-protocol
//!
//! Wire protocol implementation for the Ross NK-IPS router gateway.
//!
//! This crate provides:
//! - The `PAS2` outbound envelope with CRC16 checksum
//! - `NK2` inbound frame decoding (single crosspoint change, table dump)
//! - Command payloads and the fixed handshake/keepalive byte sequences
//! - The level table mapping routing levels to wire masks

pub mod codec;
pub mod crc;
pub mod error;
pub mod frame;
pub mod level;
pub mod message;

pub use codec::{CommandDecoder, Decoded, Decoder, Encoder, Outbound};
pub use crc::crc16;
pub use error::ProtocolError;
pub use frame::{Frame, FRAME_HEADER_SIZE, MAGIC};
pub use level::Level;
pub use message::{Command, CrosspointChange, Inbound, SetCrosspoint, TableDump};

/// Default TCP port of the NK-IPS gateway.
pub const DEFAULT_PORT: u16 = 5000;

/// Default TBUS address of the NK-IPS itself.
pub const DEFAULT_ADDRESS: u8 = 254;

/// Default number of router inputs (sources).
pub const DEFAULT_INPUTS: u16 = 255;

/// Default number of router outputs (destinations).
pub const DEFAULT_OUTPUTS: u16 = 255;

/// Default number of routing levels.
pub const DEFAULT_LEVELS: u8 = 8;
