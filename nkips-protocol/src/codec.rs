//! Encoder and decoder for gateway traffic.
//!
//! Outbound traffic is framed ([`Frame`]), so [`CommandDecoder`] can buffer
//! and split it. Inbound traffic carries no length field: a change message
//! is always 20 bytes, and a table dump is as long as the router is wide.
//! [`Decoder`] knows the expected dump length and holds a dump that
//! arrives over several reads until it is complete.

use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::message::{
    handshake_payload, Command, Inbound, SetCrosspoint, TableDump, CROSSPOINT_MESSAGE_LEN,
    IDENTIFICATION, KEEPALIVE, TAG,
};
use bytes::{Buf, Bytes, BytesMut};
use std::cmp::Ordering;

/// Encodes outbound traffic for the router at one TBUS address.
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    address: u8,
}

impl Encoder {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Identification banner, sent unframed right after connecting.
    pub fn identification(&self) -> Bytes {
        Bytes::from_static(IDENTIFICATION)
    }

    /// Keepalive ping, sent unframed.
    pub fn keepalive(&self) -> Bytes {
        Bytes::from_static(KEEPALIVE)
    }

    /// Protocol initialization frame, sent in reply to `Welcome`.
    pub fn handshake(&self) -> Result<BytesMut, ProtocolError> {
        Frame::new(handshake_payload(self.address)).encode()
    }

    /// Crosspoint change request frame.
    pub fn set_crosspoint(&self, request: &SetCrosspoint) -> Result<BytesMut, ProtocolError> {
        Frame::new(request.to_payload(self.address)?).encode()
    }
}

/// One message cut from the inbound stream.
#[derive(Debug)]
pub struct Decoded {
    /// Bytes the message spanned.
    pub len: usize,
    pub message: Result<Inbound, ProtocolError>,
}

impl Decoded {
    fn parse(bytes: &[u8]) -> Self {
        Self {
            len: bytes.len(),
            message: Inbound::parse(bytes),
        }
    }
}

/// Decodes inbound gateway traffic.
///
/// A tagged chunk shorter than [`table_len`](Self::table_len) that is not
/// a change message is the head of a table dump and is held back. It is
/// released once the buffered bytes reach the dump length, or by
/// [`flush`](Self::flush) for routers narrower than configured.
#[derive(Debug)]
pub struct Decoder {
    buffer: BytesMut,
    table_len: usize,
}

impl Decoder {
    /// Creates a decoder for a router with `outputs` destinations.
    pub fn new(outputs: u16) -> Self {
        Self {
            buffer: BytesMut::new(),
            table_len: TableDump::wire_len(outputs as usize),
        }
    }

    /// Expected length of a table dump.
    pub fn table_len(&self) -> usize {
        self.table_len
    }

    /// Decodes one read chunk into the messages it completes.
    ///
    /// A malformed message yields an `Err` entry without affecting the
    /// others in the same chunk.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        let mut messages = Vec::new();

        if self.buffer.is_empty() {
            self.decode_chunk(chunk, &mut messages);
            return messages;
        }

        self.buffer.extend_from_slice(chunk);
        if self.buffer.len() >= self.table_len {
            let dump = self.buffer.split_to(self.table_len);
            let rest = self.buffer.split();
            messages.push(Decoded::parse(&dump));
            self.decode_chunk(&rest, &mut messages);
        }
        messages
    }

    fn decode_chunk(&mut self, chunk: &[u8], messages: &mut Vec<Decoded>) {
        if chunk.is_empty() {
            return;
        }
        if !chunk.starts_with(&TAG) {
            messages.push(Decoded::parse(chunk));
            return;
        }
        if is_change_run(chunk) {
            messages.extend(chunk.chunks_exact(CROSSPOINT_MESSAGE_LEN).map(Decoded::parse));
            return;
        }

        match chunk.len().cmp(&self.table_len) {
            Ordering::Less => self.buffer.extend_from_slice(chunk),
            Ordering::Equal => messages.push(Decoded::parse(chunk)),
            Ordering::Greater => {
                let (dump, rest) = chunk.split_at(self.table_len);
                if is_change_run(rest) {
                    messages.push(Decoded::parse(dump));
                    messages.extend(rest.chunks_exact(CROSSPOINT_MESSAGE_LEN).map(Decoded::parse));
                } else {
                    // A router wider than configured.
                    messages.push(Decoded::parse(chunk));
                }
            }
        }
    }

    /// Whether part of a dump is held back.
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Releases a held dump as it is.
    pub fn flush(&mut self) -> Option<Decoded> {
        if self.buffer.is_empty() {
            return None;
        }
        let held = self.buffer.split();
        Some(Decoded::parse(&held))
    }

    /// Drops held bytes.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Whether `chunk` is one or more whole change messages.
fn is_change_run(chunk: &[u8]) -> bool {
    !chunk.is_empty()
        && chunk.len() % CROSSPOINT_MESSAGE_LEN == 0
        && chunk
            .chunks_exact(CROSSPOINT_MESSAGE_LEN)
            .all(|message| message.starts_with(&TAG))
}

/// Buffers outbound traffic and splits it into banners and commands, as
/// the router side of the link sees it.
pub struct CommandDecoder {
    buffer: BytesMut,
}

/// One item of outbound traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Identification,
    Keepalive,
    Command(Command),
}

impl CommandDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next item from the buffer.
    pub fn decode_next(&mut self) -> Result<Option<Outbound>, ProtocolError> {
        for (banner, item) in [
            (IDENTIFICATION, Outbound::Identification),
            (KEEPALIVE, Outbound::Keepalive),
        ] {
            if self.buffer.starts_with(banner) {
                self.buffer.advance(banner.len());
                return Ok(Some(item));
            }
            if banner.starts_with(&self.buffer) {
                return Ok(None);
            }
        }

        match Frame::decode(&mut self.buffer)? {
            Some(frame) => Command::from_payload(&frame.payload).map(|c| Some(Outbound::Command(c))),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for CommandDecoder {
    fn default() -> Self {
        Self::new()
    }
}
