//! CRC16 used by the PAS2 envelope.
//!
//! Reflected polynomial 0xA001 with an initial value of 0xFFFF (the Modbus
//! variant), computed bit by bit. The router expects the two result bytes
//! swapped, so [`crc16`] returns the swapped value and frames append it
//! big-endian. A wrong checksum is not NACKed: the router silently drops
//! the command.

const POLY: u16 = 0xA001;
const INIT: u16 = 0xFFFF;

/// Computes the byte-swapped CRC16 of `data`, ready to be written
/// big-endian after the payload.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = INIT;

    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            let odd = crc & 0x0001 != 0;
            crc >>= 1;
            if odd {
                crc ^= POLY;
            }
        }
    }

    crc.swap_bytes()
}

/// Returns the two checksum bytes in wire order.
pub fn checksum_bytes(data: &[u8]) -> [u8; 2] {
    crc16(data).to_be_bytes()
}
