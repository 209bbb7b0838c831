//! Bit layout of a PS/2 frame.
//!
//! A frame is a start bit (0), eight data bits least significant first, an odd
//! parity bit and a stop bit (1). When the host writes, the device answers with
//! an acknowledge bit clocked right after the stop bit.

pub const START: u8 = 0;
pub const PARITY: u8 = 9;
pub const STOP: u8 = 10;
/// Write frames only. Driven by the device, not by us.
pub const ACK: u8 = 11;

/// Asks the device to retransmit its last byte.
pub const RESEND: u8 = 0xFE;

/// Parity bit for `byte`: set when the data bits hold an even number of ones,
/// so that data plus parity always count an odd number.
pub const fn parity_of(byte: u8) -> bool {
    byte.count_ones() % 2 == 0
}

pub const fn validate_parity(byte: u8, parity: bool) -> bool {
    parity_of(byte) == parity
}

/// Full write frame for `byte`, start bit at position 0.
pub const fn pack(byte: u8) -> u16 {
    ((byte as u16) << 1) | ((parity_of(byte) as u16) << PARITY) | (1 << STOP)
}

pub const fn bit(frame: u16, pos: u8) -> bool {
    (frame >> pos) & 1 == 1
}

pub const fn unpack(frame: u16) -> u8 {
    (frame >> 1) as u8
}
