//! Provides a driver for a Microchip MCP3204 12-bit ADC via the `embedded-hal` ecosystem.

#![no_std]
#![forbid(unsafe_code)]

use core::fmt;

mod mcp3204;

pub use mcp3204::Mcp3204;

/// Length in bytes of one command frame, and of the response clocked back during it.
pub const FRAME_LEN: usize = 3;

/// Largest value a 12-bit conversion can produce.
pub const MAX_VALUE: u16 = 0x0FFF;

/// Number of single-ended inputs on the MCP3204.
pub const CHANNEL_COUNT: u8 = 4;

/// Result bits B11..B8 sit in the low nibble of the second response byte.
const RESULT_HIGH_MASK: u8 = 0b0000_1111;

/// Commands are always 24 bits, MSB first:
///
/// ```text
/// [23:19] padding, all 0
/// [18]    start bit, always 1
/// [17]    single/~diff, always 1 (single-ended)
/// [16:14] channel select
/// [13:0]  padding, all 0
/// ```
///
/// The conversion is clocked out during the trailing padding, so the 12 result
/// bits land in the low nibble of byte 1 and all of byte 2.
static COMMANDS: [[u8; FRAME_LEN]; CHANNEL_COUNT as usize] = [
    frame(0b00000_1_1_000_00000000000000),
    frame(0b00000_1_1_001_00000000000000),
    frame(0b00000_1_1_010_00000000000000),
    frame(0b00000_1_1_011_00000000000000),
];

const fn frame(word: u32) -> [u8; FRAME_LEN] {
    [(word >> 16) as u8, (word >> 8) as u8, word as u8]
}

/// Returns the single-ended conversion command for `ch`.
pub fn command(ch: Channel) -> &'static [u8; FRAME_LEN] {
    &COMMANDS[ch as usize]
}

/// Extracts the 12-bit conversion result from a response frame. Byte 0 carries no data.
pub const fn decode(rx: [u8; FRAME_LEN]) -> u16 {
    ((rx[1] & RESULT_HIGH_MASK) as u16) << 8 | rx[2] as u16
}

/// Channel list for MCP3204
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Channel {
    CH0 = 0,
    CH1 = 1,
    CH2 = 2,
    CH3 = 3,
}

impl Channel {
    /// Iterate over all channels.
    pub fn all() -> impl Iterator<Item = Self> {
        [Self::CH0, Self::CH1, Self::CH2, Self::CH3].into_iter()
    }
}

impl TryFrom<u8> for Channel {
    type Error = InvalidChannel;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        match index {
            0 => Ok(Self::CH0),
            1 => Ok(Self::CH1),
            2 => Ok(Self::CH2),
            3 => Ok(Self::CH3),
            other => Err(InvalidChannel(other)),
        }
    }
}

/// A channel index outside `0..CHANNEL_COUNT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidChannel(pub u8);

impl fmt::Display for InvalidChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel {} is not an MCP3204 input (0..{})", self.0, CHANNEL_COUNT)
    }
}
