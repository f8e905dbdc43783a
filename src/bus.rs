//! The host's bus-peripheral factory, as seen by the ADC device.
//!
//! The host opens SPI endpoints by name and hands back a handle that can be
//! configured, used for full-duplex transfers through [`embedded_hal`], and
//! closed. I/O failures cross this seam as plain [`std::io::Error`]s.

use std::io;

use embedded_hal::spi::{self, ErrorKind, Mode, SpiDevice, MODE_0};

pub const DEFAULT_BITS_PER_WORD: u8 = 8;
pub const DEFAULT_MODE: Mode = MODE_0;
pub const DEFAULT_FREQUENCY_HZ: u32 = 10_000;
pub const DEFAULT_CS_CHANGE: bool = false;

/// Settings applied to an SPI endpoint before its first transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiConfig {
    pub bits_per_word: u8,
    pub mode: Mode,
    pub frequency_hz: u32,
    /// Deassert chip-select between words within a transfer.
    pub cs_change: bool,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            bits_per_word: DEFAULT_BITS_PER_WORD,
            mode: DEFAULT_MODE,
            frequency_hz: DEFAULT_FREQUENCY_HZ,
            cs_change: DEFAULT_CS_CHANGE,
        }
    }
}

impl SpiConfig {
    /// Applies every setting to `spi`, stopping at the first failure.
    pub fn apply<S: SpiHandle>(&self, spi: &mut S) -> io::Result<()> {
        spi.set_bits_per_word(self.bits_per_word)?;
        spi.set_mode(self.mode)?;
        spi.set_frequency(self.frequency_hz)?;
        spi.set_cs_change(self.cs_change)
    }
}

/// Transfer failure reported by the host bus.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct BusError(#[from] pub io::Error);

impl spi::Error for BusError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// An opened SPI endpoint.
pub trait SpiHandle: SpiDevice<u8, Error = BusError> {
    fn set_bits_per_word(&mut self, bits: u8) -> io::Result<()>;

    fn set_mode(&mut self, mode: Mode) -> io::Result<()>;

    fn set_frequency(&mut self, hz: u32) -> io::Result<()>;

    fn set_cs_change(&mut self, cs_change: bool) -> io::Result<()>;

    /// Releases the endpoint. The handle cannot be used afterwards.
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// Opens SPI endpoints by name, e.g. `"SPI0.0"`.
pub trait PeripheralManager {
    type Spi: SpiHandle;

    fn open_spi(&self, name: &str) -> io::Result<Self::Spi>;
}
