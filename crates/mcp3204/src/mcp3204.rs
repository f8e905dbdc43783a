use core::num::NonZeroU32;

use embedded_hal::spi::SpiDevice;

use crate::{command, decode, Channel, FRAME_LEN};

/// MCP3204 driver
pub struct Mcp3204<SPI> {
    spi: SPI,
    rx: [u8; FRAME_LEN],
}

impl<SPI: SpiDevice> Mcp3204<SPI> {
    /// Creates a new driver from an SPI peripheral.
    /// Please ensure the SPI bus is in SPI mode 0, aka (0, 0).
    pub fn new(spi: SPI) -> Self {
        spi.into()
    }

    /// Read a channel in single-ended mode and return the 12 bit value as a [`u16`].
    ///
    /// Exactly one full-duplex transfer of [`FRAME_LEN`] bytes is made.
    pub fn read(&mut self, ch: Channel) -> Result<u16, SPI::Error> {
        self.spi.transfer(&mut self.rx, command(ch))?;

        Ok(decode(self.rx))
    }

    /// Read a channel `iterations` times back to back and return the arithmetic mean.
    ///
    /// The running sum is a [`u64`], which holds `u32::MAX` full-scale readings.
    pub fn read_mean(&mut self, ch: Channel, iterations: NonZeroU32) -> Result<f64, SPI::Error> {
        let mut sum = 0u64;

        for _ in 0..iterations.get() {
            sum += u64::from(self.read(ch)?);
        }

        Ok(sum as f64 / f64::from(iterations.get()))
    }

    /// Gives the SPI peripheral back, e.g. so the host can close it.
    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI: SpiDevice> From<SPI> for Mcp3204<SPI> {
    fn from(spi: SPI) -> Self {
        Self {
            spi,
            rx: [0; FRAME_LEN],
        }
    }
}
