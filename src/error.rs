use std::io;

use crate::bus::BusError;

/// Errors raised by the ADC device, the shared registry and the sampler.
///
/// Only [`Error::Io`] is an operational failure. Everything else means the
/// caller used the API wrongly.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The device was never opened, or has been closed.
    #[error("SPI device {0} is not open")]
    NotOpen(String),

    /// `open` was called on a device that has already been closed.
    #[error("SPI device {0} has been closed and cannot be reopened")]
    Closed(String),

    /// Channel index outside the four MCP3204 inputs.
    #[error("channel {0} is out of range for the MCP3204")]
    InvalidChannel(u8),

    /// Averaging over zero conversions.
    #[error("iteration count must be at least 1")]
    InvalidIterations,

    /// `release` without a matching `acquire`.
    #[error("shared device released more times than it was acquired")]
    UnbalancedRelease,

    /// Open, configure, transfer or close failed on the host bus.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Returns `true` for bus failures that may clear up on retry.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

impl From<BusError> for Error {
    fn from(err: BusError) -> Self {
        Self::Io(err.0)
    }
}

impl From<mcp3204::InvalidChannel> for Error {
    fn from(err: mcp3204::InvalidChannel) -> Self {
        Self::InvalidChannel(err.0)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
