//! A single MCP3204 behind a host SPI endpoint.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::{Mutex, MutexGuard, PoisonError};

use mcp3204::{Channel, Mcp3204};

use crate::bus::{PeripheralManager, SpiConfig, SpiHandle};
use crate::tracing::prelude::*;
use crate::{Error, Result};

pub const DEFAULT_DEVICE_NAME: &str = "SPI0.0";
pub const DEFAULT_ITERATIONS: u32 = 10;

const DEFAULT_ITERATIONS_NZ: NonZeroU32 = match NonZeroU32::new(DEFAULT_ITERATIONS) {
    Some(n) => n,
    None => panic!("default iteration count must be non-zero"),
};

enum Link<S> {
    Closed,
    Open(Mcp3204<S>),
    /// Closed by [`Device::close`]; the device is not reusable.
    Retired,
}

struct Inner<S> {
    link: Link<S>,
    iterations: NonZeroU32,
}

/// An MCP3204 on a named SPI endpoint.
///
/// Every method takes the device lock, so concurrent callers never interleave
/// transfers on the shared receive buffer. The endpoint is closed exactly once,
/// either by [`Device::close`] or when the device is dropped.
pub struct Device<F: PeripheralManager> {
    name: String,
    factory: F,
    inner: Mutex<Inner<F::Spi>>,
}

impl<F: PeripheralManager> Device<F> {
    /// Creates a closed device for endpoint `name`.
    pub fn new(name: impl Into<String>, factory: F) -> Self {
        Self {
            name: name.into(),
            factory,
            inner: Mutex::new(Inner {
                link: Link::Closed,
                iterations: DEFAULT_ITERATIONS_NZ,
            }),
        }
    }

    /// Creates a closed device for [`DEFAULT_DEVICE_NAME`].
    pub fn with_defaults(factory: F) -> Self {
        Self::new(DEFAULT_DEVICE_NAME, factory)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        matches!(self.lock().link, Link::Open(_))
    }

    /// Opens the endpoint with [`SpiConfig::default`].
    pub fn open(&self) -> Result<()> {
        self.open_with(&SpiConfig::default())
    }

    /// Opens the endpoint and applies `config`.
    ///
    /// Does nothing if the device is already open. On failure the device stays
    /// closed and any half-configured handle is closed again.
    pub fn open_with(&self, config: &SpiConfig) -> Result<()> {
        let mut inner = self.lock();

        match inner.link {
            Link::Open(_) => return Ok(()),
            Link::Retired => return Err(Error::Closed(self.name.clone())),
            Link::Closed => {}
        }

        let mut spi = self.factory.open_spi(&self.name)?;

        if let Err(err) = config.apply(&mut spi) {
            if let Err(close_err) = spi.close() {
                warn!(device = %self.name, %close_err, "Failed to close SPI device after configuration error");
            }
            return Err(err.into());
        }

        debug!(device = %self.name, ?config, "Opened SPI device");

        inner.link = Link::Open(Mcp3204::new(spi));

        Ok(())
    }

    pub fn default_iterations(&self) -> u32 {
        self.lock().iterations.get()
    }

    /// Sets the iteration count used by [`Device::sample`].
    pub fn set_default_iterations(&self, iterations: u32) -> Result<()> {
        let iterations = NonZeroU32::new(iterations).ok_or(Error::InvalidIterations)?;

        self.lock().iterations = iterations;

        Ok(())
    }

    /// Performs a single conversion on `channel` and returns the raw 12-bit value.
    pub fn read_raw(&self, channel: u8) -> Result<u16> {
        let channel = Channel::try_from(channel)?;
        let mut inner = self.lock();

        Ok(self.adc(&mut inner)?.read(channel)?)
    }

    /// Averages [`Device::default_iterations`] conversions on `channel`.
    pub fn sample(&self, channel: u8) -> Result<f64> {
        let channel = Channel::try_from(channel)?;
        let mut inner = self.lock();
        let iterations = inner.iterations;

        Ok(self.adc(&mut inner)?.read_mean(channel, iterations)?)
    }

    /// Averages `iterations` back-to-back conversions on `channel`.
    pub fn sample_with(&self, channel: u8, iterations: u32) -> Result<f64> {
        let channel = Channel::try_from(channel)?;
        let iterations = NonZeroU32::new(iterations).ok_or(Error::InvalidIterations)?;
        let mut inner = self.lock();

        Ok(self.adc(&mut inner)?.read_mean(channel, iterations)?)
    }

    /// Closes the endpoint. Closing a closed device is a no-op. Once closed,
    /// the device cannot be opened again, even if it never was open.
    ///
    /// The handle is given up even if the host reports an error while closing it.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock();

        if let Link::Open(adc) = std::mem::replace(&mut inner.link, Link::Retired) {
            adc.release().close()?;
            debug!(device = %self.name, "Closed SPI device");
        }

        Ok(())
    }

    fn adc<'a>(&self, inner: &'a mut Inner<F::Spi>) -> Result<&'a mut Mcp3204<F::Spi>> {
        match &mut inner.link {
            Link::Open(adc) => Ok(adc),
            Link::Closed | Link::Retired => Err(Error::NotOpen(self.name.clone())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<F::Spi>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<F: PeripheralManager> fmt::Debug for Device<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

impl<F: PeripheralManager> Drop for Device<F> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);

        if let Link::Open(adc) = std::mem::replace(&mut inner.link, Link::Retired) {
            if let Err(err) = adc.release().close() {
                warn!(device = %self.name, %err, "Failed to close SPI device on drop");
            }
        }
    }
}
