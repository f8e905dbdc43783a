//! Periodically samples a Microchip MCP3204 ADC over a host-provided SPI bus.
//!
//! [`Device`] wraps one SPI endpoint, [`SharedRegistry`] shares a device between
//! unrelated callers, and [`Sampler`] runs the self-rescheduling sample loop on a
//! [`Dispatcher`].

pub mod bus;
pub mod device;
mod error;
pub mod registry;
pub mod sampler;
pub mod tracing;

#[cfg(feature = "raspberry_pi")]
pub mod raspberry_pi;

#[cfg(test)]
mod mock;

pub use bus::{BusError, PeripheralManager, SpiConfig, SpiHandle};
pub use device::{Device, DEFAULT_DEVICE_NAME, DEFAULT_ITERATIONS};
pub use error::{Error, Result};
pub use registry::SharedRegistry;
pub use sampler::{
    Dispatcher, LogSink, Remote, Sample, SampleSink, Sampler, SamplerConfig, State, Work, DEFAULT_CHANNEL,
};
