//! Host bus backed by the Raspberry Pi's spidev interface.

use std::io;

use embedded_hal::spi::{ErrorType, Mode, Operation, Phase, Polarity, SpiDevice};
use rppal::spi::{self, Bus, Segment, SlaveSelect, Spi};

use crate::bus::{BusError, PeripheralManager, SpiHandle, DEFAULT_CS_CHANGE, DEFAULT_FREQUENCY_HZ};
use crate::registry::SharedRegistry;

static SHARED: SharedRegistry<RppalManager> = SharedRegistry::new(RppalManager);

/// The process-wide shared ADC on [`DEFAULT_DEVICE_NAME`](crate::DEFAULT_DEVICE_NAME).
pub fn shared() -> &'static SharedRegistry<RppalManager> {
    &SHARED
}

/// Opens `SPI<bus>.<slave select>` endpoints through `rppal`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RppalManager;

impl PeripheralManager for RppalManager {
    type Spi = RppalSpi;

    fn open_spi(&self, name: &str) -> io::Result<RppalSpi> {
        let (bus, slave_select) = parse_name(name)?;

        let spi = Spi::new(bus, slave_select, DEFAULT_FREQUENCY_HZ, spi::Mode::Mode0).map_err(into_io)?;

        Ok(RppalSpi {
            spi,
            cs_change: DEFAULT_CS_CHANGE,
        })
    }
}

fn parse_name(name: &str) -> io::Result<(Bus, SlaveSelect)> {
    let unknown = || io::Error::new(io::ErrorKind::InvalidInput, format!("unknown SPI device {name}"));

    let (bus, slave_select) = name
        .strip_prefix("SPI")
        .and_then(|rest| rest.split_once('.'))
        .ok_or_else(unknown)?;

    let bus = match bus {
        "0" => Bus::Spi0,
        "1" => Bus::Spi1,
        "2" => Bus::Spi2,
        "3" => Bus::Spi3,
        "4" => Bus::Spi4,
        "5" => Bus::Spi5,
        "6" => Bus::Spi6,
        _ => return Err(unknown()),
    };

    let slave_select = match slave_select {
        "0" => SlaveSelect::Ss0,
        "1" => SlaveSelect::Ss1,
        "2" => SlaveSelect::Ss2,
        _ => return Err(unknown()),
    };

    Ok((bus, slave_select))
}

fn into_io(err: spi::Error) -> io::Error {
    match err {
        spi::Error::Io(err) => err,
        other => io::Error::new(io::ErrorKind::InvalidInput, other),
    }
}

/// An open spidev endpoint.
pub struct RppalSpi {
    spi: Spi,
    cs_change: bool,
}

impl ErrorType for RppalSpi {
    type Error = BusError;
}

impl SpiDevice for RppalSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), BusError> {
        let mut segments = Vec::with_capacity(operations.len());

        for operation in operations.iter_mut() {
            let mut segment = match operation {
                Operation::Read(read) => Segment::with_read(read),
                Operation::Write(write) => Segment::with_write(write),
                Operation::Transfer(read, write) => Segment::new(read, write),
                Operation::TransferInPlace(_) | Operation::DelayNs(_) => {
                    return Err(BusError(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "in-place transfers and delays are not supported",
                    )));
                }
            };
            segment.set_ss_change(self.cs_change);
            segments.push(segment);
        }

        self.spi.transfer_segments(&segments).map_err(|err| BusError(into_io(err)))
    }
}

impl SpiHandle for RppalSpi {
    fn set_bits_per_word(&mut self, bits: u8) -> io::Result<()> {
        self.spi.set_bits_per_word(bits).map_err(into_io)
    }

    fn set_mode(&mut self, mode: Mode) -> io::Result<()> {
        let mode = match (mode.polarity, mode.phase) {
            (Polarity::IdleLow, Phase::CaptureOnFirstTransition) => spi::Mode::Mode0,
            (Polarity::IdleLow, Phase::CaptureOnSecondTransition) => spi::Mode::Mode1,
            (Polarity::IdleHigh, Phase::CaptureOnFirstTransition) => spi::Mode::Mode2,
            (Polarity::IdleHigh, Phase::CaptureOnSecondTransition) => spi::Mode::Mode3,
        };
        self.spi.set_mode(mode).map_err(into_io)
    }

    fn set_frequency(&mut self, hz: u32) -> io::Result<()> {
        self.spi.set_clock_speed(hz).map_err(into_io)
    }

    fn set_cs_change(&mut self, cs_change: bool) -> io::Result<()> {
        self.cs_change = cs_change;
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        // spidev is released when the file descriptor is dropped.
        drop(self.spi);
        Ok(())
    }
}
