//! Scripted host bus for tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use embedded_hal::spi::{ErrorType, Mode, Operation, SpiDevice};

use crate::bus::{BusError, PeripheralManager, SpiHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    BitsPerWord(u8),
    Mode(Mode),
    Frequency(u32),
    CsChange(bool),
}

#[derive(Default)]
struct Record {
    opened: Vec<String>,
    closes: usize,
    settings: Vec<Setting>,
    sent: Vec<[u8; 3]>,
    replies: VecDeque<[u8; 3]>,
    fail_open: bool,
    fail_config: bool,
    fail_transfer: bool,
}

/// Host factory whose endpoints reply from a shared script.
///
/// Once the script runs dry every transfer reads back the requested channel
/// index as its conversion result.
#[derive(Clone, Default)]
pub struct MockManager {
    record: Arc<Mutex<Record>>,
}

impl MockManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, replies: impl IntoIterator<Item = [u8; 3]>) {
        self.record().replies.extend(replies);
    }

    pub fn fail_open(&self, fail: bool) {
        self.record().fail_open = fail;
    }

    pub fn fail_config(&self, fail: bool) {
        self.record().fail_config = fail;
    }

    pub fn fail_transfer(&self, fail: bool) {
        self.record().fail_transfer = fail;
    }

    pub fn opened(&self) -> Vec<String> {
        self.record().opened.clone()
    }

    pub fn closes(&self) -> usize {
        self.record().closes
    }

    pub fn settings(&self) -> Vec<Setting> {
        self.record().settings.clone()
    }

    pub fn sent(&self) -> Vec<[u8; 3]> {
        self.record().sent.clone()
    }

    fn record(&self) -> MutexGuard<'_, Record> {
        self.record.lock().unwrap()
    }
}

impl PeripheralManager for MockManager {
    type Spi = MockSpi;

    fn open_spi(&self, name: &str) -> io::Result<MockSpi> {
        let mut record = self.record();
        if record.fail_open {
            return Err(io::Error::new(io::ErrorKind::NotFound, "mock open failure"));
        }
        record.opened.push(name.to_string());

        Ok(MockSpi {
            record: Arc::clone(&self.record),
        })
    }
}

pub struct MockSpi {
    record: Arc<Mutex<Record>>,
}

impl MockSpi {
    fn configure(&mut self, setting: Setting) -> io::Result<()> {
        let mut record = self.record.lock().unwrap();
        if record.fail_config {
            return Err(io::Error::other("mock configuration failure"));
        }
        record.settings.push(setting);
        Ok(())
    }
}

impl ErrorType for MockSpi {
    type Error = BusError;
}

impl SpiDevice for MockSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), BusError> {
        let mut record = self.record.lock().unwrap();
        if record.fail_transfer {
            return Err(BusError(io::Error::other("mock transfer failure")));
        }

        for operation in operations {
            match operation {
                Operation::Transfer(read, write) => {
                    let mut sent = [0; 3];
                    sent.copy_from_slice(write);
                    record.sent.push(sent);

                    let reply = record.replies.pop_front().unwrap_or_else(|| echo(sent));
                    read.copy_from_slice(&reply);
                }
                _ => panic!("unexpected SPI operation"),
            }
        }

        Ok(())
    }
}

fn echo(command: [u8; 3]) -> [u8; 3] {
    let channel = (command[0] & 0b1) << 2 | command[1] >> 6;
    [0, 0, channel]
}

impl SpiHandle for MockSpi {
    fn set_bits_per_word(&mut self, bits: u8) -> io::Result<()> {
        self.configure(Setting::BitsPerWord(bits))
    }

    fn set_mode(&mut self, mode: Mode) -> io::Result<()> {
        self.configure(Setting::Mode(mode))
    }

    fn set_frequency(&mut self, hz: u32) -> io::Result<()> {
        self.configure(Setting::Frequency(hz))
    }

    fn set_cs_change(&mut self, cs_change: bool) -> io::Result<()> {
        self.configure(Setting::CsChange(cs_change))
    }

    fn close(self) -> io::Result<()> {
        self.record.lock().unwrap().closes += 1;
        Ok(())
    }
}
