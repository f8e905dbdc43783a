//! Reference-counted sharing of one [`Device`] between unrelated callers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bus::PeripheralManager;
use crate::device::Device;
use crate::tracing::prelude::*;
use crate::{Error, Result};

struct Slot<F: PeripheralManager> {
    device: Option<Arc<Device<F>>>,
    users: usize,
}

/// Lazily opens a default-configured [`Device`] on the first [`acquire`](Self::acquire)
/// and closes it when the last user calls [`release`](Self::release).
///
/// Both operations run under one lock, so they are atomic with respect to each other.
/// Callers that need a non-default configuration should own a private [`Device`].
pub struct SharedRegistry<F: PeripheralManager + Clone> {
    factory: F,
    slot: Mutex<Slot<F>>,
}

impl<F: PeripheralManager + Clone> SharedRegistry<F> {
    pub const fn new(factory: F) -> Self {
        Self {
            factory,
            slot: Mutex::new(Slot {
                device: None,
                users: 0,
            }),
        }
    }

    /// Returns the shared device, opening it if nobody holds it yet.
    ///
    /// If the open fails the user count is unchanged and nothing is retained.
    pub fn acquire(&self) -> Result<Arc<Device<F>>> {
        let mut slot = self.lock();

        let device = match slot.device.clone() {
            Some(device) => device,
            None => {
                let device = Device::with_defaults(self.factory.clone());
                device.open()?;

                let device = Arc::new(device);
                slot.device = Some(Arc::clone(&device));
                device
            }
        };

        slot.users += 1;
        trace!(users = slot.users, "Acquired shared ADC");

        Ok(device)
    }

    /// Drops one user. The last release closes the device and empties the slot,
    /// even when the close itself reports an error.
    pub fn release(&self) -> Result<()> {
        let mut slot = self.lock();

        slot.users = slot.users.checked_sub(1).ok_or(Error::UnbalancedRelease)?;
        trace!(users = slot.users, "Released shared ADC");

        if slot.users == 0 {
            if let Some(device) = slot.device.take() {
                device.close()?;
            }
        }

        Ok(())
    }

    pub fn ref_count(&self) -> usize {
        self.lock().users
    }

    pub fn is_held(&self) -> bool {
        self.lock().device.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Slot<F>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
