use std::sync::Mutex;

use anyhow::{bail, Result};

use super::{DeviceHandle, Frame};

/// Owns one open device handle for the lifetime of a session.
///
/// Reads and the final close go through the same mutex, so a close can only happen
/// between reads, never during one. Blocking: call from `spawn_blocking`.
pub struct DeviceSlot {
    device_id: String,
    handle: Mutex<Option<Box<dyn DeviceHandle>>>,
}

impl DeviceSlot {
    pub fn new(device_id: impl Into<String>, handle: Box<dyn DeviceHandle>) -> Self {
        Self {
            device_id: device_id.into(),
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn read(&self) -> Result<Frame> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(handle) => handle.read(),
            None => bail!("device {} already released", self.device_id),
        }
    }

    /// Closes the handle. Returns `false` when it was already released.
    pub fn release(&self) -> bool {
        let handle = self.lock().take();
        match handle {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Box<dyn DeviceHandle>>> {
        match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
