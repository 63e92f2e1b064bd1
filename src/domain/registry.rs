//! Device Registry
//!
//! Known remote devices of the current session, keyed by their session index,
//! plus the single selected device. Only the connection controller mutates
//! the device set; the selection is the one piece callers may change.

use crate::domain::models::RemoteDevice;
use std::collections::BTreeMap;
use tracing::debug;

/// Result of a selection request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    Selected(u32),
    Cleared,
    /// The index did not name a present device; selection left unchanged.
    Ignored,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeMap<u32, RemoteDevice>,
    selected_index: Option<u32>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vibration-capable devices in ascending index order
    pub fn devices(&self) -> Vec<RemoteDevice> {
        self.devices
            .values()
            .filter(|d| d.supports_vibration())
            .cloned()
            .collect()
    }

    pub fn select(&mut self, index: Option<u32>) -> SelectOutcome {
        match index {
            None => {
                self.selected_index = None;
                SelectOutcome::Cleared
            }
            Some(i) if self.devices.contains_key(&i) => {
                self.selected_index = Some(i);
                SelectOutcome::Selected(i)
            }
            Some(i) => {
                debug!("Ignoring selection of unknown device index {}", i);
                SelectOutcome::Ignored
            }
        }
    }

    pub fn selected_index(&self) -> Option<u32> {
        self.selected_index
    }

    pub fn selected_device(&self) -> Option<RemoteDevice> {
        self.selected_index
            .and_then(|i| self.devices.get(&i))
            .cloned()
    }

    pub(crate) fn insert(&mut self, device: RemoteDevice) {
        self.devices.insert(device.index, device);
    }

    /// Removes a device; drops the selection if it pointed at it.
    pub(crate) fn remove(&mut self, index: u32) -> Option<RemoteDevice> {
        let removed = self.devices.remove(&index);
        if self.selected_index == Some(index) {
            self.selected_index = None;
        }
        removed
    }

    pub(crate) fn clear(&mut self) {
        self.devices.clear();
        self.selected_index = None;
    }
}
