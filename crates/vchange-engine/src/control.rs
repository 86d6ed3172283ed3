//! Control plane shared between the control context and the audio worker.

use crate::devices::DeviceSelector;
use crate::params::{EffectParameters, ParameterUpdate};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Holds the current parameter snapshot and device selections.
///
/// Writers build a complete new `EffectParameters` and swap the `Arc` under a
/// write lock. The lock only ever guards a pointer swap or clone, never a block
/// of processing, so the audio loop waits at most for one pointer copy.
pub struct ControlPlane {
    params: RwLock<Arc<EffectParameters>>,
    devices: Mutex<DeviceSelection>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceSelection {
    pub input: DeviceSelector,
    pub output: DeviceSelector,
}

impl ControlPlane {
    pub fn new() -> Self {
        Self::with_parameters(EffectParameters::default())
    }

    pub fn with_parameters(params: EffectParameters) -> Self {
        Self {
            params: RwLock::new(Arc::new(params)),
            devices: Mutex::new(DeviceSelection::default()),
        }
    }

    /// Merge `update` into the current set and publish the result.
    /// Returns the published snapshot.
    pub fn update_parameters(&self, update: &ParameterUpdate) -> EffectParameters {
        let mut slot = self.params.write();
        let next = slot.merged(update);
        *slot = Arc::new(next);
        log::debug!("parameters updated: {next:?}");
        next
    }

    /// Replace the whole parameter set (used when applying a preset on top of
    /// defaults).
    pub fn replace_parameters(&self, update: &ParameterUpdate) -> EffectParameters {
        let next = EffectParameters::default().merged(update);
        *self.params.write() = Arc::new(next);
        next
    }

    pub fn snapshot(&self) -> Arc<EffectParameters> {
        self.params.read().clone()
    }

    pub fn set_input_device(&self, selector: DeviceSelector) {
        self.devices.lock().input = selector;
    }

    pub fn set_output_device(&self, selector: DeviceSelector) {
        self.devices.lock().output = selector;
    }

    pub fn devices(&self) -> DeviceSelection {
        self.devices.lock().clone()
    }
}

impl Default for ControlPlane {
    fn default() -> Self {
        Self::new()
    }
}
