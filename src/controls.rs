//! Device control registry.
//!
//! Controls are enumerated fresh on every call. Identifiers are only used
//! within one enumeration; callers address controls by name.

use tracing::{debug, warn};

use crate::traits::{ControlDescriptor, ControlDevice, ControlType, Result};

/// First user-class control identifier (`V4L2_CID_BASE`).
pub const V4L2_CID_BASE: u32 = 0x0098_0900;
/// One past the last user-class control identifier (`V4L2_CID_LASTP1`).
pub const V4L2_CID_LASTP1: u32 = V4L2_CID_BASE + 44;

/// Named access to the controls of one device.
pub struct ControlRegistry<'a> {
    device: &'a dyn ControlDevice,
}

impl<'a> ControlRegistry<'a> {
    /// Registry over `device`.
    #[must_use]
    pub fn new(device: &'a dyn ControlDevice) -> Self {
        Self { device }
    }

    /// Supported user-class controls with their live values, in identifier
    /// order.
    pub fn enumerate(&self) -> Result<Vec<ControlDescriptor>> {
        let mut controls: Vec<ControlDescriptor> = self
            .device
            .query_controls()?
            .into_iter()
            .filter(|ctrl| (V4L2_CID_BASE..V4L2_CID_LASTP1).contains(&ctrl.id))
            .filter(|ctrl| ctrl.kind().is_some())
            .collect();
        controls.sort_by_key(|ctrl| ctrl.id);

        for ctrl in &mut controls {
            if !ctrl.kind().is_some_and(ControlType::has_value) {
                continue;
            }
            ctrl.value = match self.device.control(ctrl.id) {
                Ok(value) => Some(value),
                Err(err) => {
                    debug!(control = %ctrl.name, %err, "no readable value");
                    None
                }
            };
        }

        Ok(controls)
    }

    /// Write `value` to every control called `name` whose live value differs.
    ///
    /// Returns whether a live value differed. A rejected write still counts:
    /// the device no longer matches what was asked for.
    pub fn set_by_name(&self, name: &str, value: i64) -> Result<bool> {
        let controls = self.enumerate()?;
        Ok(self.set_in(&controls, name, value))
    }

    /// Apply `(name, value)` pairs in order against one enumeration.
    /// Returns whether any live value differed.
    pub fn apply<'n, I>(&self, values: I) -> Result<bool>
    where
        I: IntoIterator<Item = (&'n str, i64)>,
    {
        let controls = self.enumerate()?;
        let mut changed = false;
        for (name, value) in values {
            changed |= self.set_in(&controls, name, value);
        }
        Ok(changed)
    }

    fn set_in(&self, controls: &[ControlDescriptor], name: &str, value: i64) -> bool {
        let mut changed = false;

        for ctrl in controls.iter().filter(|ctrl| ctrl.name == name) {
            let Some(kind) = ctrl.kind() else {
                continue;
            };
            // Re-read: an earlier entry in the same pass may have written it.
            let Ok(live) = self.device.control(ctrl.id) else {
                continue;
            };
            if live == value {
                continue;
            }

            debug!(control = name, from = live, to = value, "updating control");
            if let Err(err) = self.device.set_control(ctrl.id, kind, value) {
                warn!(control = name, value, %err, "device rejected control value");
            }
            changed = true;
        }

        changed
    }
}
