//! The persisted control file.
//!
//! The file is a JSON object listing every supported device control and the
//! display color blocks. It is always rewritten whole from live state and
//! read back whole; there are no partial updates.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::controls::ControlRegistry;
use crate::display::{BwsParams, DisplayColor, FccParams};
use crate::traits::{CameraError, ControlDescriptor, ControlType, Result};

/// One menu option as written to the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemEntry {
    /// Option label.
    pub menu_item_name: String,
    /// Value to write to select this option.
    pub menu_item_value: i64,
}

/// One device control as written to the file.
///
/// Hand-edited entries may leave out everything except the name; an entry
/// without a value is never applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlEntry {
    /// Control name, the lookup key when applying.
    pub ctrl_name: String,
    /// Maximum value.
    pub ctrl_max: i64,
    /// Minimum value.
    pub ctrl_min: i64,
    /// Step between values.
    pub ctrl_step: i64,
    /// Default value.
    pub ctrl_default: i64,
    /// `V4L2_CTRL_TYPE_*` name.
    pub ctrl_type: String,
    /// Live value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctrl_value: Option<i64>,
    /// Options of menu controls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ctrl_menu: Option<Vec<MenuItemEntry>>,
}

/// Display color blocks as written to the file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySection {
    /// Fancy color curvature block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fcc: Option<FccParams>,
    /// Black/white stretch block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bws: Option<BwsParams>,
}

/// The whole control file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlFileDocument {
    /// Device controls.
    #[serde(default)]
    pub device: Vec<ControlEntry>,
    /// Display color blocks, absent on boards without them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplaySection>,
}

impl ControlEntry {
    fn from_descriptor(ctrl: &ControlDescriptor, kind: ControlType) -> Self {
        let ctrl_menu = if kind.is_menu() {
            let items = ctrl.menu.iter().flatten().map(|entry| MenuItemEntry {
                menu_item_name: entry.name.clone(),
                menu_item_value: if kind == ControlType::IntegerMenu {
                    entry.value
                } else {
                    i64::from(entry.index)
                },
            });
            Some(items.collect())
        } else {
            None
        };

        Self {
            ctrl_name: ctrl.name.clone(),
            ctrl_max: ctrl.maximum,
            ctrl_min: ctrl.minimum,
            ctrl_step: ctrl.step,
            ctrl_default: ctrl.default,
            ctrl_type: kind.name().to_owned(),
            ctrl_value: ctrl.value,
            ctrl_menu,
        }
    }
}

/// Build the document from live device and display state.
pub fn snapshot(
    registry: &ControlRegistry<'_>,
    display: Option<&dyn DisplayColor>,
) -> Result<ControlFileDocument> {
    let device = registry
        .enumerate()?
        .iter()
        .filter_map(|ctrl| ctrl.kind().map(|kind| ControlEntry::from_descriptor(ctrl, kind)))
        .collect();

    let display = match display {
        Some(display) => Some(DisplaySection {
            fcc: Some(display.fcc()?),
            bws: Some(display.bws()?),
        }),
        None => None,
    };

    Ok(ControlFileDocument { device, display })
}

/// Apply a parsed document to the live device and display.
///
/// Returns whether anything differed from the live state.
pub fn apply(
    document: &ControlFileDocument,
    registry: &ControlRegistry<'_>,
    display: Option<&mut (dyn DisplayColor + 'static)>,
) -> bool {
    let values = document
        .device
        .iter()
        .filter_map(|entry| entry.ctrl_value.map(|value| (entry.ctrl_name.as_str(), value)));

    let mut changed = match registry.apply(values) {
        Ok(changed) => changed,
        Err(err) => {
            warn!(%err, "could not enumerate device controls");
            false
        }
    };

    if let (Some(section), Some(display)) = (&document.display, display) {
        if let Some(fcc) = &section.fcc {
            match display.set_fcc(fcc) {
                Ok(differs) => changed |= differs,
                Err(err) => warn!(%err, "could not write fcc block"),
            }
        }
        if let Some(bws) = &section.bws {
            match display.set_bws(bws) {
                Ok(differs) => changed |= differs,
                Err(err) => warn!(%err, "could not write bws block"),
            }
        }
    }

    changed
}

/// The control file on disk.
#[derive(Debug, Clone)]
pub struct ControlFile {
    path: PathBuf,
    max_size: u64,
}

impl ControlFile {
    /// Control file at `path`, refusing to read files over `max_size` bytes.
    #[must_use]
    pub fn new<P: Into<PathBuf>>(path: P, max_size: u64) -> Self {
        Self {
            path: path.into(),
            max_size,
        }
    }

    /// Path of the file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the file.
    ///
    /// Missing, empty, oversize and malformed files all yield `None`.
    pub fn load(&self) -> Option<ControlFileDocument> {
        match self.read() {
            Ok(document) => Some(document),
            Err(CameraError::Io(err)) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no control file yet");
                None
            }
            Err(err) => {
                warn!(path = %self.path.display(), %err, "ignoring control file");
                None
            }
        }
    }

    fn read(&self) -> Result<ControlFileDocument> {
        let size = fs::metadata(&self.path)?.len();
        if size > self.max_size {
            return Err(CameraError::ControlFile(format!(
                "{size} bytes exceeds the {} byte limit",
                self.max_size
            )));
        }

        let bytes = fs::read(&self.path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(CameraError::ControlFile("file is empty".to_owned()));
        }
        // The file may have grown between the two calls.
        if bytes.len() as u64 > self.max_size {
            return Err(CameraError::ControlFile("file grew past the limit".to_owned()));
        }

        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Serialize `document` and replace the file contents.
    pub fn store(&self, document: &ControlFileDocument) -> Result<()> {
        let json = serde_json::to_vec(document)?;
        fs::write(&self.path, json)?;
        debug!(
            path = %self.path.display(),
            controls = document.device.len(),
            "control file written"
        );
        Ok(())
    }

    /// Load the file and apply it. Returns whether anything changed.
    pub fn load_and_apply(
        &self,
        registry: &ControlRegistry<'_>,
        display: Option<&mut (dyn DisplayColor + 'static)>,
    ) -> bool {
        let Some(document) = self.load() else {
            return false;
        };
        let changed = apply(&document, registry, display);
        if changed {
            info!(path = %self.path.display(), "applied control file edits");
        }
        changed
    }

    /// Rewrite the file from live state.
    pub fn flush(
        &self,
        registry: &ControlRegistry<'_>,
        display: Option<&dyn DisplayColor>,
    ) -> Result<()> {
        let document = snapshot(registry, display)?;
        self.store(&document)
    }
}
