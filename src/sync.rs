//! Control sync loop.
//!
//! Keeps the control file, the device controls and the display registers in
//! agreement: edits to the file are applied to the hardware, and changes made
//! on the hardware side (applied edits, CEC remote presses) are written back
//! to the file once they have settled.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::collaborators::CecPoller;
use crate::control_file::ControlFile;
use crate::controls::ControlRegistry;
use crate::display::DisplayColor;
use crate::session::RunFlags;
use crate::traits::ControlDevice;
use crate::watch::FileWatch;

/// Longest wait for the watch to report the session-start rewrite.
const OWN_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Control-file synchronization state carried across sessions.
pub struct ControlSync {
    file: ControlFile,
    watch: Option<FileWatch>,
    display: Option<Box<dyn DisplayColor>>,
    cec: Option<Box<dyn CecPoller>>,
    flush_threshold: u32,
    dirty: bool,
    pending: u32,
}

impl ControlSync {
    /// Sync `file`, optionally watching it and driving display and CEC
    /// collaborators. The file is rewritten after `flush_threshold` dirty
    /// iterations.
    #[must_use]
    pub fn new(
        file: ControlFile,
        watch: Option<FileWatch>,
        display: Option<Box<dyn DisplayColor>>,
        cec: Option<Box<dyn CecPoller>>,
        flush_threshold: u32,
    ) -> Self {
        Self {
            file,
            watch,
            display,
            cec,
            flush_threshold,
            dirty: false,
            pending: 0,
        }
    }

    /// Whether live state has diverged from the file.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Session start: apply the file, rewrite it for this device and watch it.
    pub fn start(&mut self, device: &dyn ControlDevice) {
        let registry = ControlRegistry::new(device);
        self.dirty = self.file.load_and_apply(&registry, self.display.as_deref_mut());
        self.pending = 0;

        let armed = self.watch.as_mut().is_some_and(FileWatch::arm);
        self.write_back(&registry);
        if let Some(watch) = &mut self.watch {
            // Consume the event of our own rewrite before watching for edits.
            if armed && !watch.wait(OWN_WRITE_TIMEOUT) {
                debug!("session-start rewrite not reported by the watch");
            }
            watch.rearm();
        }
        if let Some(cec) = &mut self.cec {
            cec.start();
        }
        info!(path = %self.file.path().display(), dirty = self.dirty, "control sync started");
    }

    /// One iteration. Returns whether the file was rewritten.
    pub fn step(&mut self, device: &dyn ControlDevice) -> bool {
        let registry = ControlRegistry::new(device);

        if self.watch.as_mut().is_some_and(FileWatch::poll) {
            debug!("control file edited");
            if let Some(watch) = &mut self.watch {
                watch.rearm();
            }
            self.dirty |= self.file.load_and_apply(&registry, self.display.as_deref_mut());
        }

        if let Some(cec) = &mut self.cec {
            self.dirty |= cec.poll(device);
        }

        if !self.dirty {
            return false;
        }
        self.pending += 1;
        if self.pending <= self.flush_threshold {
            return false;
        }

        self.flush(&registry);
        true
    }

    /// Session end: write back anything not yet flushed.
    pub fn finish(&mut self, device: &dyn ControlDevice) {
        if self.dirty {
            self.flush(&ControlRegistry::new(device));
        }
        if let Some(cec) = &mut self.cec {
            cec.stop();
        }
    }

    fn flush(&mut self, registry: &ControlRegistry<'_>) {
        self.write_back(registry);
        // Our own write must not read back as an edit.
        if let Some(watch) = &mut self.watch {
            watch.rearm();
        }
        self.dirty = false;
        self.pending = 0;
    }

    fn write_back(&self, registry: &ControlRegistry<'_>) {
        if let Err(err) = self.file.flush(registry, self.display.as_deref()) {
            warn!(path = %self.file.path().display(), %err, "could not write control file");
        }
    }
}

/// Run `sync` against `device` every `interval` until the session's control
/// flag clears.
pub fn run_control_sync(
    sync: &mut ControlSync,
    device: &dyn ControlDevice,
    flags: &RunFlags,
    interval: Duration,
) {
    sync.start(device);
    let mut iterations: u64 = 0;
    while flags.control_running() {
        if sync.step(device) {
            debug!(iterations, "control file rewritten");
        }
        iterations += 1;
        thread::sleep(interval);
    }
    sync.finish(device);
    info!(iterations, "control sync finished");
}
