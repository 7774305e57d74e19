//! One-shot change notification on the control file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use inotify::{Inotify, WatchMask};
use tracing::{debug, warn};

use crate::traits::{CameraError, Result};

const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Watch for a completed write to one file.
///
/// The watch fires at most once per [`arm`](Self::arm); callers re-arm after
/// handling each change.
pub struct FileWatch {
    inotify: Inotify,
    path: PathBuf,
    buffer: [u8; 1024],
    armed: bool,
}

impl FileWatch {
    /// Create an unarmed watch for `path`.
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let inotify = Inotify::init()
            .map_err(|err| CameraError::Watch(format!("inotify init failed: {err}")))?;
        Ok(Self {
            inotify,
            path: path.into(),
            buffer: [0; 1024],
            armed: false,
        })
    }

    /// Watched path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a change will be reported.
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed
    }

    /// Start watching. A missing file leaves the watch disarmed.
    pub fn arm(&mut self) -> bool {
        match self
            .inotify
            .watches()
            .add(&self.path, WatchMask::CLOSE_WRITE | WatchMask::ONESHOT)
        {
            Ok(_) => {
                self.armed = true;
                debug!(path = %self.path.display(), "watch armed");
            }
            Err(err) => {
                self.armed = false;
                warn!(path = %self.path.display(), %err, "could not watch control file");
            }
        }
        self.armed
    }

    /// Whether the file was written since the watch was armed. Never blocks.
    ///
    /// A reported change consumes the watch.
    pub fn poll(&mut self) -> bool {
        let changed = self.drain();
        if changed {
            self.armed = false;
        }
        changed
    }

    /// Discard pending events and arm again.
    pub fn rearm(&mut self) -> bool {
        self.drain();
        self.arm()
    }

    /// Block until the file is written or `timeout` passes.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.poll() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(WAIT_SLICE.min(deadline - now));
        }
    }

    fn drain(&mut self) -> bool {
        let mut seen = false;
        loop {
            match self.inotify.read_events(&mut self.buffer) {
                Ok(events) => {
                    if events.count() == 0 {
                        break;
                    }
                    seen = true;
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(path = %self.path.display(), %err, "reading watch events failed");
                    break;
                }
            }
        }
        seen
    }
}
