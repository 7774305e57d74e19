//! Daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the capture daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Capture device node.
    pub device_path: PathBuf,
    /// Persisted control file.
    pub control_file: PathBuf,
    /// Requested frame width.
    pub width: u32,
    /// Requested frame height.
    pub height: u32,
    /// Number of memory-mapped capture buffers.
    pub buffer_count: u32,
    /// Wait between failed device opens.
    pub reopen_backoff: Duration,
    /// Period of the control thread and of the orchestrator's monitor loop.
    pub poll_interval: Duration,
    /// Dirty iterations tolerated before the control file is rewritten.
    pub flush_threshold: u32,
    /// How long to wait for each session thread to stop.
    pub join_timeout: Duration,
    /// Longest wait for a single frame before the device is considered lost.
    pub dequeue_timeout: Duration,
    /// Control files larger than this are ignored.
    pub max_control_file_size: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            device_path: PathBuf::from("/dev/video0"),
            control_file: PathBuf::from("/var/www/guvcview/ctrl.json"),
            width: 1920,
            height: 1080,
            buffer_count: 3,
            reopen_backoff: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            flush_threshold: 20,
            join_timeout: Duration::from_secs(5),
            dequeue_timeout: Duration::from_secs(2),
            max_control_file_size: 500_000,
        }
    }
}

impl DaemonConfig {
    /// Default configuration for another device node.
    #[must_use]
    pub fn for_device<P: Into<PathBuf>>(device_path: P) -> Self {
        Self {
            device_path: device_path.into(),
            ..Self::default()
        }
    }
}
