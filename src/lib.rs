//! camview: a V4L2 camera capture daemon for embedded boards.
//!
//! The daemon streams MJPEG frames from a UVC camera into a decoder and keeps
//! the camera's controls (plus the display's color registers, where present)
//! in sync with a JSON control file that a web front end edits.
//!
//! Device access goes through the traits in [`traits`], with the v4l-backed
//! implementation in [`device`] and a mock for tests.

pub mod capture;
pub mod collaborators;
pub mod config;
pub mod control_file;
pub mod controls;
pub mod daemon;
pub mod device;
pub mod display;
mod ioctl;
pub mod session;
pub mod sync;
pub mod traits;
pub mod validation;
pub mod watch;

#[cfg(test)]
pub mod mock;

pub use collaborators::{CecPoller, Collaborators, FrameDecoder};
pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use device::{V4L2Backend, V4L2Device};
pub use display::{BwsParams, DisplayColor, FccParams};
pub use traits::{
    CameraBackend, CameraDevice, CameraError, CaptureStream, ControlDevice, DeviceCapabilities,
    Format, FourCC, Frame, FrameMetadata,
};
pub use validation::FrameStats;
