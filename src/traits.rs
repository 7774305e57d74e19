//! Core traits and types for the capture device abstraction.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

/// Pixel format representation (e.g., MJPG, YUYV).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Create a new `FourCC` from a 4-byte array.
    #[must_use]
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(*code)
    }

    /// MJPEG pixel format (Motion JPEG).
    pub const MJPG: Self = Self::new(b"MJPG");
    /// YUYV pixel format (4:2:2 packed).
    pub const YUYV: Self = Self::new(b"YUYV");
}

impl std::fmt::Display for FourCC {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl From<v4l::FourCC> for FourCC {
    fn from(fourcc: v4l::FourCC) -> Self {
        Self(fourcc.repr)
    }
}

impl From<FourCC> for v4l::FourCC {
    fn from(fourcc: FourCC) -> Self {
        Self::new(&fourcc.0)
    }
}

/// Video format specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format.
    pub fourcc: FourCC,
    /// Largest frame size the driver will produce, in bytes.
    pub size: u32,
}

impl Format {
    /// Create a new format request. The size is filled in by the driver.
    #[must_use]
    pub const fn new(width: u32, height: u32, fourcc: FourCC) -> Self {
        Self {
            width,
            height,
            fourcc,
            size: 0,
        }
    }
}

/// Device capability flags.
#[derive(Debug, Clone, Default)]
pub struct DeviceCapabilities {
    /// Driver name.
    pub driver: String,
    /// Card/device name.
    pub card: String,
    /// Bus information.
    pub bus_info: String,
    /// Whether the device can capture video.
    pub can_capture: bool,
    /// Whether the device supports streaming.
    pub can_stream: bool,
}

/// Metadata for a captured frame.
#[derive(Debug, Clone, Default)]
pub struct FrameMetadata {
    /// Frame sequence number.
    pub sequence: u32,
    /// Capture timestamp.
    pub timestamp: Duration,
    /// Actual bytes used in the frame buffer.
    pub bytes_used: u32,
}

/// A filled capture buffer, borrowed from the stream until it is requeued.
#[derive(Debug)]
pub struct Frame<'a> {
    /// Kernel index of the buffer; pass it back to `requeue`.
    pub index: usize,
    /// Compressed frame bytes.
    pub data: &'a [u8],
    /// Frame metadata.
    pub metadata: FrameMetadata,
}

/// Kind of a device control, as reported by the kernel.
///
/// Only these kinds are written to the control file; anything else the
/// kernel reports is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    /// Signed integer.
    Integer,
    /// On/off switch.
    Boolean,
    /// Menu with named options; the value is the option index.
    Menu,
    /// Write-only trigger.
    Button,
    /// 64-bit signed integer.
    Integer64,
    /// Control class marker.
    CtrlClass,
    /// String control.
    String,
    /// Bit mask.
    Bitmask,
    /// Menu whose options carry integer values.
    IntegerMenu,
    /// Array of u8.
    U8,
    /// Array of u16.
    U16,
    /// Array of u32.
    U32,
    /// Width/height pair.
    Area,
}

impl ControlType {
    /// Every supported kind, in kernel numbering order.
    pub const ALL: [Self; 13] = [
        Self::Integer,
        Self::Boolean,
        Self::Menu,
        Self::Button,
        Self::Integer64,
        Self::CtrlClass,
        Self::String,
        Self::Bitmask,
        Self::IntegerMenu,
        Self::U8,
        Self::U16,
        Self::U32,
        Self::Area,
    ];

    /// Map a raw `V4L2_CTRL_TYPE_*` value.
    #[must_use]
    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.raw() == raw)
    }

    /// The raw `V4L2_CTRL_TYPE_*` value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        match self {
            Self::Integer => 1,
            Self::Boolean => 2,
            Self::Menu => 3,
            Self::Button => 4,
            Self::Integer64 => 5,
            Self::CtrlClass => 6,
            Self::String => 7,
            Self::Bitmask => 8,
            Self::IntegerMenu => 9,
            Self::U8 => 0x0100,
            Self::U16 => 0x0101,
            Self::U32 => 0x0102,
            Self::Area => 0x0106,
        }
    }

    /// Name used for this kind in the control file.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Integer => "V4L2_CTRL_TYPE_INTEGER",
            Self::Boolean => "V4L2_CTRL_TYPE_BOOLEAN",
            Self::Menu => "V4L2_CTRL_TYPE_MENU",
            Self::Button => "V4L2_CTRL_TYPE_BUTTON",
            Self::Integer64 => "V4L2_CTRL_TYPE_INTEGER64",
            Self::CtrlClass => "V4L2_CTRL_TYPE_CTRL_CLASS",
            Self::String => "V4L2_CTRL_TYPE_STRING",
            Self::Bitmask => "V4L2_CTRL_TYPE_BITMASK",
            Self::IntegerMenu => "V4L2_CTRL_TYPE_INTEGER_MENU",
            Self::U8 => "V4L2_CTRL_TYPE_U8",
            Self::U16 => "V4L2_CTRL_TYPE_U16",
            Self::U32 => "V4L2_CTRL_TYPE_U32",
            Self::Area => "V4L2_CTRL_TYPE_AREA",
        }
    }

    /// Whether the control has a single 32-bit value the device can report.
    #[must_use]
    pub const fn has_value(self) -> bool {
        matches!(
            self,
            Self::Integer | Self::Boolean | Self::Menu | Self::IntegerMenu | Self::Bitmask
        )
    }

    /// Whether the control carries a list of menu options.
    #[must_use]
    pub const fn is_menu(self) -> bool {
        matches!(self, Self::Menu | Self::IntegerMenu)
    }
}

/// One option of a menu control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    /// Option index.
    pub index: u32,
    /// Option label.
    pub name: String,
    /// Kernel-reported option value. Equal to the index for plain menus.
    pub value: i64,
}

/// Metadata and current value of one device control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDescriptor {
    /// Control identifier.
    pub id: u32,
    /// Human readable name; the lookup key in the control file.
    pub name: String,
    /// Raw kernel type.
    pub raw_type: u32,
    /// Minimum value.
    pub minimum: i64,
    /// Maximum value.
    pub maximum: i64,
    /// Step between valid values.
    pub step: i64,
    /// Default value.
    pub default: i64,
    /// Live value, if the device reported one.
    pub value: Option<i64>,
    /// Menu options for menu controls.
    pub menu: Option<Vec<MenuEntry>>,
}

impl ControlDescriptor {
    /// Supported kind of this control, or `None` if the kernel type is unknown.
    #[must_use]
    pub fn kind(&self) -> Option<ControlType> {
        ControlType::from_raw(self.raw_type)
    }
}

/// Error type for camera operations.
#[derive(Debug, Error)]
pub enum CameraError {
    /// Failed to open device.
    #[error("Failed to open device: {0}")]
    DeviceOpenFailed(String),
    /// Requested format is not supported.
    #[error("Format not supported: {0}")]
    FormatNotSupported(FourCC),
    /// Format negotiation failed.
    #[error("Format negotiation failed: {0}")]
    Negotiation(String),
    /// Buffer request or mapping failed.
    #[error("Buffer setup failed: {0}")]
    Buffers(String),
    /// Error enabling or disabling the stream.
    #[error("Stream error: {0}")]
    StreamError(String),
    /// Dequeue failed; the device is gone or stalled.
    #[error("Dequeue failed: {0}")]
    Dequeue(String),
    /// Handing a buffer back to the kernel failed.
    #[error("Requeue of buffer {index} failed: {reason}")]
    Requeue {
        /// Buffer index.
        index: usize,
        /// Driver message.
        reason: String,
    },
    /// Control query or write failed.
    #[error("Control error: {0}")]
    Control(String),
    /// Control value cannot be represented as an integer.
    #[error("Control {0:#010x} has no integer value")]
    UnsupportedControl(u32),
    /// Display color register access failed.
    #[error("Display error: {0}")]
    Display(String),
    /// Control file could not be used.
    #[error("Control file: {0}")]
    ControlFile(String),
    /// File watch error.
    #[error("Watch error: {0}")]
    Watch(String),
    /// A session thread did not stop within its join timeout.
    #[error("{0} thread did not stop in time")]
    Wedged(&'static str),
    /// A session thread panicked and its resources are gone.
    #[error("{0} thread panicked")]
    Panicked(&'static str),
    /// Operation timed out.
    #[error("Operation timed out")]
    Timeout,
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for camera operations.
pub type Result<T> = std::result::Result<T, CameraError>;

/// Opens capture devices by path.
pub trait CameraBackend {
    /// Device type produced by this backend.
    type Device: CameraDevice;

    /// Open the device node at `path`.
    fn open(&self, path: &Path) -> Result<Self::Device>;
}

/// Control get/set access on an open device.
///
/// Implementations must be callable from the control thread while the
/// capture thread streams on the same handle.
pub trait ControlDevice: Send + Sync {
    /// Enumerate every control the device exposes. Values are left empty.
    fn query_controls(&self) -> Result<Vec<ControlDescriptor>>;

    /// Read the live value of a control.
    fn control(&self, id: u32) -> Result<i64>;

    /// Write a control value.
    fn set_control(&self, id: u32, kind: ControlType, value: i64) -> Result<()>;
}

/// Abstraction over an open capture device.
pub trait CameraDevice: ControlDevice + 'static {
    /// Buffer set returned by `request_buffers`.
    type Stream: CaptureStream + 'static;

    /// Get device capabilities.
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Pixel formats the device can capture.
    fn enum_formats(&self) -> Result<Vec<FourCC>>;

    /// Get current format.
    fn format(&self) -> Result<Format>;

    /// Request a capture format. Returns the format the driver settled on.
    fn set_format(&self, format: &Format) -> Result<Format>;

    /// Ask the driver for `count` memory-mapped buffers. The driver may grant
    /// a different number; nothing is mapped yet.
    fn request_buffers(&self, count: u32) -> Result<Self::Stream>;
}

/// A buffer set and its streaming state.
///
/// Dropping the stream unmaps every buffer and frees the queue.
pub trait CaptureStream: Send {
    /// Number of mapped buffers.
    fn buffer_count(&self) -> usize;

    /// Map every granted buffer. On failure the buffers mapped so far stay
    /// with the stream and are unmapped when it is dropped.
    fn map_buffers(&mut self) -> Result<()>;

    /// Hand every buffer to the kernel and enable streaming.
    fn stream_on(&mut self) -> Result<()>;

    /// Disable streaming.
    fn stream_off(&mut self) -> Result<()>;

    /// Wait for the next filled buffer. The buffer stays with the caller
    /// until it is passed to `requeue`.
    fn dequeue(&mut self) -> Result<Frame<'_>>;

    /// Give a dequeued buffer back to the kernel.
    fn requeue(&mut self, index: usize) -> Result<()>;
}
