//! V4L2 device implementation using the v4l crate.

use std::os::raw::c_int;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use v4l::control::{Control, Value};
use v4l::device::Handle;
use v4l::format::Colorspace;
use v4l::video::Capture;
use v4l::Device;

use crate::config::DaemonConfig;
use crate::controls::{V4L2_CID_BASE, V4L2_CID_LASTP1};
use crate::ioctl::{self, MappedBuffer, RawControl, RawMenuItem};
use crate::traits::{
    CameraBackend, CameraDevice, CameraError, CaptureStream, ControlDescriptor, ControlDevice,
    ControlType, DeviceCapabilities, Format, FourCC, Frame, FrameMetadata, MenuEntry, Result,
};

/// Opens `/dev/video*` nodes through the v4l crate.
#[derive(Debug, Clone)]
pub struct V4L2Backend {
    dequeue_timeout: Duration,
}

impl V4L2Backend {
    /// Backend whose streams give up on a dequeue after `dequeue_timeout`.
    #[must_use]
    pub const fn new(dequeue_timeout: Duration) -> Self {
        Self { dequeue_timeout }
    }
}

impl Default for V4L2Backend {
    fn default() -> Self {
        Self::new(DaemonConfig::default().dequeue_timeout)
    }
}

impl CameraBackend for V4L2Backend {
    type Device = V4L2Device;

    fn open(&self, path: &Path) -> Result<V4L2Device> {
        let device = Device::with_path(path)
            .map_err(|err| CameraError::DeviceOpenFailed(format!("{}: {err}", path.display())))?;
        V4L2Device::from_device(device, self.dequeue_timeout)
    }
}

/// V4L2 device implementation wrapping the v4l crate.
pub struct V4L2Device {
    device: Device,
    capabilities: DeviceCapabilities,
    dequeue_timeout: Duration,
}

impl V4L2Device {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0) with the
    /// default dequeue timeout.
    pub fn open(index: u32) -> Result<Self> {
        V4L2Backend::default().open(Path::new(&format!("/dev/video{index}")))
    }

    fn from_device(device: Device, dequeue_timeout: Duration) -> Result<Self> {
        let caps = device
            .query_caps()
            .map_err(|err| CameraError::DeviceOpenFailed(err.to_string()))?;

        let capabilities = DeviceCapabilities {
            driver: caps.driver,
            card: caps.card,
            bus_info: caps.bus,
            can_capture: caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE),
            can_stream: caps.capabilities.contains(v4l::capability::Flags::STREAMING),
        };

        Ok(Self {
            device,
            capabilities,
            dequeue_timeout,
        })
    }

    fn fd(&self) -> c_int {
        self.device.handle().fd()
    }

    fn menu(&self, ctrl: &RawControl, integer: bool) -> Vec<MenuEntry> {
        let (Ok(first), Ok(last)) = (u32::try_from(ctrl.minimum), u32::try_from(ctrl.maximum))
        else {
            return Vec::new();
        };

        let mut entries = Vec::new();
        for index in first..=last {
            // Drivers may leave holes in a menu's index range.
            match ioctl::query_menu(self.fd(), ctrl.id, index, integer) {
                Ok(Some(RawMenuItem::Name(name))) => entries.push(MenuEntry {
                    index,
                    name,
                    value: i64::from(index),
                }),
                Ok(Some(RawMenuItem::Value(value))) => entries.push(MenuEntry {
                    index,
                    name: value.to_string(),
                    value,
                }),
                Ok(None) => {}
                Err(err) => debug!(control = %ctrl.name, index, %err, "menu item unreadable"),
            }
        }
        entries
    }

    fn describe(&self, ctrl: RawControl) -> ControlDescriptor {
        let menu = match ControlType::from_raw(ctrl.kind) {
            Some(ControlType::Menu) => Some(self.menu(&ctrl, false)),
            Some(ControlType::IntegerMenu) => Some(self.menu(&ctrl, true)),
            _ => None,
        };

        ControlDescriptor {
            id: ctrl.id,
            raw_type: ctrl.kind,
            minimum: i64::from(ctrl.minimum),
            maximum: i64::from(ctrl.maximum),
            step: i64::from(ctrl.step),
            default: i64::from(ctrl.default),
            value: None,
            menu,
            name: ctrl.name,
        }
    }
}

fn to_format(fmt: &v4l::Format) -> Format {
    Format {
        width: fmt.width,
        height: fmt.height,
        fourcc: FourCC::from(fmt.fourcc),
        size: fmt.size,
    }
}

impl ControlDevice for V4L2Device {
    /// Query every user-class control ID on its own, so one control the
    /// driver describes oddly cannot hide the others.
    fn query_controls(&self) -> Result<Vec<ControlDescriptor>> {
        let mut controls = Vec::new();
        for id in V4L2_CID_BASE..V4L2_CID_LASTP1 {
            match ioctl::query_control(self.fd(), id) {
                Ok(Some(ctrl)) => controls.push(self.describe(ctrl)),
                Ok(None) => {}
                Err(err) => debug!(id = format_args!("{id:#010x}"), %err, "control unreadable"),
            }
        }
        Ok(controls)
    }

    fn control(&self, id: u32) -> Result<i64> {
        // VIDIOC_G_CTRL only answers for controls with a 32-bit value.
        ioctl::get_control(self.fd(), id)
            .map(i64::from)
            .map_err(|err| CameraError::Control(format!("read {id:#010x}: {err}")))
    }

    fn set_control(&self, id: u32, kind: ControlType, value: i64) -> Result<()> {
        let value = match kind {
            ControlType::Boolean => Value::Boolean(value != 0),
            _ => Value::Integer(value),
        };

        self.device
            .set_control(Control { id, value })
            .map_err(|err| CameraError::Control(format!("write {id:#010x}: {err}")))
    }
}

impl CameraDevice for V4L2Device {
    type Stream = V4L2Stream;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn enum_formats(&self) -> Result<Vec<FourCC>> {
        let formats = self
            .device
            .enum_formats()
            .map_err(|err| CameraError::Negotiation(err.to_string()))?;

        Ok(formats.into_iter().map(|desc| FourCC::from(desc.fourcc)).collect())
    }

    fn format(&self) -> Result<Format> {
        let fmt = self
            .device
            .format()
            .map_err(|err| CameraError::Negotiation(err.to_string()))?;

        Ok(to_format(&fmt))
    }

    fn set_format(&self, format: &Format) -> Result<Format> {
        let mut fmt = self
            .device
            .format()
            .map_err(|err| CameraError::Negotiation(err.to_string()))?;

        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = format.fourcc.into();
        fmt.colorspace = Colorspace::JPEG;

        let fmt = self
            .device
            .set_format(&fmt)
            .map_err(|err| CameraError::Negotiation(err.to_string()))?;

        Ok(to_format(&fmt))
    }

    fn request_buffers(&self, count: u32) -> Result<V4L2Stream> {
        let handle = self.device.handle();
        let granted = ioctl::request_buffers(handle.fd(), count)
            .map_err(|err| CameraError::Buffers(format!("VIDIOC_REQBUFS: {err}")))?;

        let stream = V4L2Stream {
            handle,
            granted,
            buffers: Vec::new(),
            streaming: false,
            dequeue_timeout: self.dequeue_timeout,
        };
        if granted == 0 {
            return Err(CameraError::Buffers("driver granted no buffers".to_owned()));
        }
        if granted != count {
            debug!(requested = count, granted, "driver adjusted the buffer count");
        }
        Ok(stream)
    }
}

/// Memory-mapped capture queue of one device.
///
/// Dropping it stops streaming, unmaps every buffer and frees the queue.
pub struct V4L2Stream {
    handle: Arc<Handle>,
    granted: u32,
    buffers: Vec<MappedBuffer>,
    streaming: bool,
    dequeue_timeout: Duration,
}

impl V4L2Stream {
    fn fd(&self) -> c_int {
        self.handle.fd()
    }
}

impl Drop for V4L2Stream {
    fn drop(&mut self) {
        if self.streaming {
            if let Err(err) = ioctl::stream_off(self.fd()) {
                warn!(%err, "VIDIOC_STREAMOFF failed");
            }
        }
        self.buffers.clear();
        if let Err(err) = ioctl::release_buffers(self.fd()) {
            debug!(%err, "could not free capture buffers");
        }
    }
}

impl CaptureStream for V4L2Stream {
    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn map_buffers(&mut self) -> Result<()> {
        for index in 0..self.granted {
            let buffer = ioctl::map_buffer(self.fd(), index)
                .map_err(|err| CameraError::Buffers(format!("map buffer {index}: {err}")))?;
            self.buffers.push(buffer);
        }
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        for (index, _) in (0..).zip(&self.buffers) {
            ioctl::queue_buffer(self.fd(), index)
                .map_err(|err| CameraError::StreamError(format!("queue buffer {index}: {err}")))?;
        }
        ioctl::stream_on(self.fd())
            .map_err(|err| CameraError::StreamError(format!("VIDIOC_STREAMON: {err}")))?;
        self.streaming = true;
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        ioctl::stream_off(self.fd())
            .map_err(|err| CameraError::StreamError(format!("VIDIOC_STREAMOFF: {err}")))?;
        self.streaming = false;
        Ok(())
    }

    fn dequeue(&mut self) -> Result<Frame<'_>> {
        let timeout = i32::try_from(self.dequeue_timeout.as_millis()).unwrap_or(i32::MAX);
        let ready = self
            .handle
            .poll(libc::POLLIN, timeout)
            .map_err(|err| CameraError::Dequeue(format!("poll: {err}")))?;
        if ready == 0 {
            return Err(CameraError::Dequeue(format!(
                "no frame within {:?}",
                self.dequeue_timeout
            )));
        }

        let buf = ioctl::dequeue_buffer(self.fd())
            .map_err(|err| CameraError::Dequeue(format!("VIDIOC_DQBUF: {err}")))?;
        let index = buf.index as usize;
        let mapped = self
            .buffers
            .get(index)
            .ok_or_else(|| CameraError::Dequeue(format!("unknown buffer {index}")))?
            .as_slice();
        let data = mapped.get(..buf.bytes_used as usize).unwrap_or(mapped);

        Ok(Frame {
            index,
            data,
            metadata: FrameMetadata {
                sequence: buf.sequence,
                timestamp: buf.timestamp,
                bytes_used: buf.bytes_used,
            },
        })
    }

    fn requeue(&mut self, index: usize) -> Result<()> {
        let kernel_index = u32::try_from(index)
            .ok()
            .filter(|_| index < self.buffers.len())
            .ok_or_else(|| CameraError::Requeue {
                index,
                reason: "no such buffer".to_owned(),
            })?;

        ioctl::queue_buffer(self.fd(), kernel_index).map_err(|err| CameraError::Requeue {
            index,
            reason: err.to_string(),
        })
    }
}
