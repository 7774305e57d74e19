//! Raw V4L2 requests for per-buffer streaming and per-ID control access.
//!
//! The v4l crate keeps its buffer arena private and only reads a subset of
//! control types, so capture buffers and user controls go through these
//! thin wrappers around [`v4l::v4l2::ioctl`] instead.
#![allow(unsafe_code)]

use std::io;
use std::mem;
use std::os::raw::{c_int, c_void};
use std::ptr::{self, NonNull};
use std::slice;
use std::time::Duration;

use tracing::warn;
use v4l::buffer::Type;
use v4l::memory::Memory;
use v4l::v4l2::{self, vidioc};
use v4l::v4l_sys::{v4l2_buffer, v4l2_control, v4l2_queryctrl, v4l2_querymenu, v4l2_requestbuffers};
use v4l::Timestamp;

const CTRL_FLAG_DISABLED: u32 = 0x0001;
const BUF_TYPE: u32 = Type::VideoCapture as u32;
const MEMORY: u32 = Memory::Mmap as u32;

/// Issue `request`, retrying when a signal interrupts it.
fn xioctl<T>(fd: c_int, request: vidioc::_IOC_TYPE, arg: &mut T) -> io::Result<()> {
    let argp: *mut T = arg;
    loop {
        // SAFETY: `arg` is an exclusively borrowed value of the type `request` expects.
        match unsafe { v4l2::ioctl(fd, request, argp.cast::<c_void>()) } {
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            result => return result,
        }
    }
}

fn zeroed<T>() -> T {
    // SAFETY: only used for the kernel's plain-old-data request structs, for
    // which all-zero bytes are a valid value.
    unsafe { mem::zeroed() }
}

fn buffer_request(index: u32) -> v4l2_buffer {
    v4l2_buffer {
        index,
        type_: BUF_TYPE,
        memory: MEMORY,
        ..zeroed()
    }
}

/// Ask the driver for `count` mmap capture buffers. Returns how many it granted.
pub fn request_buffers(fd: c_int, count: u32) -> io::Result<u32> {
    let mut request = v4l2_requestbuffers {
        count,
        type_: BUF_TYPE,
        memory: MEMORY,
        ..zeroed()
    };
    xioctl(fd, vidioc::VIDIOC_REQBUFS, &mut request)?;
    Ok(request.count)
}

/// Free every buffer of the capture queue. All mappings must be gone.
pub fn release_buffers(fd: c_int) -> io::Result<()> {
    request_buffers(fd, 0).map(drop)
}

/// One capture buffer mapped into this process.
///
/// Unmapped on drop.
pub struct MappedBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the mapping is owned exclusively by this value and is only read
// through `&self`.
unsafe impl Send for MappedBuffer {}

impl MappedBuffer {
    /// Mapped bytes.
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` points at `len` bytes mapped by `map_buffer` that stay
        // mapped until drop.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        let addr = self.ptr.as_ptr().cast::<c_void>();
        // SAFETY: the region was mapped with exactly this address and length.
        if let Err(err) = unsafe { v4l2::munmap(addr, self.len) } {
            warn!(%err, len = self.len, "munmap failed");
        }
    }
}

/// Look up buffer `index` and map it.
pub fn map_buffer(fd: c_int, index: u32) -> io::Result<MappedBuffer> {
    let mut buf = buffer_request(index);
    xioctl(fd, vidioc::VIDIOC_QUERYBUF, &mut buf)?;

    let len = buf.length as usize;
    // SAFETY: QUERYBUF fills the offset member for mmap buffers.
    let offset = unsafe { buf.m.offset };
    let offset = libc::off_t::try_from(offset)
        .map_err(|_| io::Error::other(format!("buffer {index} offset out of range")))?;
    // SAFETY: a fresh shared mapping of the driver's buffer; no existing memory
    // is affected.
    let addr = unsafe {
        v4l2::mmap(
            ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            offset,
        )?
    };
    let ptr = NonNull::new(addr.cast::<u8>())
        .ok_or_else(|| io::Error::other("mmap returned null"))?;
    Ok(MappedBuffer { ptr, len })
}

/// Hand buffer `index` to the kernel.
pub fn queue_buffer(fd: c_int, index: u32) -> io::Result<()> {
    let mut buf = buffer_request(index);
    xioctl(fd, vidioc::VIDIOC_QBUF, &mut buf)
}

/// A filled buffer taken back from the kernel.
#[derive(Debug, Clone, Copy)]
pub struct DequeuedBuffer {
    /// Kernel buffer index.
    pub index: u32,
    /// Bytes of payload.
    pub bytes_used: u32,
    /// Driver frame counter.
    pub sequence: u32,
    /// Capture time.
    pub timestamp: Duration,
}

/// Take the oldest filled buffer. Fails with `WouldBlock` when none is ready.
pub fn dequeue_buffer(fd: c_int) -> io::Result<DequeuedBuffer> {
    let mut buf = buffer_request(0);
    xioctl(fd, vidioc::VIDIOC_DQBUF, &mut buf)?;

    let stamp = Timestamp::from(buf.timestamp);
    // Monotonic capture clock, never negative.
    #[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
    let timestamp = Duration::new(
        stamp.sec.max(0) as u64,
        (stamp.usec.max(0) as u32).saturating_mul(1000),
    );

    Ok(DequeuedBuffer {
        index: buf.index,
        bytes_used: buf.bytesused,
        sequence: buf.sequence,
        timestamp,
    })
}

/// Start streaming on the capture queue.
pub fn stream_on(fd: c_int) -> io::Result<()> {
    let mut kind = BUF_TYPE;
    xioctl(fd, vidioc::VIDIOC_STREAMON, &mut kind)
}

/// Stop streaming. The kernel takes back every queued buffer.
pub fn stream_off(fd: c_int) -> io::Result<()> {
    let mut kind = BUF_TYPE;
    xioctl(fd, vidioc::VIDIOC_STREAMOFF, &mut kind)
}

/// A control as described by `VIDIOC_QUERYCTRL`.
#[derive(Debug, Clone)]
pub struct RawControl {
    /// Control identifier.
    pub id: u32,
    /// `V4L2_CTRL_TYPE_*` value.
    pub kind: u32,
    /// Driver supplied name.
    pub name: String,
    /// Minimum value.
    pub minimum: i32,
    /// Maximum value.
    pub maximum: i32,
    /// Step between valid values.
    pub step: i32,
    /// Default value.
    pub default: i32,
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(bytes.get(..end).unwrap_or(bytes)).into_owned()
}

/// Describe control `id`. `Ok(None)` when the device has no such control or
/// it is disabled.
pub fn query_control(fd: c_int, id: u32) -> io::Result<Option<RawControl>> {
    let mut query = v4l2_queryctrl { id, ..zeroed() };
    match xioctl(fd, vidioc::VIDIOC_QUERYCTRL, &mut query) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => return Ok(None),
        Err(err) => return Err(err),
    }
    if query.flags & CTRL_FLAG_DISABLED != 0 {
        return Ok(None);
    }

    Ok(Some(RawControl {
        id: query.id,
        kind: query.type_,
        name: c_string(&query.name),
        minimum: query.minimum,
        maximum: query.maximum,
        step: query.step,
        default: query.default_value,
    }))
}

/// A menu option as described by `VIDIOC_QUERYMENU`.
#[derive(Debug, Clone)]
pub enum RawMenuItem {
    /// Option of a named menu.
    Name(String),
    /// Option of an integer menu.
    Value(i64),
}

/// Describe option `index` of menu control `id`. `Ok(None)` for indices the
/// driver skips.
pub fn query_menu(
    fd: c_int,
    id: u32,
    index: u32,
    integer: bool,
) -> io::Result<Option<RawMenuItem>> {
    let mut query = v4l2_querymenu {
        id,
        index,
        ..zeroed()
    };
    match xioctl(fd, vidioc::VIDIOC_QUERYMENU, &mut query) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::InvalidInput => return Ok(None),
        Err(err) => return Err(err),
    }

    // SAFETY: the kernel fills `value` for integer menus and `name` otherwise.
    let item = unsafe {
        if integer {
            RawMenuItem::Value(query.__bindgen_anon_1.value)
        } else {
            let name = query.__bindgen_anon_1.name;
            RawMenuItem::Name(c_string(&name))
        }
    };
    Ok(Some(item))
}

/// Read the value of a 32-bit control (integer, boolean, menu, integer menu
/// or bitmask).
pub fn get_control(fd: c_int, id: u32) -> io::Result<i32> {
    let mut control = v4l2_control { id, value: 0 };
    xioctl(fd, vidioc::VIDIOC_G_CTRL, &mut control)?;
    Ok(control.value)
}
