//! Device lifecycle: open, negotiate, map, stream, and tear down again.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::config::DaemonConfig;
use crate::traits::{
    CameraBackend, CameraDevice, CameraError, CaptureStream, Format, FourCC, Result,
};

/// Where the lifecycle manager is in bringing a device up or down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No device open.
    Closed,
    /// Opening the device node.
    Opening,
    /// Agreeing on pixel format and resolution.
    NegotiatingFormat,
    /// Asking the driver for capture buffers.
    RequestingBuffers,
    /// Mapping the capture buffers.
    MappingBuffers,
    /// Capture and control threads running.
    Streaming,
    /// Disabling the stream and releasing buffers.
    Stopping,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Stop requests shared between the orchestrator and the session threads.
///
/// Each loop keeps running only while its own flag is set and no daemon-wide
/// shutdown has been requested.
#[derive(Debug, Clone)]
pub struct RunFlags {
    shutdown: Arc<AtomicBool>,
    capture: Arc<AtomicBool>,
    control: Arc<AtomicBool>,
}

impl RunFlags {
    /// Fresh flags for a session, both loops enabled.
    #[must_use]
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self {
            shutdown,
            capture: Arc::new(AtomicBool::new(true)),
            control: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the daemon as a whole is stopping.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Whether the capture loop should keep going.
    #[must_use]
    pub fn capture_running(&self) -> bool {
        self.capture.load(Ordering::SeqCst) && !self.shutdown_requested()
    }

    /// Whether the control loop should keep going.
    #[must_use]
    pub fn control_running(&self) -> bool {
        self.control.load(Ordering::SeqCst) && !self.shutdown_requested()
    }

    /// Whether either loop should keep going.
    #[must_use]
    pub fn any_running(&self) -> bool {
        self.capture_running() || self.control_running()
    }

    /// Stop both loops; the session ends.
    pub fn halt(&self) {
        self.capture.store(false, Ordering::SeqCst);
        self.control.store(false, Ordering::SeqCst);
    }
}

/// A streaming device, ready for the session threads.
pub struct Session<D: CameraDevice> {
    /// Device handle shared by both threads.
    pub device: Arc<D>,
    /// Mapped and streaming buffers; owned by the capture thread.
    pub stream: D::Stream,
    /// Negotiated format.
    pub format: Format,
    /// Stop flags for this session.
    pub flags: RunFlags,
}

/// Drives a device through [`SessionState`].
pub struct LifecycleManager<B: CameraBackend> {
    backend: B,
    config: DaemonConfig,
    shutdown: Arc<AtomicBool>,
    state: SessionState,
}

impl<B: CameraBackend> LifecycleManager<B> {
    /// Manager for the device named in `config`.
    pub fn new(backend: B, config: DaemonConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            backend,
            config,
            shutdown,
            state: SessionState::Closed,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &DaemonConfig {
        &self.config
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "device state");
            self.state = next;
        }
    }

    /// Bring the device up to streaming, retrying after the backoff until it
    /// succeeds. Returns `None` once shutdown is requested.
    pub fn acquire(&mut self) -> Option<Session<B::Device>> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            match self.try_acquire() {
                Ok(session) => return Some(session),
                Err(_) => {
                    warn!(
                        device = %self.config.device_path.display(),
                        retry_in = ?self.config.reopen_backoff,
                        "device unavailable"
                    );
                    if !self.backoff() {
                        return None;
                    }
                }
            }
        }
    }

    /// One attempt at bringing the device up to streaming. On failure the
    /// device is closed again and the state is [`SessionState::Closed`].
    pub fn try_acquire(&mut self) -> Result<Session<B::Device>> {
        let result = self.open_session();
        if let Err(err) = &result {
            warn!(stage = %self.state, %err, "device setup failed");
            self.transition(SessionState::Closed);
        }
        result
    }

    fn open_session(&mut self) -> Result<Session<B::Device>> {
        self.transition(SessionState::Opening);
        let device = self.backend.open(&self.config.device_path)?;
        let caps = device.capabilities();
        info!(
            driver = %caps.driver,
            card = %caps.card,
            bus = %caps.bus_info,
            capture = caps.can_capture,
            streaming = caps.can_stream,
            "device opened"
        );

        self.transition(SessionState::NegotiatingFormat);
        let format = self.negotiate(&device)?;

        self.transition(SessionState::RequestingBuffers);
        let mut stream = device.request_buffers(self.config.buffer_count)?;

        self.transition(SessionState::MappingBuffers);
        stream.map_buffers()?;

        if let Err(err) = stream.stream_on() {
            error!(%err, "could not start streaming");
            return Err(err);
        }

        self.transition(SessionState::Streaming);
        info!(
            width = format.width,
            height = format.height,
            fourcc = %format.fourcc,
            buffers = stream.buffer_count(),
            "streaming"
        );

        Ok(Session {
            device: Arc::new(device),
            stream,
            format,
            flags: RunFlags::new(Arc::clone(&self.shutdown)),
        })
    }

    fn negotiate(&self, device: &B::Device) -> Result<Format> {
        let formats = device.enum_formats()?;
        if !formats.contains(&FourCC::MJPG) {
            return Err(CameraError::FormatNotSupported(FourCC::MJPG));
        }

        let requested = Format::new(self.config.width, self.config.height, FourCC::MJPG);
        if let Err(err) = device.set_format(&requested) {
            warn!(%err, "driver rejected the requested format");
        }

        let active = device.format()?;
        if active.fourcc != FourCC::MJPG {
            return Err(CameraError::Negotiation(format!(
                "driver settled on {} instead of {}",
                active.fourcc,
                FourCC::MJPG
            )));
        }
        Ok(active)
    }

    /// Sleep for the reopen backoff. Returns false if shutdown was requested
    /// in the meantime.
    fn backoff(&self) -> bool {
        let deadline = Instant::now() + self.config.reopen_backoff;
        let slice = self.config.poll_interval.max(Duration::from_millis(1));
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }

    /// Disable streaming, unmap the buffers and close the device. Both
    /// session threads must have stopped.
    pub fn teardown(
        &mut self,
        mut stream: <B::Device as CameraDevice>::Stream,
        device: Arc<B::Device>,
    ) {
        self.transition(SessionState::Stopping);
        if let Err(err) = stream.stream_off() {
            warn!(%err, "could not stop streaming");
        }
        drop(stream);
        drop(device);
        self.transition(SessionState::Closed);
    }
}
