//! Mock device implementation for testing without hardware.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::collaborators::{CecPoller, FrameDecoder};
use crate::controls::{ControlRegistry, V4L2_CID_BASE};
use crate::display::{BwsParams, DisplayColor, FccParams};
use crate::traits::{
    CameraBackend, CameraDevice, CameraError, CaptureStream, ControlDescriptor, ControlDevice,
    ControlType, DeviceCapabilities, Format, FourCC, Frame, FrameMetadata, MenuEntry, Result,
};

/// Device and stream calls observed by the mock, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// Device opened.
    Open,
    /// Device closed.
    Close,
    /// Buffers requested from the driver.
    Request(u32),
    /// Buffer mapped.
    Map(usize),
    /// Buffer unmapped.
    Unmap(usize),
    /// Buffer handed to the kernel before streaming.
    Queue(usize),
    /// Streaming enabled.
    StreamOn,
    /// Streaming disabled.
    StreamOff,
    /// Buffer dequeued.
    Dequeue(usize),
    /// Buffer requeued.
    Requeue(usize),
}

/// Failure injection knobs for the mock backend.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Number of opens that fail before one succeeds.
    pub failed_opens: usize,
    /// Formats reported by format enumeration.
    pub formats: Vec<FourCC>,
    /// Fourcc reported when the active format is re-queried.
    pub confirmed_fourcc: Option<FourCC>,
    /// Whether the buffer request fails.
    pub fail_request: bool,
    /// Buffers granted regardless of the requested count.
    pub granted_buffers: Option<u32>,
    /// Buffer index whose mapping fails.
    pub fail_map_at: Option<usize>,
    /// Whether enabling the stream fails.
    pub fail_stream_on: bool,
    /// Frames delivered before every dequeue fails.
    pub frames_before_failure: Option<usize>,
    /// Frame number whose requeue fails.
    pub fail_requeue_of_frame: Option<usize>,
    /// Time each dequeue takes.
    pub frame_interval: Duration,
    /// Dequeue blocks this long and then fails.
    pub stall: Option<Duration>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            failed_opens: 0,
            formats: vec![FourCC::YUYV, FourCC::MJPG],
            confirmed_fourcc: None,
            fail_request: false,
            granted_buffers: None,
            fail_map_at: None,
            fail_stream_on: false,
            frames_before_failure: None,
            fail_requeue_of_frame: None,
            frame_interval: Duration::from_millis(2),
            stall: None,
        }
    }
}

struct Shared {
    behavior: MockBehavior,
    controls: Mutex<Vec<ControlDescriptor>>,
    rejected: Mutex<Vec<String>>,
    writes: Mutex<Vec<(String, i64)>>,
    events: Mutex<Vec<MockEvent>>,
    format: Mutex<Format>,
    opens: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn control(
    id: u32,
    name: &str,
    kind: ControlType,
    range: (i64, i64),
    value: i64,
) -> ControlDescriptor {
    ControlDescriptor {
        id,
        name: name.to_owned(),
        raw_type: kind.raw(),
        minimum: range.0,
        maximum: range.1,
        step: 1,
        default: range.0,
        value: Some(value),
        menu: None,
    }
}

fn menu(entries: &[(u32, &str, i64)]) -> Option<Vec<MenuEntry>> {
    Some(
        entries
            .iter()
            .map(|&(index, name, value)| MenuEntry {
                index,
                name: name.to_owned(),
                value,
            })
            .collect(),
    )
}

fn default_controls() -> Vec<ControlDescriptor> {
    let mut power_line = control(
        V4L2_CID_BASE + 24,
        "Power Line Frequency",
        ControlType::Menu,
        (0, 2),
        1,
    );
    power_line.menu = menu(&[(0, "Disabled", 0), (1, "50 Hz", 1), (2, "60 Hz", 2)]);

    let mut bias = control(
        V4L2_CID_BASE + 40,
        "Exposure Bias",
        ControlType::IntegerMenu,
        (0, 2),
        1,
    );
    bias.menu = menu(&[(0, "-2000", -2000), (1, "0", 0), (2, "2000", 2000)]);

    let mut blob = control(V4L2_CID_BASE + 30, "Vendor Blob", ControlType::Integer, (0, 1), 0);
    blob.raw_type = 0x0200;

    vec![
        control(V4L2_CID_BASE + 2, "Saturation", ControlType::Integer, (0, 100), 64),
        control(V4L2_CID_BASE, "Brightness", ControlType::Integer, (0, 255), 40),
        control(V4L2_CID_BASE + 1, "Contrast", ControlType::Integer, (0, 95), 32),
        control(V4L2_CID_BASE + 5, "Restore Defaults", ControlType::Button, (0, 0), 0),
        control(
            V4L2_CID_BASE + 12,
            "White Balance Temperature, Auto",
            ControlType::Boolean,
            (0, 1),
            1,
        ),
        power_line,
        blob,
        bias,
        control(0x009a_0902, "Exposure (Absolute)", ControlType::Integer, (3, 2047), 250),
    ]
}

impl Shared {
    fn new(behavior: MockBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            controls: Mutex::new(default_controls()),
            rejected: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            format: Mutex::new(Format::new(640, 480, FourCC::YUYV)),
            opens: AtomicUsize::new(0),
        })
    }

    fn record(&self, event: MockEvent) {
        lock(&self.events).push(event);
    }
}

/// Backend producing mock devices that share one control and event state.
#[derive(Clone)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    /// Backend with the given failure knobs.
    #[must_use]
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            shared: Shared::new(behavior),
        }
    }

    /// Every device and stream call so far.
    #[must_use]
    pub fn events(&self) -> Vec<MockEvent> {
        lock(&self.shared.events).clone()
    }

    /// Number of open attempts.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.shared.opens.load(Ordering::SeqCst)
    }

    /// A view on the shared device state that does not count as a session.
    #[must_use]
    pub fn observer(&self) -> MockDevice {
        MockDevice::with_shared(Arc::clone(&self.shared), false)
    }
}

impl CameraBackend for MockBackend {
    type Device = MockDevice;

    fn open(&self, path: &Path) -> Result<MockDevice> {
        let attempt = self.shared.opens.fetch_add(1, Ordering::SeqCst);
        if attempt < self.shared.behavior.failed_opens {
            return Err(CameraError::DeviceOpenFailed(format!(
                "{}: no such device",
                path.display()
            )));
        }
        self.shared.record(MockEvent::Open);
        Ok(MockDevice::with_shared(Arc::clone(&self.shared), true))
    }
}

/// Mock device for testing without hardware.
pub struct MockDevice {
    shared: Arc<Shared>,
    capabilities: DeviceCapabilities,
    session: bool,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDevice {
    /// Create a new mock device with default controls.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shared(Shared::new(MockBehavior::default()), false)
    }

    fn with_shared(shared: Arc<Shared>, session: bool) -> Self {
        Self {
            shared,
            capabilities: DeviceCapabilities {
                driver: "mock".to_owned(),
                card: "Mock Camera".to_owned(),
                bus_info: "mock:0".to_owned(),
                can_capture: true,
                can_stream: true,
            },
            session,
        }
    }

    /// Live value of the control called `name`.
    #[must_use]
    pub fn value_of(&self, name: &str) -> Option<i64> {
        lock(&self.shared.controls)
            .iter()
            .find(|ctrl| ctrl.name == name)
            .and_then(|ctrl| ctrl.value)
    }

    /// Change a control behind the daemon's back.
    pub fn set_value(&self, name: &str, value: i64) {
        if let Some(ctrl) = lock(&self.shared.controls)
            .iter_mut()
            .find(|ctrl| ctrl.name == name)
        {
            ctrl.value = Some(value);
        }
    }

    /// Make every write to `name` fail.
    pub fn reject_writes_to(&self, name: &str) {
        lock(&self.shared.rejected).push(name.to_owned());
    }

    /// Accepted control writes, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(String, i64)> {
        lock(&self.shared.writes).clone()
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        if self.session {
            self.shared.record(MockEvent::Close);
        }
    }
}

impl ControlDevice for MockDevice {
    fn query_controls(&self) -> Result<Vec<ControlDescriptor>> {
        Ok(lock(&self.shared.controls)
            .iter()
            .map(|ctrl| ControlDescriptor {
                value: None,
                ..ctrl.clone()
            })
            .collect())
    }

    fn control(&self, id: u32) -> Result<i64> {
        let controls = lock(&self.shared.controls);
        let ctrl = controls
            .iter()
            .find(|ctrl| ctrl.id == id)
            .ok_or_else(|| CameraError::Control(format!("no control {id:#010x}")))?;

        // Same rule as VIDIOC_G_CTRL: only single 32-bit values are readable.
        if !ctrl.kind().is_some_and(ControlType::has_value) {
            return Err(CameraError::UnsupportedControl(id));
        }
        ctrl.value.ok_or(CameraError::UnsupportedControl(id))
    }

    fn set_control(&self, id: u32, _kind: ControlType, value: i64) -> Result<()> {
        let mut controls = lock(&self.shared.controls);
        let ctrl = controls
            .iter_mut()
            .find(|ctrl| ctrl.id == id)
            .ok_or_else(|| CameraError::Control(format!("no control {id:#010x}")))?;

        if lock(&self.shared.rejected).contains(&ctrl.name) {
            return Err(CameraError::Control(format!("{} is read-only", ctrl.name)));
        }

        ctrl.value = Some(value);
        lock(&self.shared.writes).push((ctrl.name.clone(), value));
        Ok(())
    }
}

impl CameraDevice for MockDevice {
    type Stream = MockStream;

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn enum_formats(&self) -> Result<Vec<FourCC>> {
        Ok(self.shared.behavior.formats.clone())
    }

    fn format(&self) -> Result<Format> {
        let mut format = lock(&self.shared.format).clone();
        if let Some(fourcc) = self.shared.behavior.confirmed_fourcc {
            format.fourcc = fourcc;
        }
        Ok(format)
    }

    fn set_format(&self, format: &Format) -> Result<Format> {
        *lock(&self.shared.format) = Format {
            size: format.width * format.height / 4,
            ..format.clone()
        };
        self.format()
    }

    fn request_buffers(&self, count: u32) -> Result<MockStream> {
        if self.shared.behavior.fail_request {
            return Err(CameraError::Buffers("VIDIOC_REQBUFS: out of memory".to_owned()));
        }
        self.shared.record(MockEvent::Request(count));

        Ok(MockStream {
            shared: Arc::clone(&self.shared),
            granted: self.shared.behavior.granted_buffers.unwrap_or(count) as usize,
            buffers: Vec::new(),
            queued: VecDeque::new(),
            frames: 0,
        })
    }
}

/// Mock capture stream handing out tiny JPEG-shaped frames.
///
/// Like the kernel, it only fills buffers that were queued to it.
pub struct MockStream {
    shared: Arc<Shared>,
    granted: usize,
    buffers: Vec<Vec<u8>>,
    queued: VecDeque<usize>,
    frames: usize,
}

impl Drop for MockStream {
    fn drop(&mut self) {
        for index in 0..self.buffers.len() {
            self.shared.record(MockEvent::Unmap(index));
        }
    }
}

impl CaptureStream for MockStream {
    fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn map_buffers(&mut self) -> Result<()> {
        for index in 0..self.granted {
            if self.shared.behavior.fail_map_at == Some(index) {
                return Err(CameraError::Buffers(format!("mmap of buffer {index} failed")));
            }
            #[allow(clippy::cast_possible_truncation)]
            let tag = index as u8;
            self.buffers.push(vec![0xFF, 0xD8, 0xFF, 0xE0, tag, 0xFF, 0xD9]);
            self.shared.record(MockEvent::Map(index));
        }
        Ok(())
    }

    fn stream_on(&mut self) -> Result<()> {
        for index in 0..self.buffers.len() {
            self.queued.push_back(index);
            self.shared.record(MockEvent::Queue(index));
        }
        if self.shared.behavior.fail_stream_on {
            return Err(CameraError::StreamError("VIDIOC_STREAMON refused".to_owned()));
        }
        self.shared.record(MockEvent::StreamOn);
        Ok(())
    }

    fn stream_off(&mut self) -> Result<()> {
        self.queued.clear();
        self.shared.record(MockEvent::StreamOff);
        Ok(())
    }

    fn dequeue(&mut self) -> Result<Frame<'_>> {
        let behavior = &self.shared.behavior;
        if let Some(stall) = behavior.stall {
            thread::sleep(stall);
            return Err(CameraError::Dequeue("device stalled".to_owned()));
        }
        thread::sleep(behavior.frame_interval);
        if behavior
            .frames_before_failure
            .is_some_and(|limit| self.frames >= limit)
        {
            return Err(CameraError::Dequeue("device disconnected".to_owned()));
        }

        let index = self
            .queued
            .pop_front()
            .ok_or_else(|| CameraError::Dequeue("no buffer queued".to_owned()))?;
        let sequence = self.frames;
        self.frames += 1;
        self.shared.record(MockEvent::Dequeue(index));

        let data = self
            .buffers
            .get(index)
            .ok_or_else(|| CameraError::Dequeue(format!("no buffer {index}")))?;

        #[allow(clippy::cast_possible_truncation)]
        let metadata = FrameMetadata {
            sequence: sequence as u32,
            timestamp: Duration::from_millis(sequence as u64 * 33),
            bytes_used: data.len() as u32,
        };

        Ok(Frame {
            index,
            data: data.as_slice(),
            metadata,
        })
    }

    fn requeue(&mut self, index: usize) -> Result<()> {
        if self.shared.behavior.fail_requeue_of_frame == Some(self.frames.saturating_sub(1)) {
            return Err(CameraError::Requeue {
                index,
                reason: "driver busy".to_owned(),
            });
        }
        if index >= self.buffers.len() || self.queued.contains(&index) {
            return Err(CameraError::Requeue {
                index,
                reason: "buffer not owned by the caller".to_owned(),
            });
        }
        self.queued.push_back(index);
        self.shared.record(MockEvent::Requeue(index));
        Ok(())
    }
}

/// Display registers held in memory.
#[derive(Clone, Default)]
pub struct MockDisplay {
    blocks: Arc<Mutex<(FccParams, BwsParams)>>,
}

impl MockDisplay {
    /// Current register contents.
    #[must_use]
    pub fn blocks(&self) -> (FccParams, BwsParams) {
        *lock(&self.blocks)
    }
}

impl DisplayColor for MockDisplay {
    fn fcc(&self) -> Result<FccParams> {
        Ok(lock(&self.blocks).0)
    }

    fn set_fcc(&mut self, params: &FccParams) -> Result<bool> {
        let mut blocks = lock(&self.blocks);
        let changed = blocks.0 != *params;
        blocks.0 = *params;
        Ok(changed)
    }

    fn bws(&self) -> Result<BwsParams> {
        Ok(lock(&self.blocks).1)
    }

    fn set_bws(&mut self, params: &BwsParams) -> Result<bool> {
        let mut blocks = lock(&self.blocks);
        let changed = blocks.1 != *params;
        blocks.1 = *params;
        Ok(changed)
    }
}

/// CEC source replaying scripted remote-control batches, one per poll.
#[derive(Clone, Default)]
pub struct MockCec {
    script: Arc<Mutex<VecDeque<Vec<(String, i64)>>>>,
    polls: Arc<AtomicUsize>,
}

impl MockCec {
    /// Queue the control writes the next poll should perform.
    pub fn push(&self, batch: Vec<(String, i64)>) {
        lock(&self.script).push_back(batch);
    }

    /// Polls so far.
    #[must_use]
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

impl CecPoller for MockCec {
    fn poll(&mut self, controls: &dyn ControlDevice) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let Some(batch) = lock(&self.script).pop_front() else {
            return false;
        };
        ControlRegistry::new(controls)
            .apply(batch.iter().map(|(name, value)| (name.as_str(), *value)))
            .unwrap_or(false)
    }
}

/// Decoder that records frame metadata.
#[derive(Clone, Default)]
pub struct RecordingDecoder {
    frames: Arc<Mutex<Vec<FrameMetadata>>>,
    sessions: Arc<AtomicUsize>,
}

impl RecordingDecoder {
    /// Frames decoded so far.
    #[must_use]
    pub fn frames(&self) -> Vec<FrameMetadata> {
        lock(&self.frames).clone()
    }

    /// Sessions started so far.
    #[must_use]
    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

impl FrameDecoder for RecordingDecoder {
    fn start(&mut self, _format: &Format) -> Result<()> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn decode(&mut self, _data: &[u8], metadata: &FrameMetadata) {
        lock(&self.frames).push(metadata.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapped(device: &MockDevice, count: u32) -> Result<MockStream> {
        let mut stream = device.request_buffers(count)?;
        stream.map_buffers()?;
        Ok(stream)
    }

    #[test]
    fn test_mock_device_creation() {
        let device = MockDevice::new();
        assert_eq!(device.capabilities().driver, "mock");
        assert!(device.capabilities().can_capture);
        assert!(device.capabilities().can_stream);
    }

    #[test]
    fn test_partial_mapping_is_released() {
        let backend = MockBackend::new(MockBehavior {
            fail_map_at: Some(2),
            ..MockBehavior::default()
        });
        let device = backend.open(Path::new("/dev/video0")).expect("open");
        assert!(mapped(&device, 3).is_err());

        assert_eq!(
            backend.events(),
            vec![
                MockEvent::Open,
                MockEvent::Request(3),
                MockEvent::Map(0),
                MockEvent::Map(1),
                MockEvent::Unmap(0),
                MockEvent::Unmap(1),
            ]
        );
    }

    #[test]
    fn test_mock_stream_capture() {
        let device = MockDevice::new();
        let mut stream = mapped(&device, 3).expect("allocate");
        stream.stream_on().expect("stream on");

        let first = stream.dequeue().expect("dequeue").index;
        stream.requeue(first).expect("requeue");
        let frame = stream.dequeue().expect("dequeue");
        assert_eq!(first, 0);
        assert_eq!(frame.metadata.sequence, 1);
        assert_eq!(frame.index, 1);
    }

    #[test]
    fn test_only_queued_buffers_are_filled() {
        let device = MockDevice::new();
        let mut stream = mapped(&device, 2).expect("allocate");
        assert!(stream.dequeue().is_err(), "nothing queued before stream on");

        stream.stream_on().expect("stream on");
        let first = stream.dequeue().expect("dequeue").index;
        let second = stream.dequeue().expect("dequeue").index;
        assert_eq!((first, second), (0, 1));
        assert!(stream.dequeue().is_err(), "both buffers are with the caller");

        stream.requeue(second).expect("requeue");
        assert!(stream.requeue(second).is_err(), "already queued");
        assert_eq!(stream.dequeue().expect("dequeue").index, 1);
    }

    #[test]
    fn test_granted_count_wins_over_request() {
        let backend = MockBackend::new(MockBehavior {
            granted_buffers: Some(2),
            ..MockBehavior::default()
        });
        let device = backend.open(Path::new("/dev/video0")).expect("open");
        let stream = mapped(&device, 4).expect("allocate");

        assert_eq!(stream.buffer_count(), 2);
        assert!(backend.events().ends_with(&[MockEvent::Map(0), MockEvent::Map(1)]));
    }

    #[test]
    fn test_control_reads_follow_kernel_rules() {
        let device = MockDevice::new();
        let id_of = |name: &str| {
            device
                .query_controls()
                .expect("query")
                .into_iter()
                .find(|ctrl| ctrl.name == name)
                .map(|ctrl| ctrl.id)
                .expect("control exists")
        };

        assert_eq!(device.control(id_of("Exposure Bias")).expect("integer menu"), 1);
        assert_eq!(device.control(id_of("Power Line Frequency")).expect("menu"), 1);
        assert!(matches!(
            device.control(id_of("Restore Defaults")),
            Err(CameraError::UnsupportedControl(_))
        ));
        assert!(matches!(
            device.control(id_of("Vendor Blob")),
            Err(CameraError::UnsupportedControl(_))
        ));
    }
}
