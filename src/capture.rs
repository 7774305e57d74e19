//! Capture loop: dequeue, decode, requeue.

use tracing::{debug, error, info, warn};

use crate::collaborators::FrameDecoder;
use crate::session::RunFlags;
use crate::traits::CaptureStream;

/// What one capture loop processed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureReport {
    /// Frames handed to the decoder.
    pub frames: u64,
    /// Bytes handed to the decoder.
    pub bytes: u64,
    /// Buffers the driver refused to take back.
    pub requeue_failures: u64,
}

/// Feed frames from `stream` to `decoder` until the session's capture flag
/// clears or a dequeue fails. A failed dequeue halts the whole session.
pub fn run_capture<S: CaptureStream + ?Sized>(
    stream: &mut S,
    decoder: &mut dyn FrameDecoder,
    flags: &RunFlags,
) -> CaptureReport {
    let mut report = CaptureReport::default();

    while flags.capture_running() {
        let frame = match stream.dequeue() {
            Ok(frame) => frame,
            Err(err) => {
                error!(%err, "lost the capture device");
                flags.halt();
                break;
            }
        };

        let index = frame.index;
        let len = frame.data.len() as u64;
        debug!(index, sequence = frame.metadata.sequence, bytes = len, "frame");
        decoder.decode(frame.data, &frame.metadata);
        report.frames += 1;
        report.bytes += len;

        if let Err(err) = stream.requeue(index) {
            warn!(%err, "buffer not requeued");
            report.requeue_failures += 1;
        }
    }

    info!(
        frames = report.frames,
        bytes = report.bytes,
        requeue_failures = report.requeue_failures,
        "capture loop finished"
    );
    report
}
