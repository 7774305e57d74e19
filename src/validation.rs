//! Frame validation utilities.
//!
//! Cheap structural checks on compressed frames, plus [`FrameStats`], the
//! frame sink used when no hardware decoder is wired in.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::collaborators::FrameDecoder;
use crate::traits::{CameraError, Format, FrameMetadata, Result};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Validates that `data` is framed like a JPEG image.
///
/// Checks the start-of-image marker and that an end-of-image marker closes
/// the payload. UVC cameras may pad the buffer after EOI, so trailing zero
/// bytes are skipped.
///
/// # Errors
///
/// Returns `StreamError` if either marker is missing.
pub fn validate_jpeg(data: &[u8]) -> Result<()> {
    if !data.starts_with(&SOI) {
        return Err(CameraError::StreamError(format!(
            "missing JPEG start marker in {} byte frame",
            data.len()
        )));
    }

    let end = data
        .iter()
        .rposition(|&byte| byte != 0)
        .map_or(0, |last| last + 1);
    let payload = data.get(..end).unwrap_or_default();
    if payload.len() < SOI.len() + EOI.len() || !payload.ends_with(&EOI) {
        return Err(CameraError::StreamError(format!(
            "missing JPEG end marker in {} byte frame",
            data.len()
        )));
    }

    Ok(())
}

/// Validates that sequence numbers increment by exactly one with no gaps.
///
/// # Errors
///
/// Returns `StreamError` if the slice is empty or a gap is found.
pub fn validate_frame_sequence(frames: &[FrameMetadata]) -> Result<()> {
    if frames.is_empty() {
        return Err(CameraError::StreamError(
            "Cannot validate empty frame sequence".to_owned(),
        ));
    }

    for (i, pair) in frames.windows(2).enumerate() {
        let [prev, curr] = pair else {
            continue;
        };
        let expected = prev.sequence.wrapping_add(1);
        if curr.sequence != expected {
            return Err(CameraError::StreamError(format!(
                "Frame sequence gap at index {}: expected {expected}, got {}",
                i + 1,
                curr.sequence
            )));
        }
    }

    Ok(())
}

/// Frame sink that checks and counts frames.
#[derive(Debug, Default)]
pub struct FrameStats {
    frames: u64,
    bytes: u64,
    malformed: u64,
    dropped: u64,
    last: Option<(u32, Duration)>,
}

impl FrameStats {
    /// Frames seen this session.
    #[must_use]
    pub const fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames that failed [`validate_jpeg`].
    #[must_use]
    pub const fn malformed(&self) -> u64 {
        self.malformed
    }

    /// Frames the driver skipped, judging by sequence numbers.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl FrameDecoder for FrameStats {
    fn start(&mut self, format: &Format) -> Result<()> {
        *self = Self::default();
        info!(
            width = format.width,
            height = format.height,
            fourcc = %format.fourcc,
            "frame sink ready"
        );
        Ok(())
    }

    fn decode(&mut self, data: &[u8], metadata: &FrameMetadata) {
        self.frames += 1;
        self.bytes += data.len() as u64;

        if let Err(err) = validate_jpeg(data) {
            self.malformed += 1;
            debug!(sequence = metadata.sequence, %err, "malformed frame");
        }

        if let Some((sequence, _)) = self.last {
            let gap = metadata.sequence.wrapping_sub(sequence);
            if gap > 1 {
                self.dropped += u64::from(gap - 1);
            }
        }
        self.last = Some((metadata.sequence, metadata.timestamp));
    }

    fn finish(&mut self) {
        if self.malformed > 0 {
            warn!(malformed = self.malformed, "session delivered malformed frames");
        }
        info!(
            frames = self.frames,
            bytes = self.bytes,
            dropped = self.dropped,
            last_timestamp = ?self.last.map(|(_, timestamp)| timestamp),
            "frame sink finished"
        );
    }
}
