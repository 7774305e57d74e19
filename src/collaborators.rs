//! Hardware collaborators the daemon drives but does not implement.
//!
//! The decoder is always present. Display color registers and CEC remote
//! control are optional, depending on the target board.

use crate::display::DisplayColor;
use crate::traits::{ControlDevice, Format, FrameMetadata, Result};

/// Consumer of compressed frames.
pub trait FrameDecoder: Send {
    /// Prepare for a new session at the negotiated format.
    fn start(&mut self, _format: &Format) -> Result<()> {
        Ok(())
    }

    /// Decode one frame. `data` is only valid for the duration of the call.
    fn decode(&mut self, data: &[u8], metadata: &FrameMetadata);

    /// Release per-session state.
    fn finish(&mut self) {}
}

/// Remote-control (HDMI-CEC) event source.
pub trait CecPoller: Send {
    /// Begin listening for a new session.
    fn start(&mut self) {}

    /// Handle pending remote-control events. Returns whether any control
    /// visible in the control file changed as a result.
    fn poll(&mut self, controls: &dyn ControlDevice) -> bool;

    /// Stop listening.
    fn stop(&mut self) {}
}

/// The collaborator set for one board.
pub struct Collaborators {
    /// Frame consumer.
    pub decoder: Box<dyn FrameDecoder>,
    /// Display color registers, if the board has them.
    pub display: Option<Box<dyn DisplayColor>>,
    /// CEC event source, if the board has one.
    pub cec: Option<Box<dyn CecPoller>>,
}

impl Collaborators {
    /// Decoder only; no display registers, no CEC.
    #[must_use]
    pub fn new(decoder: Box<dyn FrameDecoder>) -> Self {
        Self {
            decoder,
            display: None,
            cec: None,
        }
    }

    /// Add display color registers.
    #[must_use]
    pub fn with_display(mut self, display: Box<dyn DisplayColor>) -> Self {
        self.display = Some(display);
        self
    }

    /// Add a CEC event source.
    #[must_use]
    pub fn with_cec(mut self, cec: Box<dyn CecPoller>) -> Self {
        self.cec = Some(cec);
        self
    }
}
