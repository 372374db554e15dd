use thermal_recorder_common::frame::Frame;

use crate::detector::Detection;
use crate::state::MotionState;

/// Per-frame motion decision interface used by the recorder.
///
/// Implementations keep their own history; every captured frame must be fed
/// through `evaluate` exactly once, in capture order.
pub trait MotionFilter: Send {
    /// Evaluate the next frame.
    fn evaluate(&mut self, frame: &Frame) -> Detection;

    /// Pixels flagged by the most recent `evaluate`.
    fn motion_state(&self) -> &MotionState;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
