//! Motion detection and trigger throttling for raw thermal frames.

pub mod detector;
pub mod frame_loop;
pub mod novelty;
pub mod state;
pub mod traits;

pub use detector::{DetectOutcome, Detection, MotionDetector};
pub use frame_loop::FrameLoop;
pub use novelty::NoveltyDetector;
pub use state::{Mask, MotionState};
pub use traits::MotionFilter;
