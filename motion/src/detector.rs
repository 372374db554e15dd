use thermal_recorder_common::config::MotionConfig;
use thermal_recorder_common::frame::{Frame, Resolution};
use tracing::{debug, info};

use crate::frame_loop::FrameLoop;
use crate::state::MotionState;
use crate::traits::MotionFilter;

/// Raw samples below this carry no usable signal and are replaced by the floor threshold.
const LOW_SIGNAL_CUTOFF: u16 = 1000;
/// Pixels hotter than this count as motion even next to a cooling neighbour.
const ANIMAL_TEMP_THRESH: u16 = 4000;
/// Half-width of the square window scanned for cooling neighbours.
const VICINITY_SIZE: usize = 10;
/// A neighbour this much warmer in the compare frame marks a cooling ripple.
const VICINITY_REVERSE_THRESH: i32 = 10;
const NEGATIVE_DELTA_THRESH: u16 = 30;

/// Why a frame did or did not produce motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectOutcome {
    /// No earlier diff to compare against (after start-up or a reset).
    NoData,
    /// Too much of the frame changed at once; treated as sensor recalibration.
    TooManyPointsChanged,
    /// Number of pixels counted as motion deltas.
    Deltas(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub motion: bool,
    pub outcome: DetectOutcome,
}

impl Detection {
    fn still(outcome: DetectOutcome) -> Self {
        Self {
            motion: false,
            outcome,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Next evaluation has no previous diff and reports `NoData`.
    Warming,
    Active,
}

#[derive(Debug, Clone, Copy)]
struct Thresholds {
    delta: u16,
    /// temp_thresh + delta_thresh
    floor: u16,
    animal: u16,
    vicinity: usize,
}

/// Frame-differencing motion detector for raw thermal frames.
///
/// Each frame is floored, diffed against the frame `frame_compare_gap` ticks
/// earlier and the changed pixels are counted. Counted pixels are written to
/// `motion_state()`.
pub struct MotionDetector {
    resolution: Resolution,
    floored_frames: FrameLoop,
    diff_frames: FrameLoop,
    /// Magnitude of cooling per pixel in warmer-only mode. Not read by the detector.
    negatives: Frame,
    state: MotionState,
    phase: Phase,
    thresholds: Thresholds,
    one_diff_only: bool,
    warmer_only: bool,
    verbose: bool,
    count_thresh: usize,
    nonzero_limit: usize,
}

impl MotionDetector {
    pub fn new(config: &MotionConfig, resolution: Resolution) -> Self {
        let percent = config.nonzero_max_percent.min(100) as usize;
        Self {
            resolution,
            floored_frames: FrameLoop::new(config.frame_compare_gap + 1, resolution),
            diff_frames: FrameLoop::new(2, resolution),
            negatives: Frame::zeroed(resolution),
            state: MotionState::new(resolution),
            phase: Phase::Warming,
            thresholds: Thresholds {
                delta: config.delta_thresh,
                floor: config.temp_thresh.saturating_add(config.delta_thresh),
                animal: ANIMAL_TEMP_THRESH,
                vicinity: VICINITY_SIZE,
            },
            one_diff_only: config.one_diff_only,
            warmer_only: config.warmer_only,
            verbose: config.verbose,
            count_thresh: config.count_thresh,
            nonzero_limit: resolution.pixel_count() * percent / 100,
        }
    }

    /// Returns `true` if the frame shows motion.
    pub fn detect(&mut self, frame: &Frame) -> bool {
        self.pixels_changed(frame).motion
    }

    /// Evaluate one frame and report the outcome.
    pub fn pixels_changed(&mut self, frame: &Frame) -> Detection {
        debug_assert_eq!(frame.resolution(), self.resolution);
        let detection = self.compare(frame);
        self.floored_frames.advance();
        detection
    }

    pub fn motion_state(&self) -> &MotionState {
        &self.state
    }

    /// Per-pixel cooling from the last warmer-only diff.
    pub fn negatives(&self) -> &Frame {
        &self.negatives
    }

    #[cfg(test)]
    fn floor_threshold(&self) -> u16 {
        self.thresholds.floor
    }

    #[cfg(test)]
    fn nonzero_limit(&self) -> usize {
        self.nonzero_limit
    }

    pub fn is_warming(&self) -> bool {
        self.phase == Phase::Warming
    }

    fn compare(&mut self, frame: &Frame) -> Detection {
        set_floor(frame, self.floored_frames.current_mut(), self.thresholds.floor);

        let processed = self.floored_frames.current();
        let compare_frame = self.floored_frames.oldest();
        let diff_slot = self.diff_frames.current_mut();
        if self.warmer_only {
            warmer_diff(processed, compare_frame, diff_slot, &mut self.negatives);
        } else {
            abs_diff(processed, compare_frame, diff_slot);
        }
        self.diff_frames.advance();
        self.state.clear();

        if self.phase == Phase::Warming {
            self.phase = Phase::Active;
            return Detection::still(DetectOutcome::NoData);
        }

        // Depth 2: after advancing, the committed slot is this tick's diff and
        // the current slot still holds the previous tick's.
        let Some(diff) = self.diff_frames.previous() else {
            return Detection::still(DetectOutcome::NoData);
        };
        let (nonzero_count, delta_count) = if self.one_diff_only {
            count_pixels(
                frame,
                compare_frame,
                diff,
                &self.thresholds,
                self.verbose,
                &mut self.state,
            )
        } else {
            let prev_diff = self.diff_frames.current();
            count_pixels_two_compare(diff, prev_diff, self.thresholds.delta, &mut self.state)
        };

        // A sudden jump across most of the frame is the camera recalibrating
        // after a rapid temperature change, not motion.
        if nonzero_count > self.nonzero_limit {
            info!(
                nonzero_count,
                limit = self.nonzero_limit,
                "motion detector: too many points changed, probably a recalibration"
            );
            self.state.clear();
            self.floored_frames.set_as_oldest();
            self.phase = Phase::Warming;
            return Detection::still(DetectOutcome::TooManyPointsChanged);
        }

        if delta_count > 0 && self.verbose {
            debug!(delta_count, nonzero_count, "delta count");
        }
        Detection {
            motion: delta_count >= self.count_thresh,
            outcome: DetectOutcome::Deltas(delta_count),
        }
    }
}

impl MotionFilter for MotionDetector {
    fn evaluate(&mut self, frame: &Frame) -> Detection {
        self.pixels_changed(frame)
    }

    fn motion_state(&self) -> &MotionState {
        &self.state
    }

    fn name(&self) -> &str {
        "thermal-diff"
    }
}

fn set_floor(frame: &Frame, out: &mut Frame, floor: u16) {
    for (o, &v) in out.pixels_mut().iter_mut().zip(frame.pixels()) {
        *o = if v < LOW_SIGNAL_CUTOFF { floor } else { v };
    }
}

fn abs_diff(a: &Frame, b: &Frame, out: &mut Frame) {
    let pairs = a.pixels().iter().zip(b.pixels());
    for (o, (&va, &vb)) in out.pixels_mut().iter_mut().zip(pairs) {
        *o = (va as i32 - vb as i32).unsigned_abs() as u16;
    }
}

fn warmer_diff(a: &Frame, b: &Frame, out: &mut Frame, negatives: &mut Frame) {
    let pairs = a.pixels().iter().zip(b.pixels());
    let outputs = out.pixels_mut().iter_mut().zip(negatives.pixels_mut().iter_mut());
    for ((o, neg), (&va, &vb)) in outputs.zip(pairs) {
        let diff = va as i32 - vb as i32;
        if diff < 0 {
            *o = 0;
            *neg = (-diff) as u16;
        } else {
            *o = diff as u16;
            *neg = 0;
        }
    }
}

/// Single-diff counting with vicinity suppression. Returns `(nonzero, deltas)`.
fn count_pixels(
    frame: &Frame,
    compare_frame: &Frame,
    diff: &Frame,
    t: &Thresholds,
    verbose: bool,
    state: &mut MotionState,
) -> (usize, usize) {
    let mut nonzero_count = 0;
    let mut delta_count = 0;
    for y in 0..frame.rows() {
        for x in 0..frame.cols() {
            let d = diff.get(y, x);
            if d == 0 {
                continue;
            }
            nonzero_count += 1;

            let value = frame.get(y, x);
            if d <= t.delta || value <= t.floor {
                continue;
            }
            if value > t.animal
                || !reverse_change_in_vicinity(value, compare_frame, y, x, t.vicinity)
            {
                if verbose {
                    debug!(x, y, diff = d, value, "motion pixel");
                }
                delta_count += 1;
                state.mark(y, x);
            }
        }
    }
    (nonzero_count, delta_count)
}

/// Two-diff counting: a delta must appear in both diffs. Returns `(nonzero, deltas)`.
fn count_pixels_two_compare(
    diff: &Frame,
    prev_diff: &Frame,
    delta_thresh: u16,
    state: &mut MotionState,
) -> (usize, usize) {
    let cols = diff.cols();
    let mut nonzero_count = 0;
    let mut delta_count = 0;
    for (i, (&v1, &v2)) in diff.pixels().iter().zip(prev_diff.pixels()).enumerate() {
        if v1 > 0 || v2 > 0 {
            nonzero_count += 1;
            if v1 > delta_thresh && v2 > delta_thresh {
                delta_count += 1;
                state.mark(i / cols, i % cols);
            }
        }
    }
    (nonzero_count, delta_count)
}

/// Whether any pixel within `radius` of `(y, x)` in `compare_frame` is more
/// than a few units warmer than `value`, i.e. the candidate sits next to a
/// spot that has since cooled.
pub fn reverse_change_in_vicinity(
    value: u16,
    compare_frame: &Frame,
    y: usize,
    x: usize,
    radius: usize,
) -> bool {
    let value = value as i32;
    let y_end = (y + radius).min(compare_frame.rows() - 1);
    let x_end = (x + radius).min(compare_frame.cols() - 1);

    let mut max_reverse = -(NEGATIVE_DELTA_THRESH as i32);
    for yy in y.saturating_sub(radius)..=y_end {
        for xx in x.saturating_sub(radius)..=x_end {
            max_reverse = max_reverse.max(compare_frame.get(yy, xx) as i32 - value);
        }
    }
    max_reverse > VICINITY_REVERSE_THRESH
}
