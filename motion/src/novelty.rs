use thermal_recorder_common::config::ThrottleConfig;
use thermal_recorder_common::frame::Resolution;
use tracing::{debug, trace};

use crate::state::MotionState;

/// Memory cells cover `1 << DOWNSAMPLE_STEP` pixels per side. Also the
/// number of updates between decay cycles.
const DOWNSAMPLE_STEP: u32 = 4;
const DECAY_PER_CYCLE: u32 = 5;
/// Cells above this much memory are background, along with their neighbours.
const SEEN_THRESHOLD: u32 = 10;

/// Decaying spatial memory of where motion has been recorded.
///
/// Motion that keeps landing on the same cells (a heater vent, a branch in the
/// sun) builds up memory and is eventually ignored; motion elsewhere is new.
/// The grids carry a one-cell border so the 3x3 dilation never leaves them.
pub struct NoveltyDetector {
    rows: usize,
    cols: usize,
    memory: Vec<u32>,
    ignore: Vec<bool>,
    trigger_threshold: usize,
    max_memory: u32,
    ticks: u32,
}

impl NoveltyDetector {
    pub fn new(config: &ThrottleConfig, resolution: Resolution) -> Self {
        let cell = 1usize << DOWNSAMPLE_STEP;
        let rows = resolution.rows.div_ceil(cell) + 2;
        let cols = resolution.cols.div_ceil(cell) + 2;
        Self {
            rows,
            cols,
            memory: vec![0; rows * cols],
            ignore: vec![false; rows * cols],
            trigger_threshold: config.trigger_threshold,
            max_memory: config.max_memory,
            ticks: 0,
        }
    }

    /// Record motion that is part of an ongoing recording.
    pub fn process_recorded(&mut self, state: &MotionState) {
        self.update();
        for (y, x) in state.mask.iter_set() {
            let idx = self.cell_index(y, x);
            self.memory[idx] = self.memory[idx].saturating_add(1);
        }
    }

    /// Returns `true` once more than `trigger_threshold` flagged pixels lie
    /// outside the background, i.e. the motion is new enough to record.
    ///
    /// Pixels in background cells reinforce the memory instead of counting, so
    /// motion confined to a known hot-spot returns `false` and is throttled.
    pub fn has_throttled_new_movement(&mut self, state: &MotionState) -> bool {
        self.update();
        let mut new_pixels = 0;
        for (y, x) in state.mask.iter_set() {
            let idx = self.cell_index(y, x);
            if self.ignore[idx] {
                self.memory[idx] = self.memory[idx].saturating_add(1);
            } else {
                new_pixels += 1;
                if new_pixels > self.trigger_threshold {
                    debug!(
                        new_pixels,
                        trigger_threshold = self.trigger_threshold,
                        "new movement over trigger threshold"
                    );
                    return true;
                }
            }
        }
        false
    }

    /// Whether the cell containing pixel `(y, x)` is currently background.
    pub fn is_background(&self, y: usize, x: usize) -> bool {
        self.ignore[self.cell_index(y, x)]
    }

    /// Accumulated memory of the cell containing pixel `(y, x)`.
    pub fn memory_at(&self, y: usize, x: usize) -> u32 {
        self.memory[self.cell_index(y, x)]
    }

    /// `(rows, cols)` of the memory grid including its border.
    #[cfg(test)]
    fn grid_size(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    fn update(&mut self) {
        self.ticks += 1;
        if self.ticks < DOWNSAMPLE_STEP {
            return;
        }
        self.ticks = 0;
        self.ignore.fill(false);
        self.dilute_memory();
        self.make_ignore_mask();
    }

    fn dilute_memory(&mut self) {
        for m in self.memory.iter_mut() {
            *m = m.saturating_sub(DECAY_PER_CYCLE).min(self.max_memory);
        }
    }

    fn make_ignore_mask(&mut self) {
        let mut marked = 0;
        for y in 1..self.rows - 1 {
            for x in 1..self.cols - 1 {
                if self.memory[y * self.cols + x] <= SEEN_THRESHOLD {
                    continue;
                }
                marked += 1;
                for yy in y - 1..=y + 1 {
                    let row = yy * self.cols;
                    self.ignore[row + x - 1..=row + x + 1].fill(true);
                }
            }
        }
        trace!(marked, "ignore mask rebuilt");
    }

    fn cell_index(&self, y: usize, x: usize) -> usize {
        let cy = (y >> DOWNSAMPLE_STEP) + 1;
        let cx = (x >> DOWNSAMPLE_STEP) + 1;
        cy * self.cols + cx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RES: Resolution = Resolution { rows: 40, cols: 50 };

    fn novelty(trigger_threshold: usize) -> NoveltyDetector {
        NoveltyDetector::new(
            &ThrottleConfig {
                trigger_threshold,
                max_memory: 200,
            },
            RES,
        )
    }

    fn state_with(pixels: &[(usize, usize)]) -> MotionState {
        let mut state = MotionState::new(RES);
        for &(y, x) in pixels {
            state.mark(y, x);
        }
        state
    }

    /// Every pixel of the 16x16 cell whose top-left corner is `(y0, x0)`.
    fn cell_pixels(y0: usize, x0: usize) -> Vec<(usize, usize)> {
        (y0..y0 + 16)
            .flat_map(|y| (x0..x0 + 16).map(move |x| (y, x)))
            .collect()
    }

    #[test]
    fn grid_is_downsampled_with_border() {
        let nd = novelty(0);
        // ceil(40 / 16) = 3, ceil(50 / 16) = 4, plus one border cell each side.
        assert_eq!(nd.grid_size(), (5, 6));
        let lepton = NoveltyDetector::new(
            &ThrottleConfig {
                trigger_threshold: 0,
                max_memory: 200,
            },
            Resolution::LEPTON3,
        );
        assert_eq!(lepton.grid_size(), (10, 12));
    }

    #[test]
    fn single_new_pixel_is_new_movement_at_zero_threshold() {
        let mut nd = novelty(0);
        assert!(nd.has_throttled_new_movement(&state_with(&[(5, 5)])));
    }

    #[test]
    fn threshold_tolerates_some_new_pixels() {
        let mut nd = novelty(2);
        assert!(!nd.has_throttled_new_movement(&state_with(&[(5, 5), (5, 6)])));
        assert!(nd.has_throttled_new_movement(&state_with(&[(5, 5), (5, 6), (5, 7)])));
    }

    #[test]
    fn empty_mask_is_never_new_movement() {
        let mut nd = novelty(0);
        for _ in 0..10 {
            assert!(!nd.has_throttled_new_movement(&MotionState::new(RES)));
        }
    }

    #[test]
    fn recurring_motion_becomes_background() {
        let mut nd = novelty(0);
        let cell = state_with(&cell_pixels(16, 16));
        for _ in 0..4 {
            nd.process_recorded(&cell);
        }
        // The fourth call ran a decay cycle and rebuilt the ignore mask.
        assert!(nd.is_background(20, 20));
        // Dilation also covers the neighbouring cells.
        assert!(nd.is_background(0, 0));
        assert!(nd.is_background(39, 47));

        let before = nd.memory_at(20, 20);
        assert!(!nd.has_throttled_new_movement(&cell));
        assert_eq!(nd.memory_at(20, 20), before + 256);
    }

    #[test]
    fn memory_decays_and_is_capped() {
        let mut nd = novelty(0);
        let cell = state_with(&cell_pixels(0, 0));
        nd.process_recorded(&cell);
        nd.process_recorded(&cell);
        nd.process_recorded(&cell);
        assert_eq!(nd.memory_at(0, 0), 768);
        nd.process_recorded(&cell);
        // Decay then cap to 200 before this call's pixels are added.
        assert_eq!(nd.memory_at(0, 0), 200 + 256);
    }

    #[test]
    fn background_fades_without_reinforcement() {
        let mut nd = novelty(0);
        let cell = state_with(&cell_pixels(0, 0));
        for _ in 0..4 {
            nd.process_recorded(&cell);
        }
        assert!(nd.is_background(0, 0));

        let empty = MotionState::new(RES);
        // 456 memory decays by 5 every fourth call, and the 200 cap applies first.
        for _ in 0..4 * 40 {
            nd.has_throttled_new_movement(&empty);
        }
        assert!(nd.memory_at(0, 0) <= SEEN_THRESHOLD);
        assert!(!nd.is_background(0, 0));
        assert!(nd.has_throttled_new_movement(&state_with(&[(1, 1)])));
    }
}
