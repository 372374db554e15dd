use thermal_recorder_common::frame::Resolution;

/// Dense per-pixel boolean grid, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    resolution: Resolution,
    cells: Vec<bool>,
}

impl Mask {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            cells: vec![false; resolution.pixel_count()],
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    #[inline]
    pub fn get(&self, y: usize, x: usize) -> bool {
        self.cells[y * self.resolution.cols + x]
    }

    #[inline]
    pub fn set(&mut self, y: usize, x: usize, value: bool) {
        self.cells[y * self.resolution.cols + x] = value;
    }

    pub fn clear(&mut self) {
        self.cells.fill(false);
    }

    pub fn count(&self) -> usize {
        self.cells.iter().filter(|&&c| c).count()
    }

    /// `(y, x)` of every set pixel, row by row.
    pub fn iter_set(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let cols = self.resolution.cols;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, &c)| c)
            .map(move |(i, _)| (i / cols, i % cols))
    }
}

/// Result of one detector evaluation: which pixels counted as deltas.
///
/// Owned by the detector and overwritten on every call; read it before the
/// next frame is evaluated.
#[derive(Debug, Clone)]
pub struct MotionState {
    pub mask: Mask,
    pub count: usize,
}

impl MotionState {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            mask: Mask::new(resolution),
            count: 0,
        }
    }

    pub fn clear(&mut self) {
        self.mask.clear();
        self.count = 0;
    }

    /// Flag a pixel, counting it only the first time.
    pub fn mark(&mut self, y: usize, x: usize) {
        if !self.mask.get(y, x) {
            self.mask.set(y, x, true);
            self.count += 1;
        }
    }
}
