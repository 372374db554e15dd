use thermal_recorder_common::frame::{Frame, Resolution};

/// Fixed-depth ring of frames with a single rotating write cursor.
///
/// Slots are allocated once; callers write into `current_mut()` and commit
/// with `advance()`. `oldest()` is the slot written `depth - 1` advances ago,
/// which is also the next slot to be overwritten.
pub struct FrameLoop {
    frames: Vec<Frame>,
    current: usize,
    committed: usize,
}

impl FrameLoop {
    /// Allocate `depth` zeroed slots. A depth of 0 is treated as 1.
    pub fn new(depth: usize, resolution: Resolution) -> Self {
        let depth = depth.max(1);
        Self {
            frames: (0..depth).map(|_| Frame::zeroed(resolution)).collect(),
            current: 0,
            committed: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// The slot being written this tick.
    pub fn current(&self) -> &Frame {
        &self.frames[self.current]
    }

    pub fn current_mut(&mut self) -> &mut Frame {
        &mut self.frames[self.current]
    }

    /// The comparison baseline. Equal to `current()` when depth is 1.
    pub fn oldest(&self) -> &Frame {
        &self.frames[self.next_index(self.current)]
    }

    /// The most recently committed frame, if any.
    pub fn previous(&self) -> Option<&Frame> {
        if self.committed == 0 {
            return None;
        }
        let depth = self.depth();
        Some(&self.frames[(self.current + depth - 1) % depth])
    }

    /// Commit the current slot and move the cursor on. Returns the committed frame.
    pub fn advance(&mut self) -> &Frame {
        let committed = self.current;
        self.current = self.next_index(self.current);
        self.committed = (self.committed + 1).min(self.depth());
        &self.frames[committed]
    }

    /// Make the current slot the baseline immediately, dropping all other history.
    ///
    /// Every other slot is overwritten with the current frame, so `oldest()`
    /// keeps returning this frame until natural rotation reaches it.
    pub fn set_as_oldest(&mut self) {
        let (before, rest) = self.frames.split_at_mut(self.current);
        if let Some((current, after)) = rest.split_first_mut() {
            for slot in before.iter_mut().chain(after.iter_mut()) {
                slot.copy_from(current);
            }
        }
    }

    /// Committed frames still held outside the current slot, oldest first.
    pub fn iter_committed(&self) -> impl Iterator<Item = &Frame> {
        let depth = self.depth();
        let held = self.committed.min(depth - 1);
        (1..=held)
            .rev()
            .map(move |back| &self.frames[(self.current + depth - back) % depth])
    }

    fn next_index(&self, index: usize) -> usize {
        (index + 1) % self.depth()
    }
}
