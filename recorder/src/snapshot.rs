use image::{ImageBuffer, ImageFormat, Luma};
use std::path::{Path, PathBuf};
use thermal_recorder_common::frame::Frame;
use tracing::debug;

const SNAPSHOT_NAME: &str = "still.png";

/// Exports the latest frame as a contrast-stretched 16-bit grayscale PNG.
pub struct Snapshotter {
    dir: PathBuf,
    /// Checksum of the last frame written, to skip rewriting the same frame.
    previous_id: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode snapshot: {0}")]
    Image(#[from] image::ImageError),
    #[error("frame buffer does not match its dimensions")]
    Buffer,
}

impl Snapshotter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            previous_id: None,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_NAME)
    }

    /// Write `frame` as the current still. Returns `false` if it was already written.
    pub fn take(&mut self, frame: &Frame) -> Result<bool, SnapshotError> {
        let id = frame.checksum();
        if self.previous_id == Some(id) {
            debug!(id, "snapshot unchanged, skipping");
            return Ok(false);
        }

        let image: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(frame.cols() as u32, frame.rows() as u32, normalize(frame))
                .ok_or(SnapshotError::Buffer)?;

        std::fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!(".{SNAPSHOT_NAME}.tmp"));
        image.save_with_format(&tmp, ImageFormat::Png)?;
        std::fs::rename(&tmp, self.path())?;

        self.previous_id = Some(id);
        debug!(id, path = %self.path().display(), "snapshot written");
        Ok(true)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Stretch the frame's min..max range over the full 16-bit range.
fn normalize(frame: &Frame) -> Vec<u16> {
    let (lo, hi) = frame.min_max();
    let span = (hi - lo) as u32;
    if span == 0 {
        return vec![0; frame.pixels().len()];
    }
    frame
        .pixels()
        .iter()
        .map(|&v| ((v - lo) as u32 * u16::MAX as u32 / span) as u16)
        .collect()
}
