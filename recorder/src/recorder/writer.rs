use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use thermal_recorder_common::frame::TimestampedFrame;
use tracing::{debug, warn};

use super::keys::{in_progress_name, recording_path};

/// Writes one recording as a stream of `TimestampedFrame` records.
///
/// Frames go to a hidden temp file in the output directory, which is renamed
/// to its final dated path by `finish`.
pub struct RecordingWriter {
    file: BufWriter<File>,
    output_dir: PathBuf,
    tmp_path: PathBuf,
    buf: Vec<u8>,
    frame_count: u32,
    pub start_ms: i64,
    last_ms: i64,
}

pub struct FinishedRecording {
    pub path: PathBuf,
    pub frame_count: u32,
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("failed to create recording file {0}: {1}")]
    Create(String, std::io::Error),
    #[error("failed to write frame: {0}")]
    Write(std::io::Error),
    #[error("failed to finalize recording {0}: {1}")]
    Finish(String, std::io::Error),
}

impl RecordingWriter {
    pub fn create(output_dir: &Path, start_ms: i64) -> Result<Self, WriterError> {
        std::fs::create_dir_all(output_dir)
            .map_err(|e| WriterError::Create(output_dir.display().to_string(), e))?;
        let tmp_path = output_dir.join(in_progress_name(start_ms));
        let file = File::create(&tmp_path)
            .map_err(|e| WriterError::Create(tmp_path.display().to_string(), e))?;
        debug!(path = %tmp_path.display(), "recording file created");
        Ok(Self {
            file: BufWriter::new(file),
            output_dir: output_dir.to_path_buf(),
            tmp_path,
            buf: Vec::new(),
            frame_count: 0,
            start_ms,
            last_ms: start_ms,
        })
    }

    pub fn write_frame(&mut self, frame: &TimestampedFrame) -> Result<(), WriterError> {
        self.buf.clear();
        frame.serialize_into(&mut self.buf);
        self.file.write_all(&self.buf).map_err(WriterError::Write)?;
        self.frame_count += 1;
        self.last_ms = frame.captured_at_ms;
        Ok(())
    }

    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    /// Flush and move the file to its final name. An empty recording is
    /// deleted and yields `None`. On failure the temp file is removed.
    pub fn finish(mut self) -> Result<Option<FinishedRecording>, WriterError> {
        if let Err(e) = self.file.flush() {
            let err = WriterError::Finish(self.tmp_path.display().to_string(), e);
            self.abort();
            return Err(err);
        }

        if self.frame_count == 0 {
            self.abort();
            return Ok(None);
        }

        let path = self
            .output_dir
            .join(recording_path(self.start_ms, self.last_ms));
        if let Err(e) = move_into_place(&self.tmp_path, &path) {
            let err = WriterError::Finish(self.tmp_path.display().to_string(), e);
            self.abort();
            return Err(err);
        }

        Ok(Some(FinishedRecording {
            path,
            frame_count: self.frame_count,
            start_ms: self.start_ms,
            end_ms: self.last_ms,
        }))
    }

    /// Drop the recording and its temp file.
    pub fn abort(self) {
        if let Err(e) = std::fs::remove_file(&self.tmp_path) {
            warn!(error = %e, path = %self.tmp_path.display(), "failed to remove temp recording");
        }
    }
}

fn move_into_place(tmp: &Path, path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::rename(tmp, path)
}
