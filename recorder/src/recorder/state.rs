use std::collections::VecDeque;
use std::path::PathBuf;

use thermal_motion::{FrameLoop, MotionFilter, NoveltyDetector};
use thermal_recorder_common::config::RecorderConfig;
use thermal_recorder_common::frame::{Resolution, TimestampedFrame};
use tracing::{debug, error, info, warn};

use crate::snapshot::Snapshotter;

use super::writer::{RecordingWriter, WriterError};

#[derive(Default)]
enum RecordingState {
    /// Watching for motion; nothing is being written.
    #[default]
    Idle,
    /// Writing every frame until motion has been absent for `min_secs`.
    Recording {
        writer: RecordingWriter,
        last_motion_ms: i64,
    },
}

/// Decides when motion starts, extends and ends a recording.
///
/// Every frame goes through the motion filter. Motion only starts a recording
/// when enough of it lies outside the novelty detector's background cells.
/// Recorded motion, including the frame that started the recording, feeds the
/// novelty memory so a recurring hot-spot stops triggering.
pub struct RecordingStateMachine<F: MotionFilter> {
    state: RecordingState,
    filter: F,
    novelty: NoveltyDetector,
    /// Raw frames leading up to the current one, written when a recording starts.
    preview: FrameLoop,
    preview_meta: VecDeque<(i64, u64)>,
    /// Sequence number of the last frame written to any recording.
    last_recorded_seq: Option<u64>,
    snapshotter: Option<Snapshotter>,
    output_dir: PathBuf,
    min_ms: i64,
    max_ms: i64,
}

impl<F: MotionFilter> RecordingStateMachine<F> {
    pub fn new(
        filter: F,
        novelty: NoveltyDetector,
        config: &RecorderConfig,
        fps: u32,
        resolution: Resolution,
    ) -> Self {
        // The current frame plus `preview_secs` of history.
        let preview_depth = config.preview_secs.saturating_mul(fps) as usize + 2;
        let snapshotter = config.snapshot_dir.as_ref().map(Snapshotter::new);
        if let Some(snap) = &snapshotter {
            info!(dir = %snap.dir().display(), "snapshots enabled");
        }
        Self {
            state: RecordingState::Idle,
            filter,
            novelty,
            preview: FrameLoop::new(preview_depth, resolution),
            preview_meta: VecDeque::with_capacity(preview_depth),
            last_recorded_seq: None,
            snapshotter,
            output_dir: config.output_dir.clone(),
            min_ms: config.min_secs as i64 * 1000,
            max_ms: config.max_secs as i64 * 1000,
        }
    }

    /// Process one frame from the sensor. This is the main entry point.
    pub fn process_frame(&mut self, frame: &TimestampedFrame) {
        self.push_preview(frame);
        let detection = self.filter.evaluate(&frame.frame);
        debug!(
            seq = frame.seq,
            motion = detection.motion,
            outcome = ?detection.outcome,
            "frame evaluated"
        );

        self.state = match std::mem::take(&mut self.state) {
            RecordingState::Idle => self.handle_idle(frame, detection.motion),
            RecordingState::Recording {
                writer,
                last_motion_ms,
            } => self.handle_recording(writer, last_motion_ms, frame, detection.motion),
        };
    }

    /// Close any open recording, e.g. when the sensor disconnects.
    pub fn finish(&mut self) {
        if let RecordingState::Recording { writer, .. } = std::mem::take(&mut self.state) {
            info!("closing recording");
            Self::finish_recording(writer);
        }
    }

    /// Write the most recent frame as a still image.
    pub fn take_snapshot(&mut self) {
        let (Some(snapshotter), Some(frame)) = (self.snapshotter.as_mut(), self.preview.previous())
        else {
            debug!("snapshot requested but not available");
            return;
        };
        if let Err(e) = snapshotter.take(frame) {
            warn!(error = %e, "failed to write snapshot");
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, RecordingState::Recording { .. })
    }

    fn handle_idle(&mut self, frame: &TimestampedFrame, motion: bool) -> RecordingState {
        if !motion {
            return RecordingState::Idle;
        }
        if !self
            .novelty
            .has_throttled_new_movement(self.filter.motion_state())
        {
            info!(
                ts = frame.captured_at_ms,
                pixels = self.filter.motion_state().count,
                "IDLE: motion throttled, not enough new movement"
            );
            return RecordingState::Idle;
        }

        let writer = match self.start_recording(frame) {
            Ok(w) => w,
            Err(e) => {
                error!(error = %e, "failed to start recording, staying IDLE");
                return RecordingState::Idle;
            }
        };
        info!(
            ts = frame.captured_at_ms,
            preview_frames = writer.frame_count(),
            filter = self.filter.name(),
            "IDLE→RECORDING: motion detected"
        );
        self.novelty.process_recorded(self.filter.motion_state());
        self.take_snapshot();
        RecordingState::Recording {
            writer,
            last_motion_ms: frame.captured_at_ms,
        }
    }

    fn handle_recording(
        &mut self,
        mut writer: RecordingWriter,
        mut last_motion_ms: i64,
        frame: &TimestampedFrame,
        motion: bool,
    ) -> RecordingState {
        let now = frame.captured_at_ms;
        if let Err(e) = writer.write_frame(frame) {
            error!(error = %e, "RECORDING: failed to write frame, finalizing");
            Self::finish_recording(writer);
            return RecordingState::Idle;
        }
        self.last_recorded_seq = Some(frame.seq);

        if motion {
            self.novelty.process_recorded(self.filter.motion_state());
            last_motion_ms = now;
        }

        if now - writer.start_ms >= self.max_ms {
            info!(
                start_ms = writer.start_ms,
                frames = writer.frame_count(),
                "RECORDING→IDLE: maximum length reached"
            );
            Self::finish_recording(writer);
            return RecordingState::Idle;
        }
        if now - last_motion_ms >= self.min_ms {
            info!(
                start_ms = writer.start_ms,
                last_motion_ms,
                frames = writer.frame_count(),
                "RECORDING→IDLE: no motion"
            );
            Self::finish_recording(writer);
            return RecordingState::Idle;
        }

        RecordingState::Recording {
            writer,
            last_motion_ms,
        }
    }

    /// Open a writer and fill it with the preview, which ends with `frame`.
    /// Frames already written to an earlier recording are skipped.
    fn start_recording(&mut self, frame: &TimestampedFrame) -> Result<RecordingWriter, WriterError> {
        let last_recorded = self.last_recorded_seq;
        let unrecorded = |seq: u64| last_recorded.map_or(true, |last| seq > last);

        let start_ms = self
            .preview_meta
            .iter()
            .find(|&&(_, seq)| unrecorded(seq))
            .map(|&(ts, _)| ts)
            .unwrap_or(frame.captured_at_ms);
        let mut writer = RecordingWriter::create(&self.output_dir, start_ms)?;
        for (f, &(captured_at_ms, seq)) in self.preview.iter_committed().zip(&self.preview_meta) {
            if !unrecorded(seq) {
                continue;
            }
            if let Err(e) = writer.write_frame(&TimestampedFrame::new(f.clone(), captured_at_ms, seq)) {
                writer.abort();
                return Err(e);
            }
        }
        self.last_recorded_seq = Some(frame.seq);
        Ok(writer)
    }

    fn finish_recording(writer: RecordingWriter) {
        let start_ms = writer.start_ms;
        match writer.finish() {
            Ok(Some(rec)) => info!(
                path = %rec.path.display(),
                frames = rec.frame_count,
                start_ms = rec.start_ms,
                end_ms = rec.end_ms,
                "recording saved"
            ),
            Ok(None) => debug!(start_ms, "empty recording discarded"),
            Err(e) => error!(error = %e, start_ms, "failed to finalize recording"),
        }
    }

    fn push_preview(&mut self, frame: &TimestampedFrame) {
        self.preview.current_mut().copy_from(&frame.frame);
        self.preview.advance();
        if self.preview_meta.len() == self.preview.depth() - 1 {
            self.preview_meta.pop_front();
        }
        self.preview_meta.push_back((frame.captured_at_ms, frame.seq));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thermal_motion::{DetectOutcome, Detection, MotionDetector, MotionState};
    use thermal_recorder_common::config::{MotionConfig, ThrottleConfig};
    use thermal_recorder_common::frame::Frame;

    const RES: Resolution = Resolution { rows: 4, cols: 4 };
    const FPS: u32 = 10;

    /// Replays a fixed sequence of motion decisions, flagging pixel (0, 0) on motion.
    struct ScriptedFilter {
        script: VecDeque<bool>,
        state: MotionState,
    }

    impl ScriptedFilter {
        fn new(script: impl IntoIterator<Item = bool>) -> Self {
            Self {
                script: script.into_iter().collect(),
                state: MotionState::new(RES),
            }
        }
    }

    impl MotionFilter for ScriptedFilter {
        fn evaluate(&mut self, _frame: &Frame) -> Detection {
            let motion = self.script.pop_front().unwrap_or(false);
            self.state.clear();
            if motion {
                self.state.mark(0, 0);
            }
            Detection {
                motion,
                outcome: DetectOutcome::Deltas(self.state.count),
            }
        }

        fn motion_state(&self) -> &MotionState {
            &self.state
        }
    }

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "thermal-recorder-{}-{name}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn machine(
        dir: &PathBuf,
        script: impl IntoIterator<Item = bool>,
        trigger_threshold: usize,
    ) -> RecordingStateMachine<ScriptedFilter> {
        let config = RecorderConfig {
            output_dir: dir.clone(),
            min_secs: 1,
            max_secs: 3,
            preview_secs: 1,
            snapshot_dir: Some(dir.join("snapshots")),
        };
        let novelty = NoveltyDetector::new(
            &ThrottleConfig {
                trigger_threshold,
                max_memory: 200,
            },
            RES,
        );
        RecordingStateMachine::new(ScriptedFilter::new(script), novelty, &config, FPS, RES)
    }

    fn feed(sm: &mut RecordingStateMachine<ScriptedFilter>, ticks: std::ops::Range<u64>) {
        for i in ticks {
            let frame = Frame::filled(RES, 3000 + i as u16);
            sm.process_frame(&TimestampedFrame::new(frame, i as i64 * 100, i));
        }
    }

    /// Frame counts of every finished recording under `dir`, ordered by name.
    fn recordings(dir: &PathBuf) -> Vec<usize> {
        let record = TimestampedFrame::encoded_len(RES) as u64;
        let mut found = Vec::new();
        for day in std::fs::read_dir(dir).unwrap().flatten() {
            if !day.path().is_dir() || day.file_name() == "snapshots" {
                continue;
            }
            for file in std::fs::read_dir(day.path()).unwrap().flatten() {
                let len = file.metadata().unwrap().len();
                found.push((file.file_name(), (len / record) as usize));
            }
        }
        found.sort();
        found.into_iter().map(|(_, n)| n).collect()
    }

    #[test]
    fn no_motion_writes_nothing() {
        let dir = test_dir("quiet");
        let mut sm = machine(&dir, [false; 30], 10);
        feed(&mut sm, 0..30);
        sm.finish();
        assert!(!sm.is_recording());
        assert!(!dir.exists() || recordings(&dir).is_empty());
    }

    #[test]
    fn motion_records_preview_and_tail() {
        let dir = test_dir("single");
        let script = (0..40).map(|i| i == 5);
        let mut sm = machine(&dir, script, 0);

        feed(&mut sm, 0..6);
        assert!(sm.is_recording());
        feed(&mut sm, 6..15);
        assert!(sm.is_recording(), "still inside min_secs after the last motion");
        feed(&mut sm, 15..20);
        assert!(!sm.is_recording());

        // 6 preview frames (0..=5) then frames 6..=15; frame 15 is one second after motion.
        assert_eq!(recordings(&dir), vec![16]);
        assert!(dir.join("snapshots").join("still.png").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn motion_extends_recording() {
        let dir = test_dir("extend");
        let script = (0..40).map(|i| i == 5 || i == 12);
        let mut sm = machine(&dir, script, 0);
        feed(&mut sm, 0..30);
        // Motion at frame 12 moves the stop to frame 22.
        assert_eq!(recordings(&dir), vec![6 + 17]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn motion_below_trigger_threshold_is_not_recorded() {
        let dir = test_dir("throttled");
        let mut sm = machine(&dir, (0..20).map(|i| i == 5), 10);
        feed(&mut sm, 0..20);
        assert!(!sm.is_recording());
        assert!(!dir.exists() || recordings(&dir).is_empty());
    }

    #[test]
    fn continuous_motion_is_capped_at_max_length() {
        let dir = test_dir("capped");
        let mut sm = machine(&dir, [true; 45], 0);
        feed(&mut sm, 0..45);
        assert!(sm.is_recording());
        sm.finish();
        assert!(!sm.is_recording());

        // First recording: frames 0..=30 (3s). The second starts at 31 without
        // repeating frames the first one already holds.
        assert_eq!(recordings(&dir), vec![31, 14]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn snapshot_without_frames_is_skipped() {
        let dir = test_dir("snapshot");
        let mut sm = machine(&dir, [], 10);
        sm.take_snapshot();
        assert!(!dir.join("snapshots").exists());
        feed(&mut sm, 0..1);
        sm.take_snapshot();
        assert!(dir.join("snapshots").join("still.png").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    // -----------------------------------------------------------------------
    // Real detector and novelty memory at full sensor resolution
    // -----------------------------------------------------------------------

    const LEPTON: Resolution = Resolution::LEPTON3;

    fn detector_machine(dir: &PathBuf) -> RecordingStateMachine<MotionDetector> {
        let motion = MotionConfig {
            frame_compare_gap: 2,
            one_diff_only: true,
            delta_thresh: 50,
            count_thresh: 3,
            temp_thresh: 2900,
            nonzero_max_percent: 50,
            warmer_only: true,
            verbose: false,
        };
        let config = RecorderConfig {
            output_dir: dir.clone(),
            min_secs: 1,
            max_secs: 3,
            preview_secs: 1,
            snapshot_dir: None,
        };
        let novelty = NoveltyDetector::new(
            &ThrottleConfig {
                trigger_threshold: 20,
                max_memory: 200,
            },
            LEPTON,
        );
        RecordingStateMachine::new(
            MotionDetector::new(&motion, LEPTON),
            novelty,
            &config,
            FPS,
            LEPTON,
        )
    }

    fn scene() -> Frame {
        Frame::filled(LEPTON, 3000)
    }

    /// Background scene with a warm 6x6 blob whose top-left corner is `(y, x)`.
    fn blob_at(y: usize, x: usize) -> Frame {
        let mut frame = scene();
        for yy in y..y + 6 {
            for xx in x..x + 6 {
                frame.set(yy, xx, 3400);
            }
        }
        frame
    }

    fn push(sm: &mut RecordingStateMachine<MotionDetector>, frame: Frame, seq: &mut u64) {
        sm.process_frame(&TimestampedFrame::new(frame, *seq as i64 * 100, *seq));
        *seq += 1;
    }

    /// Show each blob for one tick followed by 29 ticks of empty scene.
    /// Returns how many of the blobs started a recording.
    fn show_blobs(
        sm: &mut RecordingStateMachine<MotionDetector>,
        blobs: &[(usize, usize)],
        seq: &mut u64,
    ) -> usize {
        let mut started = 0;
        for &(y, x) in blobs {
            assert!(!sm.is_recording());
            push(sm, blob_at(y, x), seq);
            if sm.is_recording() {
                started += 1;
            }
            for _ in 1..30 {
                push(sm, scene(), seq);
            }
        }
        started
    }

    #[test]
    fn repeating_hot_spot_stops_starting_recordings() {
        let dir = test_dir("hot-spot");
        let mut sm = detector_machine(&dir);
        let mut seq = 0;
        // Past the detector's start-up recalibration.
        for _ in 0..10 {
            push(&mut sm, scene(), &mut seq);
        }

        // Memory from the first two recordings marks the cell as background
        // on the following decay cycle.
        assert_eq!(show_blobs(&mut sm, &[(36, 36); 8], &mut seq), 2);

        // A blob of the same size somewhere else is still new.
        assert_eq!(show_blobs(&mut sm, &[(100, 148)], &mut seq), 1);
        assert_eq!(recordings(&dir).len(), 3);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn blobs_in_fresh_places_each_record() {
        let dir = test_dir("fresh");
        let mut sm = detector_machine(&dir);
        let mut seq = 0;
        for _ in 0..10 {
            push(&mut sm, scene(), &mut seq);
        }

        // Three memory cells apart, so no blob lands in another's dilated background.
        let places: Vec<(usize, usize)> = [4, 52, 100]
            .into_iter()
            .flat_map(|y| [4, 52, 100, 148].into_iter().map(move |x| (y, x)))
            .collect();
        assert_eq!(show_blobs(&mut sm, &places, &mut seq), places.len());
        assert_eq!(recordings(&dir).len(), places.len());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
