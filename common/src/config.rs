use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::frame::Resolution;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    pub throttle: ThrottleConfig,
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    #[serde(default = "default_rows")]
    pub rows: usize,
    #[serde(default = "default_cols")]
    pub cols: usize,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Unix socket the sensor daemon writes frames to.
    #[serde(default = "default_socket")]
    pub socket: PathBuf,
}

impl SensorConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.rows, self.cols)
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            rows: default_rows(),
            cols: default_cols(),
            fps: default_fps(),
            socket: default_socket(),
        }
    }
}

/// Motion detector tuning. Thresholds are in raw sensor units.
#[derive(Debug, Clone, Deserialize)]
pub struct MotionConfig {
    /// Number of frames between the current frame and the one it is compared to.
    #[serde(default = "default_frame_compare_gap")]
    pub frame_compare_gap: usize,
    /// Count deltas from a single diff instead of requiring two consecutive diffs.
    #[serde(default = "default_true")]
    pub one_diff_only: bool,
    #[serde(default = "default_delta_thresh")]
    pub delta_thresh: u16,
    #[serde(default = "default_count_thresh")]
    pub count_thresh: usize,
    #[serde(default = "default_temp_thresh")]
    pub temp_thresh: u16,
    /// Above this share of changed pixels the frame is treated as a recalibration.
    #[serde(default = "default_nonzero_max_percent")]
    pub nonzero_max_percent: u8,
    /// Only warming pixels count as change.
    #[serde(default = "default_true")]
    pub warmer_only: bool,
    #[serde(default)]
    pub verbose: bool,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            frame_compare_gap: default_frame_compare_gap(),
            one_diff_only: true,
            delta_thresh: default_delta_thresh(),
            count_thresh: default_count_thresh(),
            temp_thresh: default_temp_thresh(),
            nonzero_max_percent: default_nonzero_max_percent(),
            warmer_only: true,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    /// Motion must have more than this many new (non-background) pixels to
    /// start a recording. Required: zero means a single new pixel is enough.
    pub trigger_threshold: usize,
    /// Cap applied to every memory cell during decay.
    #[serde(default = "default_max_memory")]
    pub max_memory: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecorderConfig {
    pub output_dir: PathBuf,
    /// Seconds a recording continues after the last motion.
    #[serde(default = "default_min_secs")]
    pub min_secs: u32,
    #[serde(default = "default_max_secs")]
    pub max_secs: u32,
    /// Seconds of frames before the trigger that are written at the start.
    #[serde(default = "default_preview_secs")]
    pub preview_secs: u32,
    #[serde(default)]
    pub snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the detectors cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sensor.rows == 0 || self.sensor.cols == 0 {
            return Err(ConfigError::Invalid(
                "sensor.rows and sensor.cols must be non-zero".into(),
            ));
        }
        if self.sensor.rows > u16::MAX as usize || self.sensor.cols > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "sensor resolution {}x{} does not fit the frame header",
                self.sensor.rows, self.sensor.cols
            )));
        }
        if self.sensor.fps == 0 {
            return Err(ConfigError::Invalid("sensor.fps must be non-zero".into()));
        }
        if self.motion.nonzero_max_percent > 100 {
            return Err(ConfigError::Invalid(format!(
                "motion.nonzero_max_percent must be 0-100, got {}",
                self.motion.nonzero_max_percent
            )));
        }
        if self.recorder.min_secs == 0 {
            return Err(ConfigError::Invalid("recorder.min_secs must be non-zero".into()));
        }
        if self.recorder.max_secs < self.recorder.min_secs {
            return Err(ConfigError::Invalid(format!(
                "recorder.max_secs ({}) is shorter than recorder.min_secs ({})",
                self.recorder.max_secs, self.recorder.min_secs
            )));
        }
        if self.recorder.preview_secs > self.recorder.max_secs {
            return Err(ConfigError::Invalid(format!(
                "recorder.preview_secs ({}) is longer than recorder.max_secs ({})",
                self.recorder.preview_secs, self.recorder.max_secs
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_rows() -> usize {
    Resolution::LEPTON3.rows
}
fn default_cols() -> usize {
    Resolution::LEPTON3.cols
}
fn default_fps() -> u32 {
    9
}
fn default_socket() -> PathBuf {
    PathBuf::from("/var/run/lepton-frames")
}
fn default_frame_compare_gap() -> usize {
    45
}
fn default_true() -> bool {
    true
}
fn default_delta_thresh() -> u16 {
    50
}
fn default_count_thresh() -> usize {
    3
}
fn default_temp_thresh() -> u16 {
    2900
}
fn default_nonzero_max_percent() -> u8 {
    50
}
fn default_max_memory() -> u32 {
    200
}
fn default_min_secs() -> u32 {
    10
}
fn default_max_secs() -> u32 {
    600
}
fn default_preview_secs() -> u32 {
    3
}
fn default_log_level() -> String {
    "info".into()
}
